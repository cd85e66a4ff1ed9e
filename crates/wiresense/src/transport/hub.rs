//! Built-in frontend server acting as a transport.

use futures::future::BoxFuture;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::Transport;
use crate::error::TransportError;
use crate::reading::Payload;
use crate::registry::Registry;
use crate::server::{self, ServerState};

/// Backlog of readings kept for slow WebSocket clients.
const CHANNEL_CAPACITY: usize = 64;

/// Frontend server that pushes readings to connected WebSocket clients.
///
/// Having no clients connected is not an error; the reading is simply not
/// seen by anyone.
pub struct Hub {
    readings: broadcast::Sender<Arc<str>>,
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Hub {
    /// Binds the server and starts serving in the background.
    ///
    /// `addr` may name a host, e.g. `("localhost", 8080)`.
    pub async fn bind(addr: impl ToSocketAddrs, registry: Registry) -> crate::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let (readings, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let app = server::create_router(ServerState {
            readings: readings.clone(),
            registry,
            shutdown: shutdown_rx.clone(),
        });

        let mut stop = shutdown_rx;
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop.wait_for(|stopped| *stopped).await;
                })
                .await;
            if let Err(e) = result {
                warn!("Server error: {}", e);
            }
        });

        info!("Server running on http://{}", local_addr);
        Ok(Self {
            readings,
            local_addr,
            shutdown,
            closed: AtomicBool::new(false),
            task: Mutex::new(Some(task)),
        })
    }

    /// Address the server actually listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of WebSocket clients currently connected.
    pub fn client_count(&self) -> usize {
        self.readings.receiver_count()
    }

    /// Receives the same encoded payloads WebSocket clients get.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<str>> {
        self.readings.subscribe()
    }

    /// Stops the server and disconnects all clients.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(true);
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
        info!("Server on {} stopped", self.local_addr);
    }
}

impl Transport for Hub {
    fn name(&self) -> &str {
        "hub"
    }

    fn send<'a>(&'a self, payload: &'a Payload) -> BoxFuture<'a, Result<usize, TransportError>> {
        Box::pin(async move {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Closed);
            }
            let message: Arc<str> = payload.to_json()?.into();
            // Err only means nobody is listening right now
            let reached = self.readings.send(message).unwrap_or(0);
            debug!("Broadcast reading of '{}' to {} clients", payload.key, reached);
            Ok(reached)
        })
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
