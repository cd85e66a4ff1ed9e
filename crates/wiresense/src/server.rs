//! Frontend server: live readings over WebSocket, logs over HTTP.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::registry::Registry;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct ServerState {
    /// Encoded payloads fanned out to WebSocket clients
    pub readings: broadcast::Sender<Arc<str>>,
    /// Live sensors and their log files
    pub registry: Registry,
    /// Flips to `true` when the server shuts down
    pub shutdown: watch::Receiver<bool>,
}

/// Creates the router with all routes.
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        // Live readings
        .route("/", get(websocket))
        // Sensor log download
        .route("/:sensor/data.csv", get(sensor_csv))
        .fallback(not_found)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET / - WebSocket upgrade
async fn websocket(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    ws.on_upgrade(move |socket| client_session(socket, state))
}

async fn client_session(mut socket: WebSocket, state: ServerState) {
    let mut readings = state.readings.subscribe();
    let mut shutdown = state.shutdown.clone();
    info!("WebSocket client connection established");

    loop {
        tokio::select! {
            reading = readings.recv() => match reading {
                Ok(text) => {
                    if let Err(e) = socket.send(Message::Text(text.to_string())).await {
                        warn!("Failed to send reading to WebSocket client: {}", e);
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("WebSocket client lagging, skipped {} readings", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    info!("Received message: {}", escape(&text));
                    let reply = format!("Message received!\n{}", text);
                    if socket.send(Message::Text(reply)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                // Pings are answered by axum
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(other)) => {
                    warn!("Received unsupported message from WebSocket client: {:?}", other);
                }
                Some(Err(e)) => {
                    warn!("WebSocket client error: {}", e);
                    break;
                }
            },
            _ = shutdown.changed() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        }
    }

    info!("WebSocket client connection closed");
}

/// GET /:sensor/data.csv - Current log of a sensor
async fn sensor_csv(Path(sensor): Path<String>, State(state): State<ServerState>) -> Response {
    let Some(path) = state.registry.csv_path(&sensor) else {
        info!("Sensor not found: '{}'", escape(&sensor));
        return StatusCode::NOT_FOUND.into_response();
    };

    match tokio::fs::read(&path).await {
        Ok(content) => {
            info!(
                "Sent log of sensor '{}' ({})",
                escape(&sensor),
                path.display()
            );
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/csv"),
                    (header::CACHE_CONTROL, "no-cache"),
                ],
                content,
            )
                .into_response()
        }
        Err(e) => {
            error!(
                "Log of sensor '{}' is unavailable ({}): {}",
                escape(&sensor),
                path.display(),
                e
            );
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn not_found(uri: Uri) -> impl IntoResponse {
    info!("Invalid path: '{}'", escape(uri.path()));
    StatusCode::NOT_FOUND
}

/// Makes line breaks visible so request data cannot forge log lines.
fn escape(s: &str) -> String {
    s.replace('\r', "\\r").replace('\n', "\\n")
}
