//! Delivery of readings to the frontend.

mod http;
mod hub;

pub use http::HttpPush;
pub use hub::Hub;

use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::warn;

use crate::error::TransportError;
use crate::reading::Payload;

/// Something that can deliver a payload to a frontend.
pub trait Transport: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Delivers `payload`, returning how many receivers it reached.
    fn send<'a>(&'a self, payload: &'a Payload) -> BoxFuture<'a, Result<usize, TransportError>>;
}

/// Sends every payload through several transports.
///
/// All transports are tried; the first error is reported.
pub struct Fanout {
    transports: Vec<Arc<dyn Transport>>,
}

impl Fanout {
    pub fn new(transports: Vec<Arc<dyn Transport>>) -> Self {
        Self { transports }
    }
}

impl Transport for Fanout {
    fn name(&self) -> &str {
        "fanout"
    }

    fn send<'a>(&'a self, payload: &'a Payload) -> BoxFuture<'a, Result<usize, TransportError>> {
        Box::pin(async move {
            let mut reached = 0;
            let mut first_error = None;
            for transport in &self.transports {
                match transport.send(payload).await {
                    Ok(n) => reached += n,
                    Err(e) => {
                        warn!("Transport {} failed: {}", transport.name(), e);
                        first_error.get_or_insert(e);
                    }
                }
            }
            match first_error {
                Some(e) => Err(e),
                None => Ok(reached),
            }
        })
    }
}
