//! HTTP push to an external frontend.

use futures::future::BoxFuture;
use std::time::Duration;
use tracing::debug;

use super::Transport;
use crate::error::TransportError;
use crate::reading::Payload;

/// POSTs every payload as JSON to a fixed URL.
pub struct HttpPush {
    client: reqwest::Client,
    url: String,
}

impl HttpPush {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for HttpPush {
    fn name(&self) -> &str {
        "http-push"
    }

    fn send<'a>(&'a self, payload: &'a Payload) -> BoxFuture<'a, Result<usize, TransportError>> {
        Box::pin(async move {
            let response = self.client.post(&self.url).json(payload).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::Status(status));
            }
            debug!("Pushed reading of '{}' to {}", payload.key, self.url);
            Ok(1)
        })
    }
}
