use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::error::TransportError;
use crate::signing::SIGNATURE_HEADER;

/// Default bound on a single webhook POST.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends one signed webhook body and reports the HTTP status.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// POST `body` verbatim with the signature header.
    ///
    /// `Ok` carries the status code of any HTTP response, including
    /// errors; `Err` means no response was received.
    async fn post(&self, url: &str, signature: &str, body: &[u8]) -> Result<u16, TransportError>;
}

/// reqwest-based transport with a per-request timeout.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("settlement-worker/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn post(&self, url: &str, signature: &str, body: &[u8]) -> Result<u16, TransportError> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body.to_vec())
            .send()
            .await?;

        let status = response.status().as_u16();
        debug!(url = %url, status, "webhook response received");
        Ok(status)
    }
}
