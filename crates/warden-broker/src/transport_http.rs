//! HTTP transport driver.
//!
//! For HTTP servers the broker assumes something is already listening: each
//! request is one POST of the JSON-RPC envelope and the decoded body is the
//! reply. There is no correlation table — the round-trip is the
//! correlation — but deadlines and concurrency are still enforced by the
//! dispatcher around this driver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use warden_types::errors::BrokerError;
use warden_types::protocol::JsonRpcMessage;
use warden_types::traits::ToolTransport;

/// One-POST-per-request JSON-RPC channel.
pub struct HttpTransport {
    name: String,
    client: reqwest::Client,
    base_url: String,
    connected: AtomicBool,
}

impl HttpTransport {
    /// Build a client for the given endpoint.
    ///
    /// Only the connect phase is bounded here; per-call deadlines are the
    /// dispatcher's job.
    pub fn new(
        name: &str,
        base_url: &str,
        connect_timeout: Duration,
    ) -> Result<Self, BrokerError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| BrokerError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            name: name.to_string(),
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            connected: AtomicBool::new(true),
        })
    }

    async fn post(&self, message: &JsonRpcMessage) -> Result<reqwest::Response, BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::ServerClosed);
        }
        debug!(
            server = %self.name,
            method = ?message.method,
            id = ?message.id,
            "posting JSON-RPC envelope"
        );
        let response = self
            .client
            .post(&self.base_url)
            .json(message)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    BrokerError::Transport(format!(
                        "failed to connect to server '{}': {e}",
                        self.name
                    ))
                } else {
                    BrokerError::Transport(format!("HTTP request to '{}' failed: {e}", self.name))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_http_status(status));
        }
        Ok(response)
    }
}

/// 4xx is a permanent refusal, 5xx may clear on retry.
fn classify_http_status(status: reqwest::StatusCode) -> BrokerError {
    if status.is_client_error() {
        BrokerError::Transport(format!("permanent HTTP error {status}: request was rejected"))
    } else if status.is_server_error() {
        BrokerError::Transport(format!("retryable HTTP error {status}: server-side failure"))
    } else {
        BrokerError::Transport(format!("unexpected HTTP status {status}"))
    }
}

#[async_trait]
impl ToolTransport for HttpTransport {
    async fn request(&self, message: JsonRpcMessage) -> Result<JsonRpcMessage, BrokerError> {
        let response = self.post(&message).await?;
        let body = response
            .text()
            .await
            .map_err(|e| BrokerError::Transport(format!("failed to read response body: {e}")))?;
        serde_json::from_str::<JsonRpcMessage>(&body)
            .map_err(|e| BrokerError::Protocol(format!("invalid JSON-RPC response body: {e}")))
    }

    async fn notify(&self, message: JsonRpcMessage) -> Result<(), BrokerError> {
        // Notification acknowledgements may be empty 2xx responses.
        let _ = self.post(&message).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        info!(server = %self.name, "closing HTTP transport");
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
