/// Transport contract shared by the broker's drivers.
///
/// Defined here so the dispatcher can stay transport-agnostic and tests can
/// substitute in-memory implementations for real subprocesses.
use async_trait::async_trait;

use crate::errors::BrokerError;
use crate::protocol::JsonRpcMessage;

/// A bidirectional JSON-RPC channel to one tool server.
///
/// Implementations own their concurrency story: the stdio driver correlates
/// concurrent requests through a pending table fed by its reader task, the
/// HTTP driver maps each request onto one POST round-trip. Callers apply
/// deadlines by timing out the returned future; implementations must clean
/// up per-request state when that future is dropped.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    /// Send a request and await the matching response.
    ///
    /// The message must carry an id. A JSON-RPC error response resolves to
    /// `Ok` with the error attached — the dispatcher decides how to surface
    /// it.
    async fn request(&self, message: JsonRpcMessage) -> Result<JsonRpcMessage, BrokerError>;

    /// Send a notification; no reply is expected.
    async fn notify(&self, message: JsonRpcMessage) -> Result<(), BrokerError>;

    /// Tear the channel down, failing outstanding requests with
    /// [`BrokerError::ServerClosed`].
    async fn close(&self) -> Result<(), BrokerError>;

    /// Whether the channel is currently usable.
    fn is_connected(&self) -> bool;
}
