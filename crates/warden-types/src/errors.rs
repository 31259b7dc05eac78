/// Unified error type for the Warden tool broker.
///
/// Every crate in the workspace propagates this error across boundaries.
/// The variants mirror the failure classes a broker caller can observe:
/// transport-level failures, policy denials, deadline expiry, and errors
/// returned by the tool server itself.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The named server is not in the `ready` state and no fallback applies.
    #[error("server '{0}' is unavailable")]
    ServerUnavailable(String),

    /// The policy engine rejected the call. Never auto-retried.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The per-minute window or the concurrency cap refused admission.
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    /// The deadline expired before a reply arrived.
    #[error("call to '{tool}' on '{server}' timed out")]
    Timeout {
        /// Server the call was dispatched to.
        server: String,
        /// Tool that was being invoked.
        tool: String,
    },

    /// The child process died while the call was in flight.
    #[error("server process exited{}", .0.map(|c| format!(" with code {c}")).unwrap_or_default())]
    ServerExited(Option<i32>),

    /// Broker-initiated shutdown tore the connection down.
    #[error("server connection closed")]
    ServerClosed,

    /// The server answered with a JSON-RPC error object. Surfaced verbatim.
    #[error("server error {code}: {message}")]
    Remote {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },

    /// A frame could not be parsed or violated the protocol shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O failure on the transport (spawn, pipe, or HTTP).
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration loading or validation failure.
    #[error("config error: {0}")]
    Config(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for BrokerError {
    fn from(err: serde_yaml::Error) -> Self {
        BrokerError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for BrokerError {
    fn from(err: std::io::Error) -> Self {
        BrokerError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exited_message_includes_code_when_known() {
        let err = BrokerError::ServerExited(Some(3));
        assert_eq!(err.to_string(), "server process exited with code 3");

        let err = BrokerError::ServerExited(None);
        assert_eq!(err.to_string(), "server process exited");
    }

    #[test]
    fn rate_limited_message_keeps_the_canonical_wording() {
        let err = BrokerError::RateLimited("concurrency cap reached".to_string());
        assert!(err.to_string().starts_with("rate limit exceeded"));
    }
}
