//! Handshake & discovery.
//!
//! Runs the initialize/initialized exchange that gates a server's
//! `starting → ready` transition, then lists its tools. Discovery is
//! best-effort: a server that cannot enumerate tools still serves calls, it
//! just offers no local schema guidance.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

use warden_types::errors::BrokerError;
use warden_types::protocol::{
    JsonRpcMessage, ToolSchema, CLIENT_NAME, CLIENT_VERSION, PROTOCOL_VERSION,
};
use warden_types::traits::ToolTransport;

use crate::registry::RequestIds;

/// Run the initialize exchange for a freshly started server.
///
/// Sends `initialize` with the fixed protocol version tag, an empty tools
/// capability placeholder, and the client identity; awaits the matching
/// reply under `connection_timeout`; then sends the `initialized`
/// notification. Only after this returns does the caller mark the server
/// ready.
pub(crate) async fn initialize_server(
    name: &str,
    transport: &dyn ToolTransport,
    ids: &RequestIds,
    connection_timeout: Duration,
) -> Result<(), BrokerError> {
    let request = JsonRpcMessage::request(
        ids.next(),
        "initialize",
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "clientInfo": { "name": CLIENT_NAME, "version": CLIENT_VERSION },
        }),
    );

    let reply = timeout(connection_timeout, transport.request(request))
        .await
        .map_err(|_| BrokerError::Timeout {
            server: name.to_string(),
            tool: "initialize".to_string(),
        })??;

    if let Some(error) = reply.error {
        return Err(BrokerError::Remote {
            code: error.code,
            message: format!("initialize rejected: {}", error.message),
        });
    }

    transport
        .notify(JsonRpcMessage::notification("notifications/initialized", None))
        .await?;

    info!(server = %name, "handshake complete");
    Ok(())
}

/// Fetch and cache the server's tool list.
///
/// Waits out `settle_delay` first — some servers build their tool registry
/// asynchronously after the handshake and answer `tools/list` empty if
/// asked too early.
pub(crate) async fn discover_tools(
    name: &str,
    transport: &dyn ToolTransport,
    ids: &RequestIds,
    settle_delay: Duration,
    list_timeout: Duration,
) -> Result<HashMap<String, ToolSchema>, BrokerError> {
    if !settle_delay.is_zero() {
        sleep(settle_delay).await;
    }

    let request = JsonRpcMessage::request(ids.next(), "tools/list", json!({}));
    let reply = timeout(list_timeout, transport.request(request))
        .await
        .map_err(|_| BrokerError::Timeout {
            server: name.to_string(),
            tool: "tools/list".to_string(),
        })??;

    let tools = parse_tools_list(&reply)?;
    debug!(server = %name, tool_count = tools.len(), "cached tool schemas");
    Ok(tools)
}

/// Parse a `tools/list` reply into schema records keyed by tool name.
fn parse_tools_list(reply: &JsonRpcMessage) -> Result<HashMap<String, ToolSchema>, BrokerError> {
    if let Some(error) = &reply.error {
        return Err(BrokerError::Remote {
            code: error.code,
            message: format!("tools/list failed: {}", error.message),
        });
    }

    let result = reply
        .result
        .as_ref()
        .ok_or_else(|| BrokerError::Protocol("tools/list reply has no result".to_string()))?;
    let tools_value = result
        .get("tools")
        .ok_or_else(|| BrokerError::Protocol("tools/list result has no 'tools' field".to_string()))?;

    let schemas: Vec<ToolSchema> = serde_json::from_value(tools_value.clone())
        .map_err(|e| BrokerError::Protocol(format!("unparseable tools list: {e}")))?;

    Ok(schemas
        .into_iter()
        .map(|schema| (schema.name.clone(), schema))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use warden_types::protocol::JsonRpcError;

    fn reply_with(result: serde_json::Value) -> JsonRpcMessage {
        JsonRpcMessage {
            jsonrpc: "2.0".to_string(),
            id: Some(json!("w-1")),
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    #[test]
    fn tools_list_parses_into_schema_map() {
        let reply = reply_with(json!({
            "tools": [
                {"name": "store_memory", "description": "Persist", "inputSchema": {"type": "object"}},
                {"name": "recall_memory"}
            ]
        }));
        let tools = parse_tools_list(&reply).unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools["store_memory"].description.as_deref(), Some("Persist"));
        assert!(tools["recall_memory"].input_schema.is_null());
    }

    #[test]
    fn tools_list_error_reply_is_remote_error() {
        let reply = JsonRpcMessage {
            jsonrpc: "2.0".to_string(),
            id: Some(json!("w-1")),
            method: None,
            params: None,
            result: None,
            error: Some(JsonRpcError {
                code: -32601,
                message: "not supported".to_string(),
                data: None,
            }),
        };
        assert!(matches!(
            parse_tools_list(&reply),
            Err(BrokerError::Remote { code: -32601, .. })
        ));
    }

    #[test]
    fn tools_list_without_tools_field_is_a_protocol_error() {
        let reply = reply_with(json!({"unexpected": true}));
        assert!(matches!(
            parse_tools_list(&reply),
            Err(BrokerError::Protocol(_))
        ));
    }
}
