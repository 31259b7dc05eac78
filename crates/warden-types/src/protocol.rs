/// Tool Protocol wire types.
///
/// Tool servers speak JSON-RPC 2.0: over stdio every line is exactly one
/// JSON value terminated by `\n`; over HTTP every request is one POST of the
/// same envelope. A single struct models all four message kinds (request,
/// notification, success response, error response) because the reader task
/// must classify incoming frames before it knows which kind it has.
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version tag sent in the `initialize` handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Client name reported to tool servers during the handshake.
pub const CLIENT_NAME: &str = "warden-broker";

/// Client version reported to tool servers during the handshake.
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================
// JSON-RPC Envelope
// ============================================================

/// A JSON-RPC 2.0 message.
///
/// Absent fields are omitted on the wire so requests never carry `result`
/// and responses never carry `method`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcMessage {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Request id; `None` for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Method name; `None` for responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Request parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Success payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Error message.
    pub message: String,
    /// Additional error data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcMessage {
    /// Build a request with the given id.
    pub fn request(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(Value::String(id.into())),
            method: Some(method.into()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    /// Build a notification (no id, no reply expected).
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: Some(method.into()),
            params,
            result: None,
            error: None,
        }
    }

    /// True when this frame is a response to some request.
    pub fn is_response(&self) -> bool {
        self.id.is_some() && self.method.is_none()
    }

    /// True when this frame is a notification.
    pub fn is_notification(&self) -> bool {
        self.id.is_none() && self.method.is_some()
    }

    /// The id normalized to a string key for pending-table lookup.
    ///
    /// Servers are expected to echo string ids, but a numeric id from a
    /// nonconforming server still correlates.
    pub fn id_key(&self) -> Option<String> {
        match &self.id {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

// ============================================================
// Tool Schemas
// ============================================================

/// A tool definition as returned by `tools/list`.
///
/// Advisory only: the broker caches these for argument mapping and host
/// introspection, but the server is the authority on what it accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name.
    pub name: String,
    /// Tool description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool's input, if the server provides one.
    #[serde(rename = "inputSchema", default, skip_serializing_if = "Value::is_null")]
    pub input_schema: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_roundtrips_without_response_fields() {
        let msg = JsonRpcMessage::request("w-1", "tools/call", json!({"name": "store"}));
        let wire = serde_json::to_string(&msg).unwrap();
        assert!(!wire.contains("result"));
        assert!(!wire.contains("error"));

        let back: JsonRpcMessage = serde_json::from_str(&wire).unwrap();
        assert_eq!(back.id_key().as_deref(), Some("w-1"));
        assert_eq!(back.method.as_deref(), Some("tools/call"));
    }

    #[test]
    fn classification_distinguishes_notifications_from_responses() {
        let note = JsonRpcMessage::notification("notifications/initialized", None);
        assert!(note.is_notification());
        assert!(!note.is_response());

        let reply: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"w-2","result":{"ok":true}}"#).unwrap();
        assert!(reply.is_response());
        assert!(!reply.is_notification());
    }

    #[test]
    fn numeric_ids_still_correlate() {
        let reply: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":7,"result":null}"#).unwrap();
        assert_eq!(reply.id_key().as_deref(), Some("7"));
    }

    #[test]
    fn tool_schema_parses_camel_case_input_schema() {
        let schema: ToolSchema = serde_json::from_value(json!({
            "name": "store_memory",
            "description": "Persist a memory entry",
            "inputSchema": {"type": "object"}
        }))
        .unwrap();
        assert_eq!(schema.name, "store_memory");
        assert_eq!(schema.input_schema["type"], "object");
    }
}
