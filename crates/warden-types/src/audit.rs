/// Audit trail and degraded-mode reply types.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

// ============================================================
// Audit Trail
// ============================================================

/// One admitted or denied call in the audit ring.
///
/// Parameters are redacted before an entry is constructed; no sensitive
/// values reach the ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry identifier.
    pub id: Uuid,
    /// When the decision was recorded.
    pub timestamp: DateTime<Utc>,
    /// Sandbox runtime that made the call.
    pub runtime_tag: String,
    /// Target server.
    pub server: String,
    /// Target tool.
    pub tool: String,
    /// Redacted call parameters.
    pub params: Value,
    /// What happened to the call.
    pub outcome: AuditOutcome,
    /// Denial or failure reason, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Wall-clock call duration; absent on denials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Terminal outcome of a brokered call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// The call reached the server (or the mock path) and returned a reply.
    Success,
    /// The policy engine refused admission.
    Denied,
    /// The call was admitted but failed (timeout, transport, server error).
    Error,
}

// ============================================================
// Mock Replies
// ============================================================

/// Synthetic reply produced in degraded mode when a server is not ready.
///
/// Lets sandbox code run deterministically without real tools; the `mocked`
/// marker makes the substitution visible to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockReply {
    /// Always `true`.
    pub mocked: bool,
    /// Server the call targeted.
    pub server: String,
    /// Tool the call targeted.
    pub tool: String,
    /// The caller's parameters, echoed back.
    pub params_echo: Value,
    /// Human-readable explanation of why the reply is synthetic.
    pub note: String,
}

impl MockReply {
    /// Build a mock reply for an unavailable server.
    pub fn new(server: impl Into<String>, tool: impl Into<String>, params: Value) -> Self {
        let server = server.into();
        let tool = tool.into();
        let note = format!("server '{server}' is unavailable; this reply is synthetic");
        Self {
            mocked: true,
            server,
            tool,
            params_echo: params,
            note,
        }
    }

    /// The reply as a JSON value, as handed back to sandbox code.
    pub fn into_value(self) -> Value {
        json!({
            "mocked": self.mocked,
            "server": self.server,
            "tool": self.tool,
            "params_echo": self.params_echo,
            "note": self.note,
        })
    }
}
