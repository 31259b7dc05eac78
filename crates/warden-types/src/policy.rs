/// Security policy consumed by the policy engine.
///
/// The policy is static configuration: which servers and tools a sandbox
/// may reach, how fast, with how much payload, and what the audit trail
/// records. Runtime state (window counters, concurrency) lives in
/// `warden-policy`, not here.
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Key under `rate_limits` that supplies values for unlisted servers.
pub const DEFAULT_RATE_LIMIT_KEY: &str = "default";

// ============================================================
// Security Policy
// ============================================================

/// Admission policy for tool calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityPolicy {
    /// Servers a sandbox may call at all.
    #[serde(default)]
    pub allowed_servers: BTreeSet<String>,
    /// Per-server tool allow-list. A server with no entry denies every tool.
    #[serde(default)]
    pub allowed_tools: BTreeMap<String, ToolAllowance>,
    /// Per-server rate limits; the `default` entry covers unlisted servers.
    #[serde(default)]
    pub rate_limits: BTreeMap<String, RateLimitConfig>,
    /// Payload size and sanitization rules.
    #[serde(default)]
    pub payload: PayloadPolicy,
    /// Server classification driving runtime-permission checks.
    #[serde(default)]
    pub classifications: BTreeMap<String, ServerClass>,
    /// Whether admissions and outcomes are recorded to the audit ring.
    #[serde(default = "default_true")]
    pub audit_enabled: bool,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            allowed_servers: BTreeSet::new(),
            allowed_tools: BTreeMap::new(),
            rate_limits: BTreeMap::new(),
            payload: PayloadPolicy::default(),
            classifications: BTreeMap::new(),
            audit_enabled: true,
        }
    }
}

impl SecurityPolicy {
    /// Effective rate limits for a server: its own entry, the `default`
    /// entry, or the built-in defaults, in that order.
    pub fn effective_limits(&self, server: &str) -> RateLimitConfig {
        self.rate_limits
            .get(server)
            .or_else(|| self.rate_limits.get(DEFAULT_RATE_LIMIT_KEY))
            .copied()
            .unwrap_or_default()
    }
}

/// Tool allow-list entry for one server: either the wildcard `"*"` or an
/// explicit set of tool names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolAllowance {
    /// `"*"` — every tool the server exposes is permitted.
    Wildcard(String),
    /// Only the listed tools are permitted.
    Tools(BTreeSet<String>),
}

impl ToolAllowance {
    /// Whether the allowance permits the named tool.
    pub fn permits(&self, tool: &str) -> bool {
        match self {
            ToolAllowance::Wildcard(w) => w == "*",
            ToolAllowance::Tools(tools) => tools.contains(tool),
        }
    }
}

/// Rate limits applied to one server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Calls admitted per sliding 60-second window.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    /// Calls that may be in flight at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

/// Payload validation rules.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PayloadPolicy {
    /// Maximum serialized parameter size in bytes.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    /// Whether string leaves are scanned for script-injection constructs.
    #[serde(default = "default_true")]
    pub sanitize_strings: bool,
}

impl Default for PayloadPolicy {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
            sanitize_strings: true,
        }
    }
}

/// Static classification of a server for runtime-permission checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerClass {
    /// Reaches third-party APIs; callers need a network grant.
    ExternalNetwork,
    /// Operates on the local workspace; file tools need a filesystem grant.
    LocalFile,
}

// ============================================================
// Caller Identity
// ============================================================

/// Identity and grants of the sandbox invoking the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerContext {
    /// Which runtime the call originates from (e.g. `"python"`, `"javascript"`).
    pub runtime_tag: String,
    /// The runtime's granted capabilities.
    #[serde(default)]
    pub permissions: RuntimePermissions,
}

impl CallerContext {
    /// A caller with the given tag and grants.
    pub fn new(runtime_tag: impl Into<String>, permissions: RuntimePermissions) -> Self {
        Self {
            runtime_tag: runtime_tag.into(),
            permissions,
        }
    }
}

/// Capabilities granted to a sandbox runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimePermissions {
    /// Network grants.
    #[serde(default)]
    pub network: NetworkPermissions,
    /// Filesystem grants.
    #[serde(default)]
    pub fs: FsPermissions,
}

/// Hosts the runtime may reach.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkPermissions {
    /// Empty means no network access.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
}

/// Paths the runtime may read or write.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FsPermissions {
    /// Readable path prefixes.
    #[serde(default)]
    pub read: Vec<String>,
    /// Writable path prefixes.
    #[serde(default)]
    pub write: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_requests_per_minute() -> u32 {
    60
}

fn default_max_concurrent() -> u32 {
    8
}

fn default_max_bytes() -> usize {
    256 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowance_parses_wildcard_and_list_forms() {
        let policy: SecurityPolicy = serde_yaml::from_str(
            r#"
allowed_servers: [memory, helpscout]
allowed_tools:
  memory: "*"
  helpscout:
    - search_conversations
    - search_inboxes
"#,
        )
        .unwrap();

        assert!(policy.allowed_tools["memory"].permits("anything"));
        assert!(policy.allowed_tools["helpscout"].permits("search_inboxes"));
        assert!(!policy.allowed_tools["helpscout"].permits("delete_inbox"));
    }

    #[test]
    fn effective_limits_fall_back_to_default_entry() {
        let policy: SecurityPolicy = serde_yaml::from_str(
            r#"
rate_limits:
  default:
    requests_per_minute: 10
    max_concurrent: 2
  memory:
    requests_per_minute: 120
    max_concurrent: 16
"#,
        )
        .unwrap();

        assert_eq!(policy.effective_limits("memory").requests_per_minute, 120);
        assert_eq!(policy.effective_limits("wordpress").requests_per_minute, 10);
        assert_eq!(policy.effective_limits("wordpress").max_concurrent, 2);
    }

    #[test]
    fn built_in_limits_apply_without_any_entries() {
        let policy = SecurityPolicy::default();
        let limits = policy.effective_limits("memory");
        assert_eq!(limits.requests_per_minute, 60);
        assert_eq!(limits.max_concurrent, 8);
        assert!(policy.audit_enabled);
    }

    #[test]
    fn classifications_parse_snake_case() {
        let policy: SecurityPolicy = serde_yaml::from_str(
            r#"
classifications:
  helpscout: external_network
  workspace: local_file
"#,
        )
        .unwrap();
        assert_eq!(
            policy.classifications["helpscout"],
            ServerClass::ExternalNetwork
        );
        assert_eq!(policy.classifications["workspace"], ServerClass::LocalFile);
    }
}
