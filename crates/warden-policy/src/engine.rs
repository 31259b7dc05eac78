//! Policy engine — ordered admission checks for every brokered call.
//!
//! Pipeline: server allow-list → tool allow-list → runtime grants → rate
//! window → concurrency → payload size → sanitization. Evaluation stops at
//! the first denial. The rate window is consumed during evaluation; the
//! concurrency counter moves only through [`PolicyEngine::request_begin`] /
//! [`PolicyEngine::request_end`], which the dispatcher brackets around the
//! actual call.

use serde_json::Value;
use tracing::warn;

use warden_types::policy::{CallerContext, SecurityPolicy, ServerClass};

use crate::rate_limit::{RateDenial, RateLimiter};
use crate::sanitize::Sanitizer;

/// Outcome of policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// The call may proceed.
    Allow,
    /// The call is refused.
    Deny(DenialReason),
}

/// Why the policy engine refused a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    /// Server is not on the allow-list.
    ServerNotAllowed(String),
    /// Tool is not permitted on this server.
    ToolNotAllowed {
        /// Target server.
        server: String,
        /// Refused tool.
        tool: String,
    },
    /// External-network server, but the caller holds no network grant.
    NetworkGrantMissing(String),
    /// Local-file server and file-touching tool, but no filesystem grant.
    FileGrantMissing {
        /// Refused tool.
        tool: String,
    },
    /// The per-minute window is exhausted.
    RateExceeded {
        /// Target server.
        server: String,
        /// Configured requests-per-minute limit.
        limit: u32,
    },
    /// The concurrency cap is saturated.
    ConcurrencyExceeded {
        /// Target server.
        server: String,
        /// Configured concurrency cap.
        limit: u32,
    },
    /// Serialized parameters exceed the payload budget.
    PayloadTooLarge {
        /// Serialized size in bytes.
        actual: usize,
        /// Configured maximum in bytes.
        limit: usize,
    },
    /// Sanitization changed the parameters — they carried unsafe content.
    UnsafeContent,
}

impl DenialReason {
    /// Whether this denial belongs to the rate-limit family.
    pub fn is_rate(&self) -> bool {
        matches!(
            self,
            DenialReason::RateExceeded { .. } | DenialReason::ConcurrencyExceeded { .. }
        )
    }

    /// Human-readable denial message, surfaced to callers and the audit log.
    pub fn message(&self) -> String {
        match self {
            DenialReason::ServerNotAllowed(server) => {
                format!("server '{server}' is not on the allow-list")
            }
            DenialReason::ToolNotAllowed { server, tool } => {
                format!("tool '{tool}' is not permitted on server '{server}'")
            }
            DenialReason::NetworkGrantMissing(server) => format!(
                "server '{server}' reaches external networks and the caller has no network grant"
            ),
            DenialReason::FileGrantMissing { tool } => {
                format!("tool '{tool}' touches files and the caller has no filesystem grant")
            }
            DenialReason::RateExceeded { server, limit } => {
                format!("rate exceeded for server '{server}' ({limit}/minute)")
            }
            DenialReason::ConcurrencyExceeded { server, limit } => {
                format!("too many concurrent calls to server '{server}' (cap {limit})")
            }
            DenialReason::PayloadTooLarge { actual, limit } => {
                format!("payload of {actual} bytes exceeds the {limit}-byte limit")
            }
            DenialReason::UnsafeContent => "unsafe content".to_string(),
        }
    }
}

/// The policy engine: static policy plus runtime rate state.
pub struct PolicyEngine {
    policy: SecurityPolicy,
    limiter: RateLimiter,
    sanitizer: Sanitizer,
}

impl PolicyEngine {
    /// Build an engine for the given policy.
    pub fn new(policy: SecurityPolicy) -> Self {
        Self {
            policy,
            limiter: RateLimiter::new(),
            sanitizer: Sanitizer::new(),
        }
    }

    /// The static policy this engine enforces.
    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// Run the ordered checks for one call. Stops at the first denial.
    pub fn evaluate(
        &self,
        caller: &CallerContext,
        server: &str,
        tool: &str,
        params: &Value,
    ) -> PolicyDecision {
        // 1. Server allow-list.
        if !self.policy.allowed_servers.contains(server) {
            return self.deny(server, tool, DenialReason::ServerNotAllowed(server.to_string()));
        }

        // 2. Tool allow-list. A server with no entry permits nothing.
        let permitted = self
            .policy
            .allowed_tools
            .get(server)
            .map(|allowance| allowance.permits(tool))
            .unwrap_or(false);
        if !permitted {
            return self.deny(
                server,
                tool,
                DenialReason::ToolNotAllowed {
                    server: server.to_string(),
                    tool: tool.to_string(),
                },
            );
        }

        // 3. Runtime grants, per the server's classification.
        match self.policy.classifications.get(server) {
            Some(ServerClass::ExternalNetwork) => {
                if caller.permissions.network.allowed_hosts.is_empty() {
                    return self.deny(
                        server,
                        tool,
                        DenialReason::NetworkGrantMissing(server.to_string()),
                    );
                }
            }
            Some(ServerClass::LocalFile) => {
                if tool_touches_files(tool)
                    && caller.permissions.fs.read.is_empty()
                    && caller.permissions.fs.write.is_empty()
                {
                    return self.deny(
                        server,
                        tool,
                        DenialReason::FileGrantMissing {
                            tool: tool.to_string(),
                        },
                    );
                }
            }
            None => {}
        }

        // 4. Rate window, then concurrency. The window increment happens
        // even when the outcome is a denial.
        let limits = self.policy.effective_limits(server);
        if let Err(denial) = self.limiter.admit(server, limits) {
            let reason = match denial {
                RateDenial::WindowExceeded { limit } => DenialReason::RateExceeded {
                    server: server.to_string(),
                    limit,
                },
                RateDenial::ConcurrencyExceeded { limit } => DenialReason::ConcurrencyExceeded {
                    server: server.to_string(),
                    limit,
                },
            };
            return self.deny(server, tool, reason);
        }

        // 5. Payload validation.
        let encoded = match serde_json::to_vec(params) {
            Ok(bytes) => bytes,
            Err(_) => return self.deny(server, tool, DenialReason::UnsafeContent),
        };
        if encoded.len() > self.policy.payload.max_bytes {
            return self.deny(
                server,
                tool,
                DenialReason::PayloadTooLarge {
                    actual: encoded.len(),
                    limit: self.policy.payload.max_bytes,
                },
            );
        }
        if self.policy.payload.sanitize_strings {
            let (_, changed) = self.sanitizer.sanitize_value(params);
            if changed {
                return self.deny(server, tool, DenialReason::UnsafeContent);
            }
        }

        PolicyDecision::Allow
    }

    /// Count one call as in flight.
    pub fn request_begin(&self, server: &str) {
        self.limiter.begin(server);
    }

    /// Count one call as finished. Never drops below zero.
    pub fn request_end(&self, server: &str) {
        self.limiter.end(server);
    }

    /// Current in-flight count for a server.
    pub fn concurrent(&self, server: &str) -> u32 {
        self.limiter.concurrent(server)
    }

    fn deny(&self, server: &str, tool: &str, reason: DenialReason) -> PolicyDecision {
        warn!(
            server = %server,
            tool = %tool,
            reason = %reason.message(),
            "policy denied tool call"
        );
        PolicyDecision::Deny(reason)
    }
}

/// Whether a tool name suggests filesystem access.
fn tool_touches_files(tool: &str) -> bool {
    let lowered = tool.to_ascii_lowercase();
    lowered.contains("file") || lowered.contains("read") || lowered.contains("write")
}
