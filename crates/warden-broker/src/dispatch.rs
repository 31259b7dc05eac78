//! Call dispatcher — the broker's single public entry point.
//!
//! `invoke` runs the full admission-and-dispatch sequence: resolve the
//! server, ask the policy engine, account concurrency, frame the request,
//! enforce the deadline, extract the reply, audit the outcome. When a
//! server is gone and `fallback_to_mock` is set, unavailable/exited/closed
//! failures degrade into [`MockReply`]s; denials and timeouts always
//! surface.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use warden_policy::audit::AuditRing;
use warden_policy::engine::{PolicyDecision, PolicyEngine};
use warden_policy::redact::redact_params;
use warden_types::audit::{AuditEntry, AuditOutcome, MockReply};
use warden_types::config::{BrokerConfig, BrokerSettings};
use warden_types::errors::BrokerError;
use warden_types::policy::CallerContext;
use warden_types::protocol::JsonRpcMessage;

use crate::argmap::map_positional_args;
use crate::registry::{RequestIds, ServerRegistry};

/// Decrements the concurrency counter on every exit path, panics included.
struct ConcurrencyGuard<'a> {
    policy: &'a PolicyEngine,
    server: &'a str,
}

impl<'a> ConcurrencyGuard<'a> {
    fn begin(policy: &'a PolicyEngine, server: &'a str) -> Self {
        policy.request_begin(server);
        Self { policy, server }
    }
}

impl Drop for ConcurrencyGuard<'_> {
    fn drop(&mut self) {
        self.policy.request_end(self.server);
    }
}

// ============================================================
// ToolBroker
// ============================================================

/// The tool broker: registry + policy + audit behind one call interface.
///
/// Execution sandboxes talk only to this type. The audit ring and the
/// request-id counter live here — created with the broker, cleared by
/// [`ToolBroker::shutdown`], never ambient.
pub struct ToolBroker {
    registry: Arc<ServerRegistry>,
    policy: PolicyEngine,
    audit: AuditRing,
    settings: BrokerSettings,
    ids: RequestIds,
}

impl ToolBroker {
    /// Start every configured server and return the broker.
    pub async fn start(config: BrokerConfig) -> Result<Self, BrokerError> {
        let registry = Arc::new(ServerRegistry::new(config.settings.clone()));
        registry.initialize(config.server_configs()).await?;
        let ids = registry.request_ids();
        Ok(Self {
            registry,
            policy: PolicyEngine::new(config.security),
            audit: AuditRing::default(),
            settings: config.settings,
            ids,
        })
    }

    /// The server registry, for readiness checks and schema introspection.
    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    /// The most recent `n` audit entries, oldest first.
    pub fn audit_recent(&self, n: usize) -> Vec<AuditEntry> {
        self.audit.recent(n)
    }

    /// In-flight call count for one server.
    pub fn concurrent_calls(&self, server: &str) -> u32 {
        self.policy.concurrent(server)
    }

    /// Tear everything down: cancel in-flight calls, stop children, clear
    /// the audit ring.
    pub async fn shutdown(&self) {
        info!("broker shutting down");
        self.registry.cleanup().await;
        self.audit.clear();
    }

    /// Invoke `tool` on `server` with named parameters.
    ///
    /// `deadline` defaults to the configured per-call deadline. Returns the
    /// extracted reply payload: text content blocks are concatenated, any
    /// other `result` comes back verbatim.
    pub async fn invoke(
        &self,
        caller: &CallerContext,
        server: &str,
        tool: &str,
        params: Value,
        deadline: Option<Duration>,
    ) -> Result<Value, BrokerError> {
        let started = Instant::now();
        let deadline = deadline.unwrap_or_else(|| self.settings.default_deadline());

        // 1. Resolve the server. An unavailable server short-circuits to
        // the degradation path before policy runs.
        let transport = match self.registry.transport_if_ready(server).await {
            Ok(transport) => transport,
            Err(err) => return self.degrade_or_fail(caller, server, tool, &params, err, started),
        };

        // 2. Policy. Denials are always surfaced, never mocked.
        if let PolicyDecision::Deny(reason) = self.policy.evaluate(caller, server, tool, &params) {
            let message = reason.message();
            self.record(caller, server, tool, &params, AuditOutcome::Denied, Some(message.clone()), None);
            return Err(if reason.is_rate() {
                BrokerError::RateLimited(message)
            } else {
                BrokerError::AccessDenied(message)
            });
        }

        // 3–7. Concurrency is held for the whole dispatch; the guard
        // releases it on every exit path.
        let _guard = ConcurrencyGuard::begin(&self.policy, server);

        let request_id = self.ids.next();
        let request = JsonRpcMessage::request(
            request_id.as_str(),
            "tools/call",
            json!({ "name": tool, "arguments": params.clone() }),
        );
        debug!(server = %server, tool = %tool, id = %request_id, "dispatching tool call");

        let outcome = tokio::time::timeout(deadline, transport.request(request)).await;
        let result = match outcome {
            // Timer fired first; the dropped future already freed the
            // pending slot, so the late reply will find nothing.
            Err(_) => Err(BrokerError::Timeout {
                server: server.to_string(),
                tool: tool.to_string(),
            }),
            Ok(Err(err)) => Err(err),
            Ok(Ok(reply)) => match reply.error {
                Some(error) => Err(BrokerError::Remote {
                    code: error.code,
                    message: error.message,
                }),
                None => Ok(extract_result(reply.result.unwrap_or(Value::Null))),
            },
        };

        match result {
            Ok(value) => {
                self.registry.record_heartbeat(server).await;
                self.record(
                    caller,
                    server,
                    tool,
                    &params,
                    AuditOutcome::Success,
                    None,
                    Some(started.elapsed()),
                );
                Ok(value)
            }
            Err(err) => {
                if matches!(err, BrokerError::ServerExited(_)) {
                    self.registry.mark_error(server).await;
                }
                self.degrade_or_fail(caller, server, tool, &params, err, started)
            }
        }
    }

    /// Invoke with a positional argument vector from a sandbox binding.
    pub async fn call_positional(
        &self,
        caller: &CallerContext,
        server: &str,
        tool: &str,
        args: Vec<Value>,
    ) -> Result<Value, BrokerError> {
        let params = map_positional_args(tool, args);
        self.invoke(caller, server, tool, params, None).await
    }

    /// Convert degradable failures into mock replies; surface the rest.
    ///
    /// Exactly one audit entry is written either way, so the
    /// one-entry-per-invoke property holds on this path too.
    fn degrade_or_fail(
        &self,
        caller: &CallerContext,
        server: &str,
        tool: &str,
        params: &Value,
        err: BrokerError,
        started: Instant,
    ) -> Result<Value, BrokerError> {
        let degradable = matches!(
            err,
            BrokerError::ServerUnavailable(_)
                | BrokerError::ServerExited(_)
                | BrokerError::ServerClosed
        );
        if degradable && self.settings.fallback_to_mock {
            warn!(server = %server, tool = %tool, error = %err, "degrading to mock reply");
            self.record(
                caller,
                server,
                tool,
                params,
                AuditOutcome::Success,
                Some(format!("mock reply substituted: {err}")),
                Some(started.elapsed()),
            );
            return Ok(MockReply::new(server, tool, params.clone()).into_value());
        }

        self.record(
            caller,
            server,
            tool,
            params,
            AuditOutcome::Error,
            Some(err.to_string()),
            Some(started.elapsed()),
        );
        Err(err)
    }

    /// Write one audit entry, with parameters redacted first.
    fn record(
        &self,
        caller: &CallerContext,
        server: &str,
        tool: &str,
        params: &Value,
        outcome: AuditOutcome,
        reason: Option<String>,
        duration: Option<Duration>,
    ) {
        if !self.policy.policy().audit_enabled {
            return;
        }
        self.audit.record(AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            runtime_tag: caller.runtime_tag.clone(),
            server: server.to_string(),
            tool: tool.to_string(),
            params: redact_params(params),
            outcome,
            reason,
            duration_ms: duration.map(|d| d.as_millis() as u64),
        });
    }
}

/// Extract the caller-facing payload from a `tools/call` result.
///
/// A structured `content` array of text blocks concatenates into one
/// string; anything else is returned verbatim.
fn extract_result(result: Value) -> Value {
    if let Some(content) = result.get("content").and_then(|c| c.as_array()) {
        let texts: Vec<&str> = content
            .iter()
            .filter(|block| block.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|block| block.get("text").and_then(|t| t.as_str()))
            .collect();
        if !texts.is_empty() {
            return Value::String(texts.concat());
        }
    }
    result
}
