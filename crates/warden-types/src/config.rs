/// Broker configuration: the server map plus broker-wide tunables.
///
/// Loaded from a host-provided YAML document. The broker parses only this
/// schema; how the host finds the document (file, env, inline) is not its
/// concern.
use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::BrokerError;
use crate::policy::SecurityPolicy;

// ============================================================
// Server Configuration
// ============================================================

/// Transport description for one tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Child process speaking newline-framed JSON-RPC on stdin/stdout.
    Stdio {
        /// Executable to spawn.
        command: String,
        /// Arguments passed to the executable.
        #[serde(default)]
        args: Vec<String>,
        /// Environment merged onto the broker's own environment.
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    /// Already-listening HTTP server; one POST per JSON-RPC request.
    Http {
        /// Base URL of the server.
        #[serde(rename = "baseUrl")]
        base_url: String,
    },
}

/// Static description of one tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unique server name.
    pub name: String,
    /// How to reach the server.
    #[serde(flatten)]
    pub transport: TransportConfig,
}

// ============================================================
// Broker Settings
// ============================================================

/// Broker-wide tunables, all with serde defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSettings {
    /// Convert unavailable/exited/closed failures into mock replies.
    #[serde(default = "default_true")]
    pub fallback_to_mock: bool,
    /// Bound on server startup and the initialize handshake.
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
    /// Delay between the handshake and `tools/list`, for servers that
    /// populate their tool registry asynchronously.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Deadline applied when the caller does not supply one.
    #[serde(default = "default_deadline_secs")]
    pub default_deadline_secs: u64,
    /// How long cleanup waits for a child to exit before killing it.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            fallback_to_mock: true,
            connection_timeout_secs: default_connection_timeout_secs(),
            settle_delay_ms: default_settle_delay_ms(),
            default_deadline_secs: default_deadline_secs(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl BrokerSettings {
    /// Startup/handshake bound as a `Duration`.
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Settle delay as a `Duration`.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Default call deadline as a `Duration`.
    pub fn default_deadline(&self) -> Duration {
        Duration::from_secs(self.default_deadline_secs)
    }

    /// Shutdown grace period as a `Duration`.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

// ============================================================
// Top-Level Config
// ============================================================

/// The full broker configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Tool servers keyed by name.
    #[serde(default)]
    pub servers: BTreeMap<String, TransportConfig>,
    /// Admission policy.
    #[serde(default)]
    pub security: SecurityPolicy,
    /// Broker-wide tunables.
    #[serde(default)]
    pub settings: BrokerSettings,
}

impl BrokerConfig {
    /// Parse a configuration document from YAML.
    pub fn from_yaml(text: &str) -> Result<Self, BrokerError> {
        let config: BrokerConfig = serde_yaml::from_str(text)?;
        Ok(config)
    }

    /// The server map flattened into named configs for the registry.
    pub fn server_configs(&self) -> Vec<ServerConfig> {
        self.servers
            .iter()
            .map(|(name, transport)| ServerConfig {
                name: name.clone(),
                transport: transport.clone(),
            })
            .collect()
    }
}

fn default_true() -> bool {
    true
}

fn default_connection_timeout_secs() -> u64 {
    10
}

fn default_settle_delay_ms() -> u64 {
    1000
}

fn default_deadline_secs() -> u64 {
    30
}

fn default_shutdown_grace_ms() -> u64 {
    2000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stdio_and_http_servers() {
        let config = BrokerConfig::from_yaml(
            r#"
servers:
  memory:
    transport: stdio
    command: automem-server
    args: ["--stdio"]
    env:
      AUTOMEM_DB: /tmp/automem
  helpscout:
    transport: http
    baseUrl: http://localhost:9005
"#,
        )
        .unwrap();

        let configs = config.server_configs();
        assert_eq!(configs.len(), 2);

        match &config.servers["memory"] {
            TransportConfig::Stdio { command, args, env } => {
                assert_eq!(command, "automem-server");
                assert_eq!(args, &vec!["--stdio".to_string()]);
                assert_eq!(env["AUTOMEM_DB"], "/tmp/automem");
            }
            other => panic!("expected stdio transport, got {other:?}"),
        }
        match &config.servers["helpscout"] {
            TransportConfig::Http { base_url } => {
                assert_eq!(base_url, "http://localhost:9005");
            }
            other => panic!("expected http transport, got {other:?}"),
        }
    }

    #[test]
    fn settings_default_when_absent() {
        let config = BrokerConfig::from_yaml("servers: {}").unwrap();
        assert!(config.settings.fallback_to_mock);
        assert_eq!(config.settings.connection_timeout(), Duration::from_secs(10));
        assert_eq!(config.settings.settle_delay(), Duration::from_millis(1000));
        assert_eq!(config.settings.default_deadline(), Duration::from_secs(30));
    }

    #[test]
    fn invalid_transport_tag_is_rejected() {
        let result = BrokerConfig::from_yaml(
            r#"
servers:
  bad:
    transport: carrier-pigeon
"#,
        );
        assert!(matches!(result, Err(BrokerError::Serialization(_))));
    }
}
