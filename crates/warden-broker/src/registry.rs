//! Server registry.
//!
//! Owns the authoritative `server_name → ServerInstance` map: brings every
//! configured server up concurrently at initialization, exposes readiness
//! and cached tool schemas, and tears everything down on cleanup. Reader
//! tasks never hold registry references — they live inside their transport
//! and the registry reaches them only through the transport handle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use warden_types::config::{BrokerSettings, ServerConfig, TransportConfig};
use warden_types::errors::BrokerError;
use warden_types::protocol::ToolSchema;
use warden_types::traits::ToolTransport;

use crate::handshake;
use crate::transport_http::HttpTransport;
use crate::transport_stdio::StdioTransport;

// ============================================================
// Request Ids
// ============================================================

/// Monotonic request-id source, one per broker instance.
///
/// Every driver of a broker draws from the same counter, so ids are unique
/// across servers for the life of the broker. Carried by handle, never
/// ambient.
#[derive(Debug, Clone, Default)]
pub struct RequestIds(Arc<AtomicU64>);

impl RequestIds {
    /// A fresh counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// The next id, formatted for the wire.
    pub fn next(&self) -> String {
        format!("w-{}", self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

// ============================================================
// Server Instances
// ============================================================

/// Lifecycle of one managed server.
///
/// ```text
/// starting → ready → error
///                  ↘ stopped
/// ```
///
/// `error` and `stopped` are terminal; the broker never restarts a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    /// Transport starting or handshake in progress.
    Starting,
    /// Handshake complete; calls flow.
    Ready,
    /// Startup failed or the child died.
    Error,
    /// Shut down by the broker.
    Stopped,
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerStatus::Starting => write!(f, "starting"),
            ServerStatus::Ready => write!(f, "ready"),
            ServerStatus::Error => write!(f, "error"),
            ServerStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Runtime state for one server, owned exclusively by the registry.
pub struct ServerInstance {
    /// Static description the server was started from.
    pub config: ServerConfig,
    /// Lifecycle state.
    pub status: ServerStatus,
    /// Live transport; absent when startup never produced one.
    pub transport: Option<Arc<dyn ToolTransport>>,
    /// Cached tool schemas from discovery.
    pub tools: HashMap<String, ToolSchema>,
    /// Last time the server answered a call.
    pub last_heartbeat: Option<DateTime<Utc>>,
}

// ============================================================
// ServerRegistry
// ============================================================

/// The registry of managed tool servers.
pub struct ServerRegistry {
    servers: RwLock<HashMap<String, ServerInstance>>,
    settings: BrokerSettings,
    ids: RequestIds,
    initialized: AtomicBool,
}

impl ServerRegistry {
    /// An empty registry with the given settings.
    pub fn new(settings: BrokerSettings) -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
            settings,
            ids: RequestIds::new(),
            initialized: AtomicBool::new(false),
        }
    }

    /// The broker-wide request-id source.
    pub fn request_ids(&self) -> RequestIds {
        self.ids.clone()
    }

    /// Bring every configured server up, concurrently.
    ///
    /// With `fallback_to_mock` a per-server startup failure is isolated:
    /// the server lands in `error` and initialization continues. Without
    /// it, the first failure aborts initialization and tears down whatever
    /// already started. A second call is a no-op.
    pub async fn initialize(&self, configs: Vec<ServerConfig>) -> Result<(), BrokerError> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            debug!("registry already initialized, ignoring");
            return Ok(());
        }

        let mut startups = JoinSet::new();
        for config in configs {
            let settings = self.settings.clone();
            let ids = self.ids.clone();
            startups.spawn(async move {
                let name = config.name.clone();
                let outcome = start_server(&config, &settings, &ids).await;
                (name, config, outcome)
            });
        }

        while let Some(joined) = startups.join_next().await {
            let (name, config, outcome) = joined
                .map_err(|e| BrokerError::Transport(format!("startup task failed: {e}")))?;
            match outcome {
                Ok((transport, tools)) => {
                    info!(server = %name, tool_count = tools.len(), "server ready");
                    self.servers.write().await.insert(
                        name.clone(),
                        ServerInstance {
                            config,
                            status: ServerStatus::Ready,
                            transport: Some(transport),
                            tools,
                            last_heartbeat: Some(Utc::now()),
                        },
                    );
                }
                Err(err) if self.settings.fallback_to_mock => {
                    warn!(server = %name, error = %err, "server failed to start, staying in error");
                    self.servers.write().await.insert(
                        name.clone(),
                        ServerInstance {
                            config,
                            status: ServerStatus::Error,
                            transport: None,
                            tools: HashMap::new(),
                            last_heartbeat: None,
                        },
                    );
                }
                Err(err) => {
                    startups.abort_all();
                    self.cleanup().await;
                    self.initialized.store(false, Ordering::SeqCst);
                    return Err(err);
                }
            }
        }

        Ok(())
    }

    /// Adopt an externally-established transport as a ready server.
    ///
    /// For hosts that already own a server's pipes (and for tests); the
    /// adopted instance behaves exactly like a spawned one.
    pub async fn adopt(
        &self,
        config: ServerConfig,
        transport: Arc<dyn ToolTransport>,
        tools: HashMap<String, ToolSchema>,
    ) {
        let name = config.name.clone();
        info!(server = %name, "adopting external transport");
        self.servers.write().await.insert(
            name,
            ServerInstance {
                config,
                status: ServerStatus::Ready,
                transport: Some(transport),
                tools,
                last_heartbeat: Some(Utc::now()),
            },
        );
    }

    /// Whether a server can take calls right now.
    pub async fn is_ready(&self, name: &str) -> bool {
        let servers = self.servers.read().await;
        match servers.get(name) {
            Some(instance) => {
                instance.status == ServerStatus::Ready
                    && instance
                        .transport
                        .as_ref()
                        .map(|t| t.is_connected())
                        .unwrap_or(false)
            }
            None => false,
        }
    }

    /// Current lifecycle state of a server.
    pub async fn status(&self, name: &str) -> Option<ServerStatus> {
        self.servers.read().await.get(name).map(|i| i.status)
    }

    /// Cached tool schemas for a server.
    pub async fn tools(&self, name: &str) -> Option<HashMap<String, ToolSchema>> {
        self.servers.read().await.get(name).map(|i| i.tools.clone())
    }

    /// Names of every managed server.
    pub async fn server_names(&self) -> Vec<String> {
        self.servers.read().await.keys().cloned().collect()
    }

    /// The transport for a server, provided it is ready.
    pub async fn transport_if_ready(
        &self,
        name: &str,
    ) -> Result<Arc<dyn ToolTransport>, BrokerError> {
        let servers = self.servers.read().await;
        let instance = servers
            .get(name)
            .ok_or_else(|| BrokerError::ServerUnavailable(name.to_string()))?;
        if instance.status != ServerStatus::Ready {
            return Err(BrokerError::ServerUnavailable(name.to_string()));
        }
        match &instance.transport {
            Some(transport) if transport.is_connected() => Ok(transport.clone()),
            _ => Err(BrokerError::ServerUnavailable(name.to_string())),
        }
    }

    /// Record that a server answered a call.
    pub async fn record_heartbeat(&self, name: &str) {
        if let Some(instance) = self.servers.write().await.get_mut(name) {
            instance.last_heartbeat = Some(Utc::now());
        }
    }

    /// Move a server to the terminal `error` state.
    pub async fn mark_error(&self, name: &str) {
        if let Some(instance) = self.servers.write().await.get_mut(name) {
            if instance.status != ServerStatus::Error {
                warn!(server = %name, "server marked as failed");
                instance.status = ServerStatus::Error;
            }
        }
    }

    /// Tear every server down.
    ///
    /// Outstanding calls fail with `ServerClosed`; each transport closes its
    /// child's stdin and escalates to a kill after the grace period, so
    /// cleanup completes even when a child refuses to exit. The registry is
    /// reusable (a later `initialize` starts fresh).
    pub async fn cleanup(&self) {
        let drained: Vec<(String, ServerInstance)> = {
            let mut servers = self.servers.write().await;
            servers.drain().collect()
        };
        for (name, mut instance) in drained {
            instance.status = ServerStatus::Stopped;
            if let Some(transport) = instance.transport.take() {
                if let Err(err) = transport.close().await {
                    warn!(server = %name, error = %err, "transport close failed");
                }
            }
            info!(server = %name, "server removed");
        }
        self.initialized.store(false, Ordering::SeqCst);
    }
}

/// Start one server: transport, handshake, discovery.
async fn start_server(
    config: &ServerConfig,
    settings: &BrokerSettings,
    ids: &RequestIds,
) -> Result<(Arc<dyn ToolTransport>, HashMap<String, ToolSchema>), BrokerError> {
    let name = config.name.as_str();
    let connection_timeout = settings.connection_timeout();

    let (transport, settle): (Arc<dyn ToolTransport>, _) = match &config.transport {
        TransportConfig::Stdio { command, args, env } => {
            let transport = StdioTransport::spawn(
                name,
                command,
                args,
                env.clone(),
                settings.shutdown_grace(),
                None,
            )?;
            let transport: Arc<dyn ToolTransport> = Arc::new(transport);

            // Only a completed handshake moves the server past `starting`.
            if let Err(err) =
                handshake::initialize_server(name, transport.as_ref(), ids, connection_timeout)
                    .await
            {
                let _ = transport.close().await;
                return Err(err);
            }
            (transport, settings.settle_delay())
        }
        TransportConfig::Http { base_url } => {
            // HTTP servers are assumed to be listening already; there is no
            // handshake gate, so no settle delay either.
            let transport = HttpTransport::new(name, base_url, connection_timeout)?;
            (Arc::new(transport), std::time::Duration::ZERO)
        }
    };

    // Discovery failure is non-fatal: the server stays ready, calls just
    // fall through the generic argument mapping.
    let tools = match handshake::discover_tools(
        name,
        transport.as_ref(),
        ids,
        settle,
        connection_timeout,
    )
    .await
    {
        Ok(tools) => tools,
        Err(err) => {
            warn!(server = %name, error = %err, "tool discovery failed, continuing without schemas");
            HashMap::new()
        }
    };

    Ok((transport, tools))
}
