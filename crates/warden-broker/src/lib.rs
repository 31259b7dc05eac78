/// The Warden tool broker.
///
/// Owns the life-cycle of external tool-server subprocesses, multiplexes
/// concurrent JSON-RPC calls over each server's byte stream, enforces the
/// security policy, audits every call, and degrades to synthetic replies
/// when a server is unavailable:
/// - **Registry**: server startup, readiness, teardown
/// - **Transports**: newline-framed stdio subprocesses and HTTP endpoints
/// - **Handshake**: initialize/initialized exchange and tool discovery
/// - **Dispatcher**: the `invoke` entry point the sandboxes call
/// - **Argument mapping**: positional sandbox calls onto named parameters
pub mod argmap;
pub mod dispatch;
pub mod handshake;
pub mod registry;
pub mod transport_http;
pub mod transport_stdio;

pub use dispatch::ToolBroker;
