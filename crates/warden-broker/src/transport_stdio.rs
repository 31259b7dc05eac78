//! Stdio transport driver.
//!
//! Owns one tool-server child process and multiplexes concurrent JSON-RPC
//! calls over its single stdin/stdout pair:
//! - one writer mutex serializes outbound frames (JSON + `\n`, one write)
//! - one reader task splits stdout on newlines and resolves the pending
//!   table entry whose id matches each response
//! - one stderr task captures diagnostics; stderr is never parsed as frames
//! - one monitor task observes child exit and fails outstanding calls
//!
//! A malformed frame is logged and dropped; the connection survives. A dead
//! child fails every outstanding call with `ServerExited` and the transport
//! stays down — restarting is not the broker's job.

use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use warden_types::errors::BrokerError;
use warden_types::protocol::JsonRpcMessage;
use warden_types::traits::ToolTransport;

/// How many recent stderr lines are retained for diagnostics.
const STDERR_TAIL_LINES: usize = 32;

type PendingSender = oneshot::Sender<Result<JsonRpcMessage, BrokerError>>;
type NotificationSender = mpsc::UnboundedSender<JsonRpcMessage>;

// ============================================================
// Shared State
// ============================================================

/// State shared between the transport handle and its background tasks.
///
/// The tasks hold only this `Arc`, never the transport itself, so dropping
/// the handle cannot deadlock against a running reader.
struct Shared {
    /// Server name, for log context.
    name: String,
    /// In-flight requests awaiting a matching response.
    pending: StdMutex<HashMap<String, PendingSender>>,
    /// False once the child exited or the transport closed.
    connected: AtomicBool,
    /// True once a broker-initiated close started.
    closing: AtomicBool,
    /// Exit code, once the child terminated. `Some(None)` means killed by
    /// signal.
    exit_code: StdMutex<Option<Option<i32>>>,
    /// Recent stderr lines.
    stderr_tail: StdMutex<VecDeque<String>>,
    /// Frames that failed to parse.
    malformed_frames: AtomicU64,
}

impl Shared {
    fn new(name: String) -> Self {
        Self {
            name,
            pending: StdMutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
            closing: AtomicBool::new(false),
            exit_code: StdMutex::new(None),
            stderr_tail: StdMutex::new(VecDeque::new()),
            malformed_frames: AtomicU64::new(0),
        }
    }

    /// Insert a pending slot. Ids are broker-generated and unique, so a
    /// collision is a protocol-level bug worth failing loudly.
    fn insert_pending(&self, id: String, tx: PendingSender) -> Result<(), BrokerError> {
        let mut pending = self.pending.lock().expect("pending table lock poisoned");
        if pending.contains_key(&id) {
            return Err(BrokerError::Protocol(format!(
                "duplicate in-flight request id '{id}'"
            )));
        }
        pending.insert(id, tx);
        Ok(())
    }

    /// Remove and return the slot for `id`, if any.
    fn take_pending(&self, id: &str) -> Option<PendingSender> {
        self.pending
            .lock()
            .expect("pending table lock poisoned")
            .remove(id)
    }

    /// Fail every outstanding call with an error from `make_err`.
    fn fail_all_pending(&self, make_err: impl Fn() -> BrokerError) {
        let drained: Vec<PendingSender> = {
            let mut pending = self.pending.lock().expect("pending table lock poisoned");
            pending.drain().map(|(_, tx)| tx).collect()
        };
        if !drained.is_empty() {
            warn!(
                server = %self.name,
                count = drained.len(),
                "failing outstanding calls"
            );
        }
        for tx in drained {
            let _ = tx.send(Err(make_err()));
        }
    }

    /// The error describing why this transport can no longer carry calls.
    fn terminal_error(&self) -> BrokerError {
        if self.closing.load(Ordering::SeqCst) {
            return BrokerError::ServerClosed;
        }
        let exit = self.exit_code.lock().expect("exit code lock poisoned");
        match *exit {
            Some(code) => BrokerError::ServerExited(code),
            None => BrokerError::Transport(format!("server '{}' is not connected", self.name)),
        }
    }

    /// Record child termination and fail whatever is still in flight.
    fn on_exit(&self, code: Option<i32>) {
        {
            let mut exit = self.exit_code.lock().expect("exit code lock poisoned");
            if exit.is_some() {
                return;
            }
            *exit = Some(code);
        }
        self.connected.store(false, Ordering::SeqCst);
        let closing = self.closing.load(Ordering::SeqCst);
        if closing {
            info!(server = %self.name, code = ?code, "server process exited after close");
        } else {
            let tail: Vec<String> = {
                let tail = self.stderr_tail.lock().expect("stderr tail lock poisoned");
                tail.iter().cloned().collect()
            };
            warn!(
                server = %self.name,
                code = ?code,
                stderr_tail = ?tail,
                "server process exited unexpectedly"
            );
        }
        self.fail_all_pending(|| {
            if closing {
                BrokerError::ServerClosed
            } else {
                BrokerError::ServerExited(code)
            }
        });
    }

    /// Route one inbound frame: response → pending table, notification →
    /// handler, anything else → log and drop.
    fn dispatch_frame(&self, frame: JsonRpcMessage, notifications: &Option<NotificationSender>) {
        if frame.is_response() {
            let Some(id) = frame.id_key() else {
                debug!(server = %self.name, "response frame with unusable id dropped");
                return;
            };
            match self.take_pending(&id) {
                Some(tx) => {
                    let _ = tx.send(Ok(frame));
                }
                None => {
                    debug!(server = %self.name, id = %id, "late reply dropped, no pending call");
                }
            }
        } else if frame.is_notification() {
            match notifications {
                Some(tx) => {
                    let _ = tx.send(frame);
                }
                None => {
                    debug!(
                        server = %self.name,
                        method = ?frame.method,
                        "server notification ignored"
                    );
                }
            }
        } else {
            // A server-initiated request; the broker serves none.
            debug!(
                server = %self.name,
                method = ?frame.method,
                "server-initiated request ignored"
            );
        }
    }
}

/// Removes a pending slot when the caller abandons the request (deadline
/// expiry drops the future) or the write fails. A slot already resolved by
/// the reader is gone by the time this fires, making the removal a no-op.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.shared.take_pending(self.id).is_some() {
            debug!(
                server = %self.shared.name,
                id = %self.id,
                "pending call abandoned before resolution"
            );
        }
    }
}

// ============================================================
// StdioTransport
// ============================================================

/// Newline-framed JSON-RPC over a child process's stdin/stdout.
pub struct StdioTransport {
    shared: Arc<Shared>,
    /// Child stdin (or a test stream). `None` once closed — dropping the
    /// handle is the graceful termination signal for the child.
    writer: Mutex<Option<Box<dyn AsyncWrite + Send + Unpin>>>,
    /// Wakes the monitor task to run the grace-then-kill sequence.
    shutdown: StdMutex<Option<oneshot::Sender<()>>>,
}

impl StdioTransport {
    /// Spawn the server process and start its background tasks.
    ///
    /// `env` is merged onto the broker's own environment. `grace` bounds
    /// how long close() lets the child exit on its own before it is killed.
    pub fn spawn(
        name: &str,
        command: &str,
        args: &[String],
        env: impl IntoIterator<Item = (String, String)>,
        grace: Duration,
        notifications: Option<NotificationSender>,
    ) -> Result<Self, BrokerError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            BrokerError::Transport(format!("failed to spawn '{command}' for '{name}': {e}"))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BrokerError::Transport("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BrokerError::Transport("child stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BrokerError::Transport("child stderr unavailable".to_string()))?;

        let shared = Arc::new(Shared::new(name.to_string()));
        info!(server = %name, command = %command, "server process spawned");

        tokio::spawn(read_frames(shared.clone(), stdout, notifications));
        tokio::spawn(pump_stderr(shared.clone(), stderr));

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(monitor_child(shared.clone(), child, shutdown_rx, grace));

        Ok(Self {
            shared,
            writer: Mutex::new(Some(Box::new(stdin))),
            shutdown: StdMutex::new(Some(shutdown_tx)),
        })
    }

    /// Build a transport over arbitrary byte streams instead of a child.
    ///
    /// There is no process to monitor, so exit semantics reduce to
    /// [`StdioTransport::close`]. Used by tests and by hosts that already
    /// own the server's pipes.
    pub fn from_streams(
        name: &str,
        writer: impl AsyncWrite + Send + Unpin + 'static,
        reader: impl AsyncRead + Send + Unpin + 'static,
        notifications: Option<NotificationSender>,
    ) -> Self {
        let shared = Arc::new(Shared::new(name.to_string()));
        tokio::spawn(read_frames(shared.clone(), reader, notifications));
        Self {
            shared,
            writer: Mutex::new(Some(Box::new(writer))),
            shutdown: StdMutex::new(None),
        }
    }

    /// Serialize and write one frame under the writer lock.
    ///
    /// Holding the lock for the whole `JSON + \n` write is what keeps
    /// concurrent calls from interleaving bytes on the child's stdin.
    async fn write_frame(&self, message: &JsonRpcMessage) -> Result<(), BrokerError> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return Err(self.shared.terminal_error());
        };
        stream
            .write_all(&line)
            .await
            .map_err(|e| self.write_error(e))?;
        stream.flush().await.map_err(|e| self.write_error(e))?;
        Ok(())
    }

    fn write_error(&self, err: std::io::Error) -> BrokerError {
        if self.shared.connected.load(Ordering::SeqCst) {
            BrokerError::Transport(format!(
                "write to server '{}' failed: {err}",
                self.shared.name
            ))
        } else {
            self.shared.terminal_error()
        }
    }

    /// Number of frames that failed to parse since startup.
    pub fn malformed_frames(&self) -> u64 {
        self.shared.malformed_frames.load(Ordering::SeqCst)
    }

    /// In-flight request count; test and diagnostics hook.
    pub fn pending_len(&self) -> usize {
        self.shared
            .pending
            .lock()
            .expect("pending table lock poisoned")
            .len()
    }

    /// Recent stderr output from the child.
    pub fn stderr_tail(&self) -> Vec<String> {
        self.shared
            .stderr_tail
            .lock()
            .expect("stderr tail lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Exit code, once the child has terminated.
    pub fn exit_code(&self) -> Option<Option<i32>> {
        *self.shared.exit_code.lock().expect("exit code lock poisoned")
    }
}

#[async_trait]
impl ToolTransport for StdioTransport {
    async fn request(&self, message: JsonRpcMessage) -> Result<JsonRpcMessage, BrokerError> {
        if !self.is_connected() {
            return Err(self.shared.terminal_error());
        }
        let id = message
            .id_key()
            .ok_or_else(|| BrokerError::Protocol("request frame carries no id".to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.shared.insert_pending(id.clone(), tx)?;
        let _guard = PendingGuard {
            shared: self.shared.as_ref(),
            id: &id,
        };

        self.write_frame(&message).await?;

        match rx.await {
            Ok(outcome) => outcome,
            // Sender dropped without resolution; treat like a teardown.
            Err(_) => Err(self.shared.terminal_error()),
        }
    }

    async fn notify(&self, message: JsonRpcMessage) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(self.shared.terminal_error());
        }
        self.write_frame(&message).await
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.shared.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(server = %self.shared.name, "closing stdio transport");
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.fail_all_pending(|| BrokerError::ServerClosed);

        // Dropping stdin is the graceful termination signal; the monitor
        // task escalates to a kill after the grace period.
        {
            let mut writer = self.writer.lock().await;
            *writer = None;
        }
        let shutdown = self
            .shutdown
            .lock()
            .expect("shutdown sender lock poisoned")
            .take();
        if let Some(tx) = shutdown {
            let _ = tx.send(());
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

// ============================================================
// Background Tasks
// ============================================================

/// Reader task: one per server, sole consumer of the child's stdout.
async fn read_frames(
    shared: Arc<Shared>,
    reader: impl AsyncRead + Unpin,
    notifications: Option<NotificationSender>,
) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<JsonRpcMessage>(line) {
                    Ok(frame) => shared.dispatch_frame(frame, &notifications),
                    Err(e) => {
                        shared.malformed_frames.fetch_add(1, Ordering::SeqCst);
                        warn!(
                            server = %shared.name,
                            error = %e,
                            "malformed frame dropped"
                        );
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(server = %shared.name, error = %e, "stdout read failed");
                break;
            }
        }
    }
    debug!(server = %shared.name, "reader task finished");
}

/// Stderr task: capture diagnostics without ever touching the frame stream.
async fn pump_stderr(shared: Arc<Shared>, stderr: impl AsyncRead + Unpin) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(server = %shared.name, line = %line, "server stderr");
        let mut tail = shared.stderr_tail.lock().expect("stderr tail lock poisoned");
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
}

/// Monitor task: waits for child exit, or runs the grace-then-kill sequence
/// once the broker closes the transport.
async fn monitor_child(
    shared: Arc<Shared>,
    mut child: Child,
    shutdown_rx: oneshot::Receiver<()>,
    grace: Duration,
) {
    let early_exit = tokio::select! {
        status = child.wait() => Some(status),
        _ = shutdown_rx => None,
    };

    match early_exit {
        Some(status) => {
            let code = status.ok().and_then(|s| s.code());
            shared.on_exit(code);
        }
        None => {
            // Stdin is already closed; give the child the grace period.
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => {
                    shared.on_exit(status.ok().and_then(|s| s.code()));
                }
                Err(_) => {
                    warn!(server = %shared.name, "grace period elapsed, killing child");
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    shared.on_exit(None);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    /// Transport wired to in-memory pipes; returns the far end the test
    /// drives as the "server".
    fn pipe_transport(
        notifications: Option<NotificationSender>,
    ) -> (StdioTransport, DuplexStream, DuplexStream) {
        let (broker_out, server_in) = duplex(64 * 1024);
        let (server_out, broker_in) = duplex(64 * 1024);
        let transport = StdioTransport::from_streams("memory", broker_out, broker_in, notifications);
        (transport, server_in, server_out)
    }

    async fn read_request(server_in: &mut BufReader<DuplexStream>) -> JsonRpcMessage {
        let mut line = String::new();
        server_in.read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    async fn send_frame(server_out: &mut DuplexStream, frame: &serde_json::Value) {
        let mut bytes = serde_json::to_vec(frame).unwrap();
        bytes.push(b'\n');
        server_out.write_all(&bytes).await.unwrap();
    }

    #[tokio::test]
    async fn request_resolves_with_matching_reply() {
        let (transport, server_in, mut server_out) = pipe_transport(None);
        let mut server_in = BufReader::new(server_in);

        let call = tokio::spawn(async move {
            transport
                .request(JsonRpcMessage::request("w-1", "tools/call", json!({"name": "store"})))
                .await
        });

        let seen = read_request(&mut server_in).await;
        assert_eq!(seen.id_key().as_deref(), Some("w-1"));
        send_frame(
            &mut server_out,
            &json!({"jsonrpc": "2.0", "id": "w-1", "result": {"ok": true}}),
        )
        .await;

        let reply = call.await.unwrap().unwrap();
        assert_eq!(reply.result.unwrap()["ok"], true);
    }

    #[tokio::test]
    async fn replies_correlate_out_of_order() {
        let (transport, server_in, mut server_out) = pipe_transport(None);
        let transport = Arc::new(transport);
        let mut server_in = BufReader::new(server_in);

        let t1 = transport.clone();
        let first = tokio::spawn(async move {
            t1.request(JsonRpcMessage::request("w-1", "tools/call", json!({"n": 1})))
                .await
        });
        let t2 = transport.clone();
        let second = tokio::spawn(async move {
            t2.request(JsonRpcMessage::request("w-2", "tools/call", json!({"n": 2})))
                .await
        });

        // Consume both requests, then answer in reverse order.
        let _ = read_request(&mut server_in).await;
        let _ = read_request(&mut server_in).await;
        send_frame(
            &mut server_out,
            &json!({"jsonrpc": "2.0", "id": "w-2", "result": {"for": 2}}),
        )
        .await;
        send_frame(
            &mut server_out,
            &json!({"jsonrpc": "2.0", "id": "w-1", "result": {"for": 1}}),
        )
        .await;

        assert_eq!(first.await.unwrap().unwrap().result.unwrap()["for"], 1);
        assert_eq!(second.await.unwrap().unwrap().result.unwrap()["for"], 2);
        assert_eq!(transport.pending_len(), 0);
    }

    #[tokio::test]
    async fn unmatched_reply_is_dropped_without_side_effects() {
        let (transport, server_in, mut server_out) = pipe_transport(None);
        let mut server_in = BufReader::new(server_in);

        let call = tokio::spawn(async move {
            transport
                .request(JsonRpcMessage::request("w-5", "tools/call", json!({})))
                .await
        });

        let _ = read_request(&mut server_in).await;
        send_frame(
            &mut server_out,
            &json!({"jsonrpc": "2.0", "id": "ghost", "result": 0}),
        )
        .await;
        send_frame(
            &mut server_out,
            &json!({"jsonrpc": "2.0", "id": "w-5", "result": 1}),
        )
        .await;

        let reply = call.await.unwrap().unwrap();
        assert_eq!(reply.result.unwrap(), 1);
    }

    #[tokio::test]
    async fn malformed_frame_does_not_tear_the_connection_down() {
        let (transport, server_in, mut server_out) = pipe_transport(None);
        let mut server_in = BufReader::new(server_in);

        let call = tokio::spawn(async move {
            let reply = transport
                .request(JsonRpcMessage::request("w-9", "tools/call", json!({})))
                .await;
            (reply, transport.malformed_frames())
        });

        let _ = read_request(&mut server_in).await;
        server_out.write_all(b"this is not json\n").await.unwrap();
        send_frame(
            &mut server_out,
            &json!({"jsonrpc": "2.0", "id": "w-9", "result": "fine"}),
        )
        .await;

        let (reply, malformed) = call.await.unwrap();
        assert_eq!(reply.unwrap().result.unwrap(), "fine");
        assert_eq!(malformed, 1);
    }

    #[tokio::test]
    async fn abandoned_request_frees_its_pending_slot() {
        let (transport, server_in, mut server_out) = pipe_transport(None);
        let transport = Arc::new(transport);
        let mut server_in = BufReader::new(server_in);

        let t = transport.clone();
        let deadline = tokio::time::timeout(Duration::from_millis(50), async move {
            t.request(JsonRpcMessage::request("w-3", "tools/call", json!({})))
                .await
        });
        let outcome = deadline.await;
        assert!(outcome.is_err(), "request should have timed out");
        assert_eq!(transport.pending_len(), 0);

        // The late reply finds no slot and the transport keeps working.
        let _ = read_request(&mut server_in).await;
        send_frame(
            &mut server_out,
            &json!({"jsonrpc": "2.0", "id": "w-3", "result": "late"}),
        )
        .await;

        let call = {
            let t = transport.clone();
            tokio::spawn(async move {
                t.request(JsonRpcMessage::request("w-4", "tools/call", json!({})))
                    .await
            })
        };
        let _ = read_request(&mut server_in).await;
        send_frame(
            &mut server_out,
            &json!({"jsonrpc": "2.0", "id": "w-4", "result": "on-time"}),
        )
        .await;
        assert_eq!(call.await.unwrap().unwrap().result.unwrap(), "on-time");
    }

    #[tokio::test]
    async fn concurrent_writes_never_interleave_frames() {
        let (transport, server_in, mut server_out) = pipe_transport(None);
        let transport = Arc::new(transport);
        let mut server_in = BufReader::new(server_in);

        let mut calls = Vec::new();
        for n in 0..10 {
            let t = transport.clone();
            calls.push(tokio::spawn(async move {
                t.request(JsonRpcMessage::request(
                    format!("w-{n}"),
                    "tools/call",
                    json!({"payload": "x".repeat(512), "n": n}),
                ))
                .await
            }));
        }

        // Every received line must be one complete JSON frame.
        for _ in 0..10 {
            let frame = read_request(&mut server_in).await;
            let id = frame.id_key().unwrap();
            send_frame(
                &mut server_out,
                &json!({"jsonrpc": "2.0", "id": id, "result": "ok"}),
            )
            .await;
        }

        for call in calls {
            assert_eq!(call.await.unwrap().unwrap().result.unwrap(), "ok");
        }
        assert_eq!(transport.pending_len(), 0);
        assert_eq!(transport.malformed_frames(), 0);
    }

    #[tokio::test]
    async fn notifications_reach_the_handler_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_transport, _server_in, mut server_out) = pipe_transport(Some(tx));

        send_frame(
            &mut server_out,
            &json!({"jsonrpc": "2.0", "method": "notifications/progress", "params": {"pct": 50}}),
        )
        .await;

        let note = rx.recv().await.unwrap();
        assert!(note.is_notification());
        assert_eq!(note.method.as_deref(), Some("notifications/progress"));
    }

    #[tokio::test]
    async fn close_fails_outstanding_calls_with_server_closed() {
        let (transport, server_in, _server_out) = pipe_transport(None);
        let transport = Arc::new(transport);
        let mut server_in = BufReader::new(server_in);

        let t = transport.clone();
        let call = tokio::spawn(async move {
            t.request(JsonRpcMessage::request("w-7", "tools/call", json!({})))
                .await
        });
        let _ = read_request(&mut server_in).await;

        transport.close().await.unwrap();
        assert!(matches!(call.await.unwrap(), Err(BrokerError::ServerClosed)));
        assert!(!transport.is_connected());
        assert!(matches!(
            transport
                .request(JsonRpcMessage::request("w-8", "tools/call", json!({})))
                .await,
            Err(BrokerError::ServerClosed)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn child_exit_fails_calls_with_exit_code() {
        // The child consumes one line and exits 7 without replying.
        let transport = StdioTransport::spawn(
            "flaky",
            "sh",
            &["-c".to_string(), "read _line; exit 7".to_string()],
            Vec::<(String, String)>::new(),
            Duration::from_millis(200),
            None,
        )
        .unwrap();

        let outcome = transport
            .request(JsonRpcMessage::request("w-1", "tools/call", json!({})))
            .await;
        assert!(matches!(outcome, Err(BrokerError::ServerExited(Some(7)))));
        assert!(!transport.is_connected());
        assert_eq!(transport.exit_code(), Some(Some(7)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stderr_is_captured_not_parsed() {
        let transport = StdioTransport::spawn(
            "noisy",
            "sh",
            &[
                "-c".to_string(),
                "echo diagnostic-line >&2; read _line".to_string(),
            ],
            Vec::<(String, String)>::new(),
            Duration::from_millis(200),
            None,
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(transport.malformed_frames(), 0);
        assert!(transport
            .stderr_tail()
            .iter()
            .any(|line| line == "diagnostic-line"));
        transport.close().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn close_escalates_to_kill_after_grace() {
        // This child ignores stdin EOF and would outlive any grace period.
        let transport = StdioTransport::spawn(
            "stubborn",
            "sh",
            &["-c".to_string(), "sleep 30".to_string()],
            Vec::<(String, String)>::new(),
            Duration::from_millis(100),
            None,
        )
        .unwrap();

        transport.close().await.unwrap();
        assert!(!transport.is_connected());

        // The monitor kills the child shortly after the grace period.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(transport.exit_code().is_some());
    }
}
