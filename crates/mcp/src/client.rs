//! RPC client: correlated requests to the tool server.
//!
//! One writer task owns the outbound half, one reader task owns the inbound
//! half and routes replies through the [`PendingTable`], and a monitor task
//! owns the child process. Callers only ever touch the pending table and a
//! channel into the writer.

use crate::pending::{PendingTable, Reply};
use crate::protocol::{
    self, ClientCapabilities, ClientInfo, Incoming, InitializeParams, InitializeResult,
    JsonRpcNotification, JsonRpcRequest, METHOD_INITIALIZE, METHOD_INITIALIZED,
};
use crate::transport::Launcher;
use overlay_config::McpConfig;
use overlay_core::error::RpcError;
use overlay_core::framing::{LineFramer, encode};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Request ids are unique across every client in the process.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// How long `stop()` waits for queued frames to reach the server.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Timeouts and handshake identity.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Applies to every call, the handshake included
    pub timeout: Duration,
    pub protocol_version: String,
    pub client_name: String,
    pub client_version: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from(&McpConfig::default())
    }
}

impl From<&McpConfig> for ClientOptions {
    fn from(config: &McpConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            protocol_version: config.protocol_version.clone(),
            client_name: config.client_name.clone(),
            client_version: config.client_version.clone(),
        }
    }
}

/// A live connection.
struct Session {
    generation: u64,
    writer_tx: mpsc::Sender<Vec<u8>>,
    kill_tx: Option<oneshot::Sender<()>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    monitor: Option<JoinHandle<()>>,
}

/// State shared with the background tasks.
///
/// Lock order is `session` then `pending`.
#[derive(Default)]
struct Shared {
    session: Mutex<Option<Session>>,
    pending: Mutex<PendingTable>,
    generation: AtomicU64,
}

/// JSON-RPC client for a single tool server process.
pub struct RpcClient {
    launcher: Box<dyn Launcher>,
    options: ClientOptions,
    shared: Arc<Shared>,
}

impl RpcClient {
    pub fn new(launcher: impl Launcher + 'static, options: ClientOptions) -> Self {
        Self {
            launcher: Box::new(launcher),
            options,
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Launch the server and complete the `initialize` handshake.
    ///
    /// A no-op when already running. On handshake failure the half-started
    /// server is torn down.
    pub async fn start(&self) -> Result<(), RpcError> {
        {
            let mut session = self.shared.session.lock().await;
            if session.is_some() {
                debug!("Tool server already running");
                return Ok(());
            }

            let connection = self.launcher.launch()?;
            let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;

            let (writer_tx, writer_rx) = mpsc::channel::<Vec<u8>>(64);
            let writer = tokio::spawn(write_loop(connection.writer, writer_rx));
            let reader = tokio::spawn(read_loop(
                connection.reader,
                Arc::clone(&self.shared),
                generation,
            ));

            let (kill_tx, monitor) = match connection.child {
                Some(child) => {
                    let (kill_tx, kill_rx) = oneshot::channel();
                    let monitor = tokio::spawn(monitor_child(
                        child,
                        kill_rx,
                        Arc::clone(&self.shared),
                        generation,
                    ));
                    (Some(kill_tx), Some(monitor))
                }
                None => (None, None),
            };

            *session = Some(Session {
                generation,
                writer_tx,
                kill_tx,
                reader,
                writer,
                monitor,
            });
        }

        if let Err(e) = self.handshake().await {
            self.stop().await;
            return Err(match e {
                RpcError::Startup(reason) => RpcError::Startup(reason),
                other => RpcError::Startup(format!("initialize handshake failed: {other}")),
            });
        }
        Ok(())
    }

    async fn handshake(&self) -> Result<(), RpcError> {
        let params = InitializeParams {
            protocol_version: self.options.protocol_version.clone(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: self.options.client_name.clone(),
                version: self.options.client_version.clone(),
            },
        };
        let params =
            serde_json::to_value(params).map_err(|e| RpcError::Protocol(e.to_string()))?;

        let result = self.call(METHOD_INITIALIZE, Some(params)).await?;
        match serde_json::from_value::<InitializeResult>(result) {
            Ok(init) => info!(
                server = init.server_info.as_ref().map(|s| s.name.as_str()).unwrap_or("unknown"),
                protocol = init.protocol_version.as_deref().unwrap_or("unspecified"),
                "Tool server initialized"
            ),
            Err(e) => warn!(error = %e, "Unrecognized initialize result"),
        }

        self.notify(METHOD_INITIALIZED, None).await
    }

    /// Send a request and wait for its reply.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        let id = next_request_id();
        let frame = encode(&JsonRpcRequest::new(id, method, params))
            .map_err(|e| RpcError::Protocol(e.to_string()))?;

        let (writer_tx, mut rx) = {
            let session = self.shared.session.lock().await;
            let Some(session) = session.as_ref() else {
                return Err(RpcError::NotRunning);
            };
            let rx = self.shared.pending.lock().await.register(id, method);
            (session.writer_tx.clone(), rx)
        };

        // The deadline covers queueing the frame as well as the reply
        let reply_rx = &mut rx;
        let exchange = async move {
            let sent = writer_tx.send(frame).await;
            drop(writer_tx);
            if sent.is_err() {
                return Err(RpcError::Transport("tool server stdin closed".into()));
            }
            debug!(id, method, "Sent request");
            match reply_rx.await {
                Ok(reply) => reply,
                Err(_) => Err(RpcError::ProcessExited),
            }
        };

        match tokio::time::timeout(self.options.timeout, exchange).await {
            Ok(Err(RpcError::Transport(reason))) => {
                self.shared.pending.lock().await.remove(id);
                Err(RpcError::Transport(reason))
            }
            Ok(result) => result,
            Err(_) => {
                if self.shared.pending.lock().await.remove(id).is_none() {
                    // Resolved in the same instant the deadline passed
                    if let Ok(reply) = rx.try_recv() {
                        return reply;
                    }
                }
                warn!(id, method, "Request timed out");
                Err(RpcError::Timeout {
                    method: method.to_string(),
                    timeout_secs: self.options.timeout.as_secs(),
                })
            }
        }
    }

    /// Send a notification; no reply is expected.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        let frame = encode(&JsonRpcNotification::new(method, params))
            .map_err(|e| RpcError::Protocol(e.to_string()))?;

        let writer_tx = {
            let session = self.shared.session.lock().await;
            let Some(session) = session.as_ref() else {
                return Err(RpcError::NotRunning);
            };
            session.writer_tx.clone()
        };
        match tokio::time::timeout(self.options.timeout, writer_tx.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(RpcError::Transport("tool server stdin closed".into())),
            Err(_) => {
                return Err(RpcError::Timeout {
                    method: method.to_string(),
                    timeout_secs: self.options.timeout.as_secs(),
                });
            }
        }
        debug!(method, "Sent notification");
        Ok(())
    }

    /// Terminate the server. Requests still waiting fail with `ProcessExited`.
    pub async fn stop(&self) {
        let session = self.shared.session.lock().await.take();
        if let Some(Session {
            generation,
            writer_tx,
            kill_tx,
            reader,
            writer,
            monitor,
        }) = session
        {
            info!(generation, "Stopping tool server");
            if let Some(kill_tx) = kill_tx {
                let _ = kill_tx.send(());
            }
            if let Some(monitor) = monitor {
                let _ = monitor.await;
            }
            // Let queued frames drain before the pipe closes, unless the
            // server has stopped reading
            drop(writer_tx);
            let mut writer = writer;
            if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
                debug!("Tool server stdin not draining, abandoning queued frames");
                writer.abort();
            }
            reader.abort();
        }

        let failed = self.shared.pending.lock().await.fail_all(RpcError::ProcessExited);
        if failed > 0 {
            warn!(failed, "Rejected requests still in flight at stop");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.shared.session.lock().await.is_some()
    }

    /// Number of requests awaiting a reply.
    pub async fn pending_count(&self) -> usize {
        self.shared.pending.lock().await.len()
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        // Best effort cleanup
        if let Ok(mut guard) = self.shared.session.try_lock()
            && let Some(mut session) = guard.take()
        {
            session.reader.abort();
            session.writer.abort();
            if let Some(kill_tx) = session.kill_tx.take() {
                let _ = kill_tx.send(());
            }
        }
    }
}

async fn write_loop(
    mut writer: Box<dyn tokio::io::AsyncWrite + Send + Unpin>,
    mut rx: mpsc::Receiver<Vec<u8>>,
) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            debug!(error = %e, "Tool server stdin write failed");
            break;
        }
        if let Err(e) = writer.flush().await {
            debug!(error = %e, "Tool server stdin flush failed");
            break;
        }
    }
}

async fn read_loop(
    mut reader: Box<dyn tokio::io::AsyncRead + Send + Unpin>,
    shared: Arc<Shared>,
    generation: u64,
) {
    let mut framer = LineFramer::new();
    let mut buf = vec![0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for value in framer.push(&buf[..n]) {
                    dispatch(&shared, value).await;
                }
            }
            Err(e) => {
                warn!(error = %e, "Tool server stdout read failed");
                break;
            }
        }
    }
    if let Some(value) = framer.finish() {
        dispatch(&shared, value).await;
    }
    debug!(generation, "Tool server stdout closed");
    handle_exit(&shared, generation).await;
}

async fn monitor_child(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    shared: Arc<Shared>,
    generation: u64,
) {
    tokio::select! {
        _ = kill_rx => {
            if let Err(e) = child.kill().await {
                debug!(error = %e, "Tool server kill failed");
            }
        }
        status = child.wait() => match status {
            Ok(status) => info!(%status, "Tool server exited"),
            Err(e) => warn!(error = %e, "Waiting on tool server failed"),
        },
    }
    handle_exit(&shared, generation).await;
}

/// Route one inbound message.
async fn dispatch(shared: &Shared, value: Value) {
    match protocol::classify(value) {
        Incoming::Response { id, outcome } => {
            let reply: Reply = outcome.map_err(|e| RpcError::Remote {
                code: e.code,
                message: e.message,
            });
            if !shared.pending.lock().await.resolve(id, reply) {
                debug!(id, "Ignoring response with no pending request");
            }
        }
        Incoming::Notification { method } => debug!(%method, "Ignoring server notification"),
        Incoming::Request { id, method } => debug!(%id, %method, "Ignoring server request"),
        Incoming::Invalid(reason) => warn!(%reason, "Ignoring malformed message"),
    }
}

/// Tear down the session of `generation` if it is still current and reject
/// everything in flight.
async fn handle_exit(shared: &Shared, generation: u64) {
    let mut session = shared.session.lock().await;
    if session.as_ref().map(|s| s.generation) != Some(generation) {
        return;
    }
    if let Some(mut ended) = session.take() {
        ended.writer.abort();
        if let Some(kill_tx) = ended.kill_tx.take() {
            let _ = kill_tx.send(());
        }
    }
    let failed = shared.pending.lock().await.fail_all(RpcError::ProcessExited);
    warn!(generation, failed, "Tool server connection lost");
}
