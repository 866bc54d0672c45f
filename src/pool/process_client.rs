// ABOUTME: PoolClient backed by a spawned server speaking newline-delimited JSON-RPC
//
// Only the initialize exchange is implemented here: one `initialize` request,
// wait for the matching response, then the `notifications/initialized`
// notification. Everything after the handshake belongs to whoever holds the
// client.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::client::{ClientError, ClientFactory, PoolClient};
use super::config::{PoolConfig, ServerSpec};
use super::process::{ProcessState, ServerProcess};

/// Stdio pipes of a running server
struct StdioTransport {
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
}

impl StdioTransport {
    fn new(stdin: ChildStdin, stdout: ChildStdout) -> Self {
        Self {
            stdin,
            lines: BufReader::new(stdout).lines(),
        }
    }

    async fn send(&mut self, message: &Value) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        self.stdin.write_all(&line).await?;
        self.stdin.flush().await
    }

    /// Read lines until the response for `id` arrives
    ///
    /// Blank lines, non-JSON output and unrelated messages (server
    /// notifications, log lines) are skipped.
    async fn wait_for_response(&mut self, id: u64) -> Result<Value, ClientError> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| ClientError::Handshake(format!("Failed to read from server: {e}")))?
                .ok_or_else(|| {
                    ClientError::Handshake("Server closed stdout before responding".to_string())
                })?;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let Ok(message) = serde_json::from_str::<Value>(trimmed) else {
                trace!(line = %trimmed, "Ignoring non-JSON server output");
                continue;
            };

            let is_response = message.get("result").is_some() || message.get("error").is_some();
            if is_response && message.get("id").and_then(Value::as_u64) == Some(id) {
                return Ok(message);
            }

            trace!("Ignoring unrelated message during handshake");
        }
    }
}

/// A pooled client backed by one server process
pub struct ProcessClient {
    root: PathBuf,
    server: ServerSpec,
    handshake_timeout: Duration,
    stop_timeout: Duration,
    process: Mutex<ServerProcess>,
    transport: Mutex<Option<StdioTransport>>,
    initialized: AtomicBool,
    /// Last polled process state, for when the process lock is busy
    running: AtomicBool,
    stopped: AtomicBool,
    next_id: AtomicU64,
}

impl std::fmt::Debug for ProcessClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessClient")
            .field("root", &self.root)
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

impl ProcessClient {
    pub fn new(
        root: impl AsRef<Path>,
        server: ServerSpec,
        handshake_timeout: Duration,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            server,
            handshake_timeout,
            stop_timeout,
            process: Mutex::new(ServerProcess::new()),
            transport: Mutex::new(None),
            initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    /// Workspace root the server was started in
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Server definition this client runs
    pub fn server(&self) -> &ServerSpec {
        &self.server
    }

    /// PID of the running server, if any
    pub async fn pid(&self) -> Option<u32> {
        match self.poll(&mut *self.process.lock().await) {
            ProcessState::Running { pid } => Some(pid),
            _ => None,
        }
    }

    fn poll(&self, process: &mut ServerProcess) -> ProcessState {
        let state = process.check_status();
        self.running.store(state.is_running(), Ordering::SeqCst);
        state
    }

    fn root_uri(&self) -> String {
        url::Url::from_directory_path(&self.root)
            .map(String::from)
            .unwrap_or_else(|()| format!("file://{}", self.root.display()))
    }
}

impl PoolClient for ProcessClient {
    async fn start(&self) -> Result<(), ClientError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ClientError::Spawn("Client was stopped before it started".to_string()));
        }

        let mut process = self.process.lock().await;
        process
            .spawn(
                &self.server.command,
                &self.server.args,
                &self.server.env,
                Some(&self.root),
            )
            .map_err(|e| ClientError::Spawn(e.to_string()))?;

        let (Some(stdin), Some(stdout)) = (process.take_stdin(), process.take_stdout()) else {
            process.kill_now();
            return Err(ClientError::Spawn("Server stdio was not captured".to_string()));
        };

        *self.transport.lock().await = Some(StdioTransport::new(stdin, stdout));
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn initialize(&self) -> Result<(), ClientError> {
        let mut guard = self.transport.lock().await;
        let transport = guard
            .as_mut()
            .ok_or_else(|| ClientError::Handshake("Server is not running".to_string()))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {
                "processId": std::process::id(),
                "rootUri": self.root_uri(),
                "rootPath": self.root.display().to_string(),
                "capabilities": {},
                "clientInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                },
            },
        });

        debug!(server = %self.server.id, root = %self.root.display(), "Sending initialize");
        transport
            .send(&request)
            .await
            .map_err(|e| ClientError::Handshake(format!("Failed to send initialize: {e}")))?;

        let response = tokio::time::timeout(self.handshake_timeout, transport.wait_for_response(id))
            .await
            .map_err(|_| {
                ClientError::Handshake(format!(
                    "No initialize response within {}ms",
                    self.handshake_timeout.as_millis()
                ))
            })??;

        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| error.to_string(), str::to_string);
            return Err(ClientError::Handshake(format!(
                "Server rejected initialize: {message}"
            )));
        }

        transport
            .send(&json!({
                "jsonrpc": "2.0",
                "method": "notifications/initialized",
            }))
            .await
            .map_err(|e| ClientError::Handshake(format!("Failed to send initialized: {e}")))?;

        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        if self.stopped.load(Ordering::SeqCst) || !self.initialized.load(Ordering::SeqCst) {
            return false;
        }

        match self.process.try_lock() {
            Ok(mut process) => self.poll(&mut process).is_running(),
            Err(_) => self.running.load(Ordering::SeqCst),
        }
    }

    async fn stop(&self) -> Result<(), ClientError> {
        self.stopped.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);

        // Kill first: a pending initialize holds the transport until stdout closes
        let result = self
            .process
            .lock()
            .await
            .terminate(self.stop_timeout)
            .await
            .map_err(|e| ClientError::Teardown(e.to_string()));

        self.transport.lock().await.take();
        result
    }

    fn force_stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        // If the lock is busy, kill_on_drop reaps the child when the client goes
        if let Ok(mut process) = self.process.try_lock() {
            process.kill_now();
        }
    }
}

/// Builds `ProcessClient`s using the pool's timeouts
#[derive(Debug, Clone)]
pub struct ProcessClientFactory {
    handshake_timeout: Duration,
    stop_timeout: Duration,
}

impl ProcessClientFactory {
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            handshake_timeout: config.handshake_timeout,
            stop_timeout: config.stop_timeout,
        }
    }
}

impl ClientFactory for ProcessClientFactory {
    type Client = ProcessClient;

    fn create(&self, root: &Path, server: &ServerSpec) -> ProcessClient {
        ProcessClient::new(root, server.clone(), self.handshake_timeout, self.stop_timeout)
    }
}
