//! Stdio transport: spawn an MCP server as a child process and exchange
//! newline-delimited JSON-RPC over its stdin/stdout.
//!
//! A single reader task drains stdout and hands each line to the session's
//! dispatcher. Writes are serialized through the lock around the child's
//! stdin, so frames never interleave. Stderr is drained into debug logs.

use super::{BoxFuture, Transport};
use crate::config::McpServerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::McpError;
use crate::lock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Log target for lines the server writes to stderr.
const STDERR_TARGET: &str = "tether_mcp::server_stderr";

/// Lifecycle of a stdio transport. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Unconnected,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// State shared between the transport handle and its reader task.
struct Shared {
    server: String,
    state: Mutex<TransportState>,
    // Holding this lock is what serializes writes.
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    child: tokio::sync::Mutex<Option<Child>>,
    pid: Mutex<Option<u32>>,
    shutdown_grace: Duration,
}

impl Shared {
    fn set_state(&self, next: TransportState) {
        *lock(&self.state) = next;
    }

    /// Close stdin, then SIGTERM the child and escalate to SIGKILL after the grace period.
    async fn stop_process(&self) {
        {
            let mut state = lock(&self.state);
            if *state != TransportState::Stopped {
                *state = TransportState::Stopping;
            }
        }

        // A writer blocked on a full pipe holds the lock; it is released once the child dies.
        if let Ok(mut stdin) = self.stdin.try_lock() {
            stdin.take();
        }

        {
            let mut child = self.child.lock().await;
            if let Some(child) = child.as_mut() {
                terminate(&self.server, child, self.shutdown_grace).await;
            }
            *child = None;
        }
        self.stdin.lock().await.take();
        lock(&self.pid).take();
        self.set_state(TransportState::Stopped);
    }
}

struct Tasks {
    cancel: CancellationToken,
    reader: JoinHandle<()>,
    stderr: JoinHandle<()>,
}

/// Transport that talks to a child process over its standard streams.
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    cwd: Option<PathBuf>,
    shared: Arc<Shared>,
    tasks: Mutex<Option<Tasks>>,
}

impl StdioTransport {
    /// A transport that will run `command args...` on connect.
    pub fn new(server: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: HashMap::new(),
            cwd: None,
            shared: Arc::new(Shared {
                server: server.into(),
                state: Mutex::new(TransportState::Unconnected),
                stdin: tokio::sync::Mutex::new(None),
                child: tokio::sync::Mutex::new(None),
                pid: Mutex::new(None),
                shutdown_grace: Duration::from_secs(5),
            }),
            tasks: Mutex::new(None),
        }
    }

    pub fn from_config(
        server: impl Into<String>,
        config: &McpServerConfig,
        shutdown_grace: Duration,
    ) -> Self {
        let mut transport = Self::new(server, config.command.clone(), config.args.clone())
            .with_env(config.env.clone())
            .with_shutdown_grace(shutdown_grace);
        transport.cwd = config.cwd.clone();
        transport
    }

    /// Extra environment variables, layered over the inherited environment.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.shutdown_grace = grace;
        }
        self
    }

    pub fn state(&self) -> TransportState {
        *lock(&self.shared.state)
    }

    /// OS process id of the running server, if any.
    pub fn pid(&self) -> Option<u32> {
        *lock(&self.shared.pid)
    }

    async fn start(&self, dispatcher: Arc<Dispatcher>) -> Result<(), McpError> {
        {
            let mut state = lock(&self.shared.state);
            match *state {
                TransportState::Unconnected => *state = TransportState::Starting,
                TransportState::Starting | TransportState::Running => {
                    return Err(McpError::AlreadyConnected);
                }
                TransportState::Stopping | TransportState::Stopped => {
                    return Err(McpError::TransportStopped);
                }
            }
        }

        let server = self.shared.server.clone();
        tracing::debug!(
            server = %server,
            "Spawning MCP server: {} {}",
            self.command,
            self.args.join(" ")
        );

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                self.shared.set_state(TransportState::Unconnected);
                return Err(McpError::SpawnFailed {
                    command: self.command.clone(),
                    source,
                });
            }
        };

        let pipes = (child.stdin.take(), child.stdout.take(), child.stderr.take());
        let (Some(stdin), Some(stdout), Some(stderr)) = pipes else {
            // Dropping the child kills it.
            self.shared.set_state(TransportState::Stopped);
            return Err(McpError::Process(
                "child process stdio was not captured".to_string(),
            ));
        };

        *lock(&self.shared.pid) = child.id();
        *self.shared.stdin.lock().await = Some(stdin);
        *self.shared.child.lock().await = Some(child);

        let cancel = CancellationToken::new();
        let reader = tokio::spawn(read_loop(
            Arc::clone(&self.shared),
            stdout,
            dispatcher,
            cancel.clone(),
        ));
        let stderr = tokio::spawn(drain_stderr(server.clone(), stderr));
        *lock(&self.tasks) = Some(Tasks {
            cancel,
            reader,
            stderr,
        });

        self.shared.set_state(TransportState::Running);
        tracing::info!(server = %server, pid = ?self.pid(), "MCP server process started");
        Ok(())
    }

    async fn stop(&self) {
        let tasks = lock(&self.tasks).take();
        let Some(tasks) = tasks else {
            return;
        };

        tasks.cancel.cancel();
        if let Err(e) = tasks.reader.await {
            tracing::warn!(server = %self.shared.server, "Reader task ended abnormally: {e}");
        }
        self.shared.stop_process().await;
        // Stderr reaches EOF once the child is gone.
        tasks.stderr.abort();
        tracing::debug!(server = %self.shared.server, "Stdio transport stopped");
    }

    async fn write_line(&self, line: String) -> Result<(), McpError> {
        let mut stdin = self.shared.stdin.lock().await;
        let writer = stdin.as_mut().ok_or(McpError::ConnectionClosed)?;

        let mut frame = line.into_bytes();
        frame.push(b'\n');
        writer
            .write_all(&frame)
            .await
            .map_err(|e| McpError::Process(format!("failed to write to server stdin: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| McpError::Process(format!("failed to flush server stdin: {e}")))?;
        Ok(())
    }
}

impl Transport for StdioTransport {
    fn connect(&self, dispatcher: Arc<Dispatcher>) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(self.start(dispatcher))
    }

    fn send_message(&self, line: String) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(self.write_line(line))
    }

    fn disconnect(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.stop())
    }

    fn kind(&self) -> &'static str {
        "stdio"
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        // The reader task owns the last handle on the child once we are gone;
        // cancelling it lets `kill_on_drop` reap the process.
        if let Some(tasks) = lock(&self.tasks).take() {
            tasks.cancel.cancel();
            tasks.stderr.abort();
        }
    }
}

/// Read stdout line by line until EOF or cancellation.
async fn read_loop(
    shared: Arc<Shared>,
    stdout: ChildStdout,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => return,
            read = reader.read_until(b'\n', &mut buf) => read,
        };
        match read {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(server = %shared.server, "Failed to read from MCP server: {e}");
                break;
            }
        }

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim(),
            Err(e) => {
                tracing::warn!(server = %shared.server, "Skipping non-UTF-8 line from MCP server: {e}");
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = dispatcher.handle_message(line) => {}
        }
    }

    tracing::info!(server = %shared.server, "MCP server closed its output");
    shared.stop_process().await;
    dispatcher.on_disconnected();
}

async fn drain_stderr(server: String, stderr: impl AsyncRead + Unpin) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end();
                if !line.is_empty() {
                    tracing::debug!(target: STDERR_TARGET, server = %server, "{line}");
                }
            }
        }
    }
}

async fn terminate(server: &str, child: &mut Child, grace: Duration) {
    if let Ok(Some(status)) = child.try_wait() {
        tracing::debug!(server = %server, "MCP server already exited with {status}");
        return;
    }

    send_sigterm(server, child);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => tracing::info!(server = %server, "MCP server exited with {status}"),
        Ok(Err(e)) => tracing::warn!(server = %server, "Failed to wait for MCP server: {e}"),
        Err(_) => {
            tracing::warn!(
                server = %server,
                "MCP server did not exit within {}ms, killing it",
                grace.as_millis()
            );
            if let Err(e) = child.kill().await {
                tracing::warn!(server = %server, "Failed to kill MCP server: {e}");
            }
        }
    }
}

#[cfg(unix)]
fn send_sigterm(server: &str, child: &Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        tracing::debug!(server = %server, "SIGTERM to pid {pid} failed: {e}");
    }
}

#[cfg(not(unix))]
fn send_sigterm(_server: &str, _child: &Child) {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Instant;

    fn dispatcher() -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new("test", true))
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let transport = StdioTransport::new("missing", "/nonexistent/tether-test-binary", vec![]);
        let err = transport.connect(dispatcher()).await.unwrap_err();
        match err {
            McpError::SpawnFailed { command, .. } => {
                assert_eq!(command, "/nonexistent/tether-test-binary")
            }
            other => panic!("expected SpawnFailed, got {other:?}"),
        }
        assert_eq!(transport.state(), TransportState::Unconnected);
        assert!(transport.pid().is_none());
    }

    #[tokio::test]
    async fn cat_echoes_frames_back_to_the_dispatcher() {
        // `cat` echoes our request, which arrives as a server request and is ignored,
        // so send a response-shaped frame instead.
        let transport = StdioTransport::new("cat", "cat", vec![]);
        let dispatcher = dispatcher();
        transport.connect(Arc::clone(&dispatcher)).await.unwrap();
        assert_eq!(transport.state(), TransportState::Running);
        assert!(transport.pid().is_some());

        let waiter = Arc::new(crate::waiter::ResponseWaiter::new(
            dispatcher.next_request_id(),
            "echo",
            Duration::from_secs(5),
        ));
        let _entry = dispatcher.register(Arc::clone(&waiter));
        transport
            .send_message(json!({"jsonrpc": "2.0", "id": 1, "result": {"echo": true}}).to_string())
            .await
            .unwrap();
        assert_eq!(waiter.wait().await.unwrap(), json!({"echo": true}));

        transport.disconnect().await;
        assert_eq!(transport.state(), TransportState::Stopped);
        assert!(transport.pid().is_none());
        assert!(matches!(
            transport.send_message("{}".into()).await,
            Err(McpError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn stopped_transport_cannot_reconnect() {
        let transport = StdioTransport::new("cat", "cat", vec![]);
        transport.connect(dispatcher()).await.unwrap();
        assert!(matches!(
            transport.connect(dispatcher()).await,
            Err(McpError::AlreadyConnected)
        ));
        transport.disconnect().await;
        transport.disconnect().await;
        assert!(matches!(
            transport.connect(dispatcher()).await,
            Err(McpError::TransportStopped)
        ));
    }

    #[tokio::test]
    async fn child_exit_fails_pending_requests() {
        let transport = StdioTransport::new("exit", "sh", vec!["-c".into(), "sleep 0.2".into()]);
        let dispatcher = dispatcher();
        dispatcher.begin_connect().unwrap();
        transport.connect(Arc::clone(&dispatcher)).await.unwrap();
        dispatcher.mark_connected().unwrap();

        let waiter = Arc::new(crate::waiter::ResponseWaiter::new(
            dispatcher.next_request_id(),
            "never",
            Duration::from_secs(10),
        ));
        let _entry = dispatcher.register(Arc::clone(&waiter));

        let err = waiter.wait().await.unwrap_err();
        assert!(err.is_connection_closed(), "{err:?}");
        assert!(!dispatcher.is_connected());
        assert_eq!(transport.state(), TransportState::Stopped);
    }

    #[tokio::test]
    async fn stubborn_child_is_killed_after_grace() {
        // Ignores SIGTERM and never closes stdout. It announces itself once the
        // trap is installed so the signal cannot arrive too early.
        let transport = StdioTransport::new(
            "stubborn",
            "sh",
            vec![
                "-c".into(),
                r#"trap '' TERM; printf '{"jsonrpc":"2.0","method":"test/ready"}\n'; while true; do sleep 1; done"#.into(),
            ],
        )
        .with_shutdown_grace(Duration::from_millis(200));

        let dispatcher = dispatcher();
        let (tx, mut ready) = tokio::sync::mpsc::unbounded_channel();
        dispatcher.set_handler("test/ready".into(), move |_| {
            let tx = tx.clone();
            async move {
                tx.send(()).ok();
                crate::dispatcher::HandlerResult::Ok(())
            }
        });
        transport.connect(dispatcher).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), ready.recv())
            .await
            .unwrap()
            .unwrap();

        let start = Instant::now();
        transport.disconnect().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");
        assert_eq!(transport.state(), TransportState::Stopped);
    }

    #[tokio::test]
    async fn read_loop_skips_bad_lines_and_joins_split_frames() {
        // Garbage, invalid UTF-8 and a blank line come first; the response is
        // written in two pieces with a pause between them.
        let script = r#"printf 'not json\n'
printf '\377\376\n'
printf '\n'
printf '{"jsonrpc":"2.0","id":1,'
sleep 0.2
printf '"result":{"ok":1}}\n'
sleep 5"#;
        let transport = StdioTransport::new("noisy", "sh", vec!["-c".into(), script.into()])
            .with_shutdown_grace(Duration::from_millis(500));

        let dispatcher = dispatcher();
        let waiter = Arc::new(crate::waiter::ResponseWaiter::new(
            dispatcher.next_request_id(),
            "split",
            Duration::from_secs(5),
        ));
        let _entry = dispatcher.register(Arc::clone(&waiter));
        transport.connect(Arc::clone(&dispatcher)).await.unwrap();

        assert_eq!(waiter.wait().await.unwrap(), json!({"ok": 1}));
        assert_eq!(transport.state(), TransportState::Running);
        assert_eq!(dispatcher.pending_count(), 0);
        transport.disconnect().await;
    }

    #[tokio::test]
    async fn env_and_cwd_are_applied() {
        let dir = std::env::temp_dir();
        let transport = StdioTransport::new(
            "env",
            "sh",
            vec![
                "-c".into(),
                r#"printf '{"jsonrpc":"2.0","id":1,"result":{"greeting":"%s","cwd":"%s"}}\n' "$TETHER_GREETING" "$(pwd)"; sleep 5"#.into(),
            ],
        )
        .with_env(HashMap::from([("TETHER_GREETING".to_string(), "hello".to_string())]))
        .with_cwd(&dir);

        let dispatcher = dispatcher();
        let waiter = Arc::new(crate::waiter::ResponseWaiter::new(
            dispatcher.next_request_id(),
            "greeting",
            Duration::from_secs(5),
        ));
        let _entry = dispatcher.register(Arc::clone(&waiter));
        transport.connect(Arc::clone(&dispatcher)).await.unwrap();

        let result = waiter.wait().await.unwrap();
        assert_eq!(result["greeting"], "hello");
        let reported = std::fs::canonicalize(result["cwd"].as_str().unwrap()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(&dir).unwrap());
        transport.disconnect().await;
    }
}
