//! Shared session core: pending-request table, notification routing, and
//! connection flags.
//!
//! The [`Dispatcher`] is owned jointly by an [`McpClient`](crate::McpClient)
//! and its transport's read task. Every inbound line goes through
//! [`Dispatcher::handle_message`]; connection loss goes through
//! [`Dispatcher::on_disconnected`].

use crate::error::McpError;
use crate::jsonrpc::{IncomingMessage, RequestId};
use crate::metrics::ClientMetrics;
use crate::protocol::{InitializeResult, ServerCapabilities, ServerInfo};
use crate::waiter::ResponseWaiter;
use crate::{lock, read, write};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Maximum bytes of an inbound frame echoed into logs.
const LOG_PREVIEW_BYTES: usize = 200;

/// Result of a notification handler. Errors are logged, never propagated.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Callback invoked with the `params` of a server notification.
pub type NotificationHandler = Arc<dyn Fn(Option<Value>) -> HandlerFuture + Send + Sync>;

/// Lifecycle of one protocol session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unconnected,
    Connected,
    Initialized,
    /// The connection was lost or closed. A new `connect` starts over.
    Terminated,
}

#[derive(Debug)]
struct SessionState {
    phase: SessionPhase,
    server_info: Option<ServerInfo>,
    server_capabilities: Option<ServerCapabilities>,
    protocol_version: Option<String>,
    connected_at: Option<DateTime<Utc>>,
}

/// Routes inbound frames to waiting requests and notification handlers.
pub struct Dispatcher {
    server: String,
    next_id: AtomicI64,
    pending: Mutex<HashMap<RequestId, Arc<ResponseWaiter>>>,
    handlers: RwLock<HashMap<String, NotificationHandler>>,
    state: RwLock<SessionState>,
    metrics: Option<Mutex<ClientMetrics>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("server", &self.server)
            .field("phase", &self.phase())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher for the server named `server` (used in logs).
    pub fn new(server: impl Into<String>, enable_metrics: bool) -> Self {
        Self {
            server: server.into(),
            next_id: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            state: RwLock::new(SessionState {
                phase: SessionPhase::Unconnected,
                server_info: None,
                server_capabilities: None,
                protocol_version: None,
                connected_at: None,
            }),
            metrics: enable_metrics.then(|| Mutex::new(ClientMetrics::default())),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Parse one inbound line and route it.
    ///
    /// Never fails: malformed frames, unknown ids and server requests are
    /// logged and dropped.
    pub async fn handle_message(&self, line: &str) {
        let message = match IncomingMessage::parse(line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    server = %self.server,
                    "Dropping malformed frame ({e}): {}",
                    preview(line)
                );
                return;
            }
        };

        match message {
            IncomingMessage::Response { id, outcome } => {
                self.resolve(id, outcome.map_err(McpError::from))
            }
            IncomingMessage::MalformedResponse { id, reason } => {
                tracing::warn!(server = %self.server, "Malformed response for request {id}: {reason}");
                self.resolve(id, Err(McpError::Protocol(reason)))
            }
            IncomingMessage::Notification { method, params } => {
                self.dispatch_notification(method, params).await
            }
            IncomingMessage::Request { id, method } => {
                tracing::warn!(
                    server = %self.server,
                    "Ignoring server request '{method}' (id {id}); client does not serve requests"
                );
            }
        }
    }

    fn resolve(&self, id: RequestId, outcome: Result<Value, McpError>) {
        let waiter = lock(&self.pending).remove(&id);
        let Some(waiter) = waiter else {
            tracing::warn!(server = %self.server, "Received response for unknown request id {id}");
            return;
        };

        let settled = match outcome {
            Ok(value) => waiter.resolve_success(value),
            Err(err) => {
                tracing::debug!(
                    server = %self.server,
                    "Request {id} ({}) failed remotely: {err}",
                    waiter.method()
                );
                waiter.resolve_failure(err)
            }
        };
        if !settled {
            tracing::debug!(server = %self.server, "Response for request {id} arrived after it settled");
        }
    }

    async fn dispatch_notification(&self, method: String, params: Option<Value>) {
        self.record(ClientMetrics::record_notification);

        let handler = read(&self.handlers).get(&method).cloned();
        let Some(handler) = handler else {
            tracing::debug!(server = %self.server, "No handler for notification '{method}'");
            return;
        };

        // Awaited inline: the read task resumes only once the handler finishes.
        // The handler runs inside the future so a panic while building it is caught too.
        let outcome = AssertUnwindSafe(async move { handler(params).await })
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(server = %self.server, "Notification handler for '{method}' failed: {e}")
            }
            Err(_) => {
                tracing::error!(server = %self.server, "Notification handler for '{method}' panicked")
            }
        }
    }

    /// Fail every pending request with `ConnectionClosed` and mark the session terminated.
    ///
    /// Called by transports when the peer goes away and by the client on
    /// explicit disconnect. Safe to call more than once.
    pub fn on_disconnected(&self) {
        let was_connected = {
            let mut state = write(&self.state);
            let was = matches!(
                state.phase,
                SessionPhase::Connected | SessionPhase::Initialized
            );
            state.phase = SessionPhase::Terminated;
            was
        };

        let drained: Vec<Arc<ResponseWaiter>> =
            lock(&self.pending).drain().map(|(_, w)| w).collect();
        for waiter in &drained {
            waiter.resolve_failure(McpError::ConnectionClosed);
        }

        if was_connected || !drained.is_empty() {
            tracing::info!(
                server = %self.server,
                failed_requests = drained.len(),
                "Disconnected from MCP server"
            );
        }
    }

    // --- session state ---

    pub fn phase(&self) -> SessionPhase {
        read(&self.state).phase
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.phase(),
            SessionPhase::Connected | SessionPhase::Initialized
        )
    }

    pub fn is_initialized(&self) -> bool {
        self.phase() == SessionPhase::Initialized
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        read(&self.state).server_info.clone()
    }

    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        read(&self.state).server_capabilities.clone()
    }

    pub fn protocol_version(&self) -> Option<String> {
        read(&self.state).protocol_version.clone()
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        read(&self.state).connected_at
    }

    /// Reset a fresh or terminated session before its transport connects.
    pub(crate) fn begin_connect(&self) -> Result<(), McpError> {
        let mut state = write(&self.state);
        match state.phase {
            SessionPhase::Connected | SessionPhase::Initialized => Err(McpError::AlreadyConnected),
            SessionPhase::Unconnected | SessionPhase::Terminated => {
                state.phase = SessionPhase::Unconnected;
                state.server_info = None;
                state.server_capabilities = None;
                state.protocol_version = None;
                Ok(())
            }
        }
    }

    /// Mark the session connected, unless the transport already reported a loss.
    pub(crate) fn mark_connected(&self) -> Result<(), McpError> {
        {
            let mut state = write(&self.state);
            if state.phase == SessionPhase::Terminated {
                return Err(McpError::ConnectionClosed);
            }
            state.phase = SessionPhase::Connected;
            state.connected_at = Some(Utc::now());
        }
        self.record(ClientMetrics::record_connection);
        Ok(())
    }

    pub(crate) fn mark_initialized(&self, result: &InitializeResult) -> Result<(), McpError> {
        let mut state = write(&self.state);
        if state.phase != SessionPhase::Connected {
            return Err(McpError::ConnectionClosed);
        }
        state.phase = SessionPhase::Initialized;
        state.server_info = Some(result.server_info.clone());
        state.server_capabilities = Some(result.capabilities.clone());
        state.protocol_version = result.protocol_version.clone();
        Ok(())
    }

    // --- pending table ---

    pub(crate) fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Insert a waiter; the returned guard removes it again when dropped.
    pub(crate) fn register(&self, waiter: Arc<ResponseWaiter>) -> PendingEntry<'_> {
        let id = waiter.request_id().clone();
        lock(&self.pending).insert(id.clone(), waiter);
        PendingEntry {
            dispatcher: self,
            id,
        }
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    // --- notification handlers ---

    pub(crate) fn set_handler<F, Fut>(&self, method: String, handler: F)
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: NotificationHandler =
            Arc::new(move |params| -> HandlerFuture { Box::pin(handler(params)) });
        write(&self.handlers).insert(method, handler);
    }

    pub(crate) fn remove_handler(&self, method: &str) -> bool {
        write(&self.handlers).remove(method).is_some()
    }

    // --- metrics ---

    pub(crate) fn record(&self, f: impl FnOnce(&mut ClientMetrics)) {
        if let Some(metrics) = &self.metrics {
            f(&mut *lock(metrics));
        }
    }

    /// Snapshot of the counters, or `None` when metrics are disabled.
    pub fn metrics(&self) -> Option<ClientMetrics> {
        self.metrics.as_ref().map(|m| lock(m).clone())
    }
}

/// Removes a request's waiter from the pending table when dropped.
pub(crate) struct PendingEntry<'a> {
    dispatcher: &'a Dispatcher,
    id: RequestId,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        lock(&self.dispatcher.pending).remove(&self.id);
    }
}

/// Truncate `line` for logging without splitting a UTF-8 character.
fn preview(line: &str) -> &str {
    if line.len() <= LOG_PREVIEW_BYTES {
        return line;
    }
    let mut end = LOG_PREVIEW_BYTES;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}
