//! MCP client: one protocol session over one transport.
//!
//! Handles the handshake (initialize + initialized notification), request
//! multiplexing with bounded concurrency, and the typed MCP operations for
//! resources, tools, and prompts.

use crate::config::{ClientOptions, McpServerConfig, TransportKind};
use crate::dispatcher::{Dispatcher, HandlerResult, SessionPhase};
use crate::error::McpError;
use crate::jsonrpc::{JsonRpcNotification, JsonRpcRequest};
use crate::metrics::ClientMetrics;
use crate::protocol::{
    CallToolResult, ClientCapabilities, ClientInfo, GetPromptResult, InitializeParams,
    InitializeResult, ListPromptsResult, ListResourcesResult, ListToolsResult, McpToolInfo,
    Prompt, PromptArguments, ReadResourceResult, Resource, ResourceContents, ServerCapabilities,
    ServerInfo, ToolContent, methods,
};
use crate::transport::{HttpTransport, StdioTransport, Transport};
use crate::waiter::ResponseWaiter;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};

/// Snapshot of a client's session, suitable for display or JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct ClientStatus {
    pub server: String,
    pub transport: &'static str,
    pub client_name: String,
    pub client_version: String,
    pub protocol_version: String,
    pub connected: bool,
    pub initialized: bool,
    pub connected_at: Option<DateTime<Utc>>,
    pub server_info: Option<ServerInfo>,
    pub server_capabilities: Option<ServerCapabilities>,
    pub pending_requests: usize,
    pub metrics: Option<ClientMetrics>,
}

/// Client for a single MCP server.
pub struct McpClient {
    options: ClientOptions,
    transport: Arc<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
    permits: Semaphore,
    connect_lock: Mutex<()>,
    init_lock: Mutex<()>,
    auto_initialize: bool,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("server", &self.dispatcher.server())
            .field("transport", &self.transport.kind())
            .field("phase", &self.dispatcher.phase())
            .finish()
    }
}

impl McpClient {
    /// Create a client for `server` over an arbitrary transport.
    ///
    /// `connect` runs the initialize handshake automatically unless disabled
    /// with [`auto_initialize`](Self::auto_initialize).
    pub fn new(
        server: impl Into<String>,
        options: ClientOptions,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(server, options.enable_metrics));
        // A zero bound would block every request forever.
        let permits = Semaphore::new(options.max_concurrent_requests.max(1));
        Self {
            options,
            transport,
            dispatcher,
            permits,
            connect_lock: Mutex::new(()),
            init_lock: Mutex::new(()),
            auto_initialize: true,
        }
    }

    /// Build a client from a server's configuration entry.
    pub fn from_config(
        server: impl Into<String>,
        config: &McpServerConfig,
        options: &ClientOptions,
    ) -> Self {
        let server = server.into();
        let options = options.for_server(config);
        let transport: Arc<dyn Transport> = match config.transport {
            TransportKind::Stdio => Arc::new(StdioTransport::from_config(
                server.clone(),
                config,
                options.shutdown_grace(),
            )),
            TransportKind::Http => {
                Arc::new(HttpTransport::new(config.url.clone().unwrap_or_default()))
            }
        };
        Self::new(server, options, transport)
    }

    /// Whether `connect` also performs the initialize handshake.
    pub fn auto_initialize(mut self, enabled: bool) -> Self {
        self.auto_initialize = enabled;
        self
    }

    // --- lifecycle ---

    /// Open the transport and, by default, run the initialize handshake.
    ///
    /// If the handshake fails the transport is torn down again and the
    /// handshake's error is returned.
    pub async fn connect(&self) -> Result<(), McpError> {
        let _guard = self.connect_lock.lock().await;
        self.dispatcher.begin_connect()?;

        if let Err(e) = self.transport.connect(Arc::clone(&self.dispatcher)).await {
            self.dispatcher.on_disconnected();
            return Err(e);
        }
        if let Err(e) = self.dispatcher.mark_connected() {
            self.transport.disconnect().await;
            return Err(e);
        }
        tracing::info!(
            server = %self.server(),
            transport = self.transport.kind(),
            "Connected to MCP server"
        );

        if self.auto_initialize {
            if let Err(e) = self.initialize().await {
                tracing::warn!(server = %self.server(), "MCP handshake failed: {e}");
                self.disconnect().await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Close the transport and fail every outstanding request with `ConnectionClosed`.
    pub async fn disconnect(&self) {
        self.transport.disconnect().await;
        self.dispatcher.on_disconnected();
    }

    /// Perform the MCP handshake. Fails with `AlreadyInitialized` on a second call.
    pub async fn initialize(&self) -> Result<InitializeResult, McpError> {
        let _guard = self.init_lock.lock().await;
        if self.is_initialized() {
            return Err(McpError::AlreadyInitialized);
        }
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }

        let params = InitializeParams {
            protocol_version: self.options.protocol_version.clone(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: self.options.name.clone(),
                version: self.options.version.clone(),
            },
        };
        let value = self
            .send_request(methods::INITIALIZE, Some(serde_json::to_value(&params)?))
            .await?;
        let result: InitializeResult = decode(methods::INITIALIZE, value)?;

        if let Some(version) = &result.protocol_version {
            if *version != self.options.protocol_version {
                tracing::warn!(
                    server = %self.server(),
                    "Server negotiated protocol version {version} (requested {})",
                    self.options.protocol_version
                );
            }
        }

        self.send_notification(methods::NOTIFICATIONS_INITIALIZED, None)
            .await?;
        self.dispatcher.mark_initialized(&result)?;

        tracing::info!(
            server = %self.server(),
            "Initialized MCP session with {} {}",
            result.server_info.name,
            result.server_info.version
        );
        Ok(result)
    }

    // --- raw messaging ---

    /// Send a request and wait for its response.
    ///
    /// At most `max_concurrent_requests` requests are in flight at once;
    /// callers beyond that wait for a slot before anything is written.
    pub async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| McpError::ConnectionClosed)?;

        let id = self.dispatcher.next_request_id();
        let waiter = Arc::new(ResponseWaiter::new(
            id.clone(),
            method,
            self.options.request_timeout(),
        ));
        let _entry = self.dispatcher.register(Arc::clone(&waiter));
        // Teardown may have drained the table between the check above and registration.
        if !self.is_connected() {
            return Err(McpError::ConnectionClosed);
        }
        let sent = SentRequest::new(&self.dispatcher);

        let outcome: Result<Value, McpError> = async {
            let line = serde_json::to_string(&JsonRpcRequest::new(id.clone(), method, params))?;
            tracing::debug!(server = %self.server(), "-> request {id} {method}");
            self.transport.send_message(line).await?;
            waiter.wait().await
        }
        .await;

        match &outcome {
            Ok(_) => {
                let elapsed = waiter.elapsed();
                tracing::debug!(
                    server = %self.server(),
                    "<- response {id} {method} in {}ms",
                    elapsed.as_millis()
                );
                sent.succeeded(elapsed);
            }
            Err(e) => {
                tracing::debug!(server = %self.server(), "Request {id} ({method}) failed: {e}");
                sent.failed();
            }
        }
        outcome
    }

    /// Send a notification. No response is expected.
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }
        let line = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        tracing::debug!(server = %self.server(), "-> notification {method}");
        self.transport.send_message(line).await
    }

    /// Route one inbound line as if the transport had read it.
    pub async fn handle_message(&self, line: &str) {
        self.dispatcher.handle_message(line).await;
    }

    /// Register a handler for a server notification, replacing any previous one.
    ///
    /// Handlers run on the transport's read task, one at a time and in
    /// arrival order, so no response is read while a handler is pending.
    /// A handler must not await a request or [`disconnect`](Self::disconnect)
    /// on this client directly: the request would wait out its deadline and
    /// the disconnect would never return. Spawn such work instead.
    pub fn add_notification_handler<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.dispatcher.set_handler(method.into(), handler);
    }

    /// Returns `true` if a handler was registered for `method`.
    pub fn remove_notification_handler(&self, method: &str) -> bool {
        self.dispatcher.remove_handler(method)
    }

    // --- typed operations ---

    pub async fn ping(&self) -> Result<(), McpError> {
        self.ensure_initialized()?;
        self.send_request(methods::PING, None).await.map(|_| ())
    }

    pub async fn list_resources(&self) -> Result<Vec<Resource>, McpError> {
        let result: ListResourcesResult = self.request(methods::RESOURCES_LIST, None).await?;
        Ok(result.resources)
    }

    pub async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>, McpError> {
        let params = serde_json::json!({ "uri": uri });
        let result: ReadResourceResult =
            self.request(methods::RESOURCES_READ, Some(params)).await?;
        Ok(result.contents)
    }

    pub async fn list_tools(&self) -> Result<Vec<McpToolInfo>, McpError> {
        let result: ListToolsResult = self.request(methods::TOOLS_LIST, None).await?;
        Ok(result.tools)
    }

    /// Invoke a tool and return its content items.
    ///
    /// A tool-level failure (`isError: true`) still returns `Ok`; use
    /// [`call_tool_result`](Self::call_tool_result) to see the flag.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Vec<ToolContent>, McpError> {
        Ok(self.call_tool_result(name, arguments).await?.content)
    }

    pub async fn call_tool_result(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<CallToolResult, McpError> {
        let params = serde_json::json!({ "name": name, "arguments": arguments });
        self.request(methods::TOOLS_CALL, Some(params)).await
    }

    pub async fn list_prompts(&self) -> Result<Vec<Prompt>, McpError> {
        let result: ListPromptsResult = self.request(methods::PROMPTS_LIST, None).await?;
        Ok(result.prompts)
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<PromptArguments>,
    ) -> Result<GetPromptResult, McpError> {
        let mut params = serde_json::json!({ "name": name });
        if let Some(arguments) = arguments {
            params["arguments"] = serde_json::to_value(arguments)?;
        }
        self.request(methods::PROMPTS_GET, Some(params)).await
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, McpError> {
        self.ensure_initialized()?;
        let value = self.send_request(method, params).await?;
        decode(method, value)
    }

    fn ensure_initialized(&self) -> Result<(), McpError> {
        match self.dispatcher.phase() {
            SessionPhase::Initialized => Ok(()),
            SessionPhase::Connected => Err(McpError::NotInitialized),
            SessionPhase::Unconnected | SessionPhase::Terminated => Err(McpError::NotConnected),
        }
    }

    // --- introspection ---

    pub fn server(&self) -> &str {
        self.dispatcher.server()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn is_connected(&self) -> bool {
        self.dispatcher.is_connected()
    }

    pub fn is_initialized(&self) -> bool {
        self.dispatcher.is_initialized()
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.dispatcher.server_info()
    }

    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.dispatcher.server_capabilities()
    }

    /// Requests currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.dispatcher.pending_count()
    }

    /// Counter snapshot, or `None` when metrics are disabled.
    pub fn get_metrics(&self) -> Option<ClientMetrics> {
        self.dispatcher.metrics()
    }

    pub fn get_status(&self) -> ClientStatus {
        ClientStatus {
            server: self.server().to_string(),
            transport: self.transport.kind(),
            client_name: self.options.name.clone(),
            client_version: self.options.version.clone(),
            protocol_version: self
                .dispatcher
                .protocol_version()
                .unwrap_or_else(|| self.options.protocol_version.clone()),
            connected: self.is_connected(),
            initialized: self.is_initialized(),
            connected_at: self.dispatcher.connected_at(),
            server_info: self.server_info(),
            server_capabilities: self.server_capabilities(),
            pending_requests: self.pending_count(),
            metrics: self.get_metrics(),
        }
    }
}

/// Metrics for one sent request. A request dropped before it settles
/// (caller cancelled) counts as failed.
struct SentRequest<'a> {
    dispatcher: &'a Dispatcher,
    settled: bool,
}

impl<'a> SentRequest<'a> {
    fn new(dispatcher: &'a Dispatcher) -> Self {
        dispatcher.record(ClientMetrics::record_sent);
        Self {
            dispatcher,
            settled: false,
        }
    }

    fn succeeded(mut self, elapsed: Duration) {
        self.settled = true;
        self.dispatcher.record(|m| m.record_success(elapsed));
    }

    fn failed(mut self) {
        self.settled = true;
        self.dispatcher.record(ClientMetrics::record_failure);
    }
}

impl Drop for SentRequest<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.dispatcher.record(ClientMetrics::record_failure);
        }
    }
}

fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, McpError> {
    serde_json::from_value(value)
        .map_err(|e| McpError::Protocol(format!("invalid {method} result: {e}")))
}
