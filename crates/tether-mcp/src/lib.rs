//! MCP (Model Context Protocol) client runtime.
//!
//! Speaks newline-delimited JSON-RPC 2.0 to MCP servers. Each stdio server is
//! spawned as a child process and initialized with a handshake; requests are
//! multiplexed over the single pipe and correlated with their responses by id.

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod jsonrpc;
pub mod manager;
pub mod metrics;
pub mod protocol;
pub mod tool;
pub mod transport;
pub mod waiter;

pub use client::{ClientStatus, McpClient};
pub use config::{ClientOptions, McpConfig, McpServerConfig, TransportKind};
pub use dispatcher::{Dispatcher, HandlerResult, SessionPhase};
pub use error::McpError;
pub use jsonrpc::RequestId;
pub use manager::McpManager;
pub use metrics::ClientMetrics;
pub use protocol::{
    CallToolResult, GetPromptResult, InitializeResult, McpToolInfo, Prompt, PromptArguments,
    Resource, ResourceContents, ServerCapabilities, ServerInfo, ToolContent,
};
pub use tool::McpTool;
pub use transport::{HttpTransport, StdioTransport, Transport, TransportState};
pub use waiter::ResponseWaiter;

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

// Shared state stays consistent across a panicking holder, so poisoning is ignored.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(rw: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rw.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(rw: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rw.write().unwrap_or_else(PoisonError::into_inner)
}
