//! Error types for MCP operations.

use crate::jsonrpc::RequestId;
use thiserror::Error;

/// Errors from MCP session and transport operations.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("MCP client is not connected")]
    NotConnected,

    #[error("MCP client is already connected")]
    AlreadyConnected,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Transport has been stopped and cannot be reused")]
    TransportStopped,

    #[error("MCP client is not initialized")]
    NotInitialized,

    #[error("MCP client is already initialized")]
    AlreadyInitialized,

    #[error("Request {request_id} ({method}) timed out after {timeout_ms}ms")]
    Timeout {
        method: String,
        request_id: RequestId,
        timeout_ms: u64,
    },

    #[error("JSON-RPC error (code {code}): {message}")]
    JsonRpc {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("Failed to spawn MCP server '{command}': {source}")]
    SpawnFailed {
        command: String,
        source: std::io::Error,
    },

    #[error("MCP server process error: {0}")]
    Process(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, McpError::Timeout { .. })
    }

    pub fn is_connection_closed(&self) -> bool {
        matches!(self, McpError::ConnectionClosed)
    }

    /// Handshake ordering violations: double initialize, or use before initialize.
    pub fn is_initialization(&self) -> bool {
        matches!(
            self,
            McpError::NotInitialized | McpError::AlreadyInitialized
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_request() {
        let err = McpError::Timeout {
            method: "tools/list".into(),
            request_id: RequestId::Number(7),
            timeout_ms: 100,
        };
        assert_eq!(
            err.to_string(),
            "Request 7 (tools/list) timed out after 100ms"
        );
        assert!(err.is_timeout());
        assert!(!err.is_initialization());
    }

    #[test]
    fn remote_error_preserves_code_and_message() {
        let err = McpError::JsonRpc {
            code: -32601,
            message: "Method not found".into(),
            data: None,
        };
        assert_eq!(
            err.to_string(),
            "JSON-RPC error (code -32601): Method not found"
        );
    }

    #[test]
    fn initialization_predicate() {
        assert!(McpError::NotInitialized.is_initialization());
        assert!(McpError::AlreadyInitialized.is_initialization());
        assert!(!McpError::NotConnected.is_initialization());
    }
}
