//! JSON-RPC 2.0 frames for MCP communication.
//!
//! Outbound frames are plain serde structs. Inbound lines are classified by
//! [`IncomingMessage::parse`], which looks at which keys are present rather
//! than trusting `Option` defaults, so `"result": null` still counts as a
//! successful response.

use crate::error::McpError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const JSONRPC_VERSION: &str = "2.0";

/// Identifier correlating a request with its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(
        id: impl Into<RequestId>,
        method: impl Into<String>,
        params: Option<serde_json::Value>,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    /// Create a new JSON-RPC notification.
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl From<JsonRpcError> for McpError {
    fn from(err: JsonRpcError) -> Self {
        McpError::JsonRpc {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

/// One inbound frame, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    /// Reply to one of our requests.
    Response {
        id: RequestId,
        outcome: Result<serde_json::Value, JsonRpcError>,
    },
    /// Server-to-client notification.
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
    /// Reply to one of our requests whose `error` member could not be decoded.
    MalformedResponse { id: RequestId, reason: String },
    /// Server-initiated request. This client does not serve requests.
    Request { id: RequestId, method: String },
}

impl IncomingMessage {
    /// Parse and classify a single line of input.
    pub fn parse(line: &str) -> Result<Self, McpError> {
        let value: serde_json::Value = serde_json::from_str(line)
            .map_err(|e| McpError::Protocol(format!("invalid JSON: {e}")))?;

        let obj = value
            .as_object()
            .ok_or_else(|| McpError::Protocol("frame is not a JSON object".to_string()))?;

        if obj.get("jsonrpc").and_then(|v| v.as_str()) != Some(JSONRPC_VERSION) {
            return Err(McpError::Protocol(
                "missing or unsupported jsonrpc version".to_string(),
            ));
        }

        let method = obj.get("method").and_then(|m| m.as_str());
        let id = match obj.get("id") {
            None | Some(serde_json::Value::Null) => None,
            Some(raw) => Some(
                serde_json::from_value::<RequestId>(raw.clone())
                    .map_err(|_| McpError::Protocol(format!("invalid request id: {raw}")))?,
            ),
        };

        match (id, method) {
            (Some(id), Some(method)) => Ok(IncomingMessage::Request {
                id,
                method: method.to_string(),
            }),
            (Some(id), None) => match obj.get("error") {
                // The id is still answered, so the caller is failed instead of left to time out.
                Some(err) => match serde_json::from_value::<JsonRpcError>(err.clone()) {
                    Ok(error) => Ok(IncomingMessage::Response {
                        id,
                        outcome: Err(error),
                    }),
                    Err(e) => Ok(IncomingMessage::MalformedResponse {
                        id,
                        reason: format!("invalid error object: {e}"),
                    }),
                },
                None => Ok(IncomingMessage::Response {
                    id,
                    outcome: Ok(obj
                        .get("result")
                        .cloned()
                        .unwrap_or(serde_json::Value::Null)),
                }),
            },
            (None, Some(method)) => Ok(IncomingMessage::Notification {
                method: method.to_string(),
                params: obj.get("params").cloned(),
            }),
            (None, None) => Err(McpError::Protocol(
                "frame has neither id nor method".to_string(),
            )),
        }
    }
}
