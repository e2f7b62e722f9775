//! McpTool: exposes an MCP server tool through the `tether_types::Tool` trait.

use crate::client::McpClient;
use crate::error::McpError;
use crate::protocol::{McpToolInfo, ResourceContents, ToolContent, error_codes};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tether_types::{ToolDefinition, ToolError, ToolOutput, ToolOutputContent};

/// A tool backed by an MCP server.
///
/// The namespaced name follows the pattern `mcp__servername__toolname` so
/// tools from different servers never collide in a host's registry.
pub struct McpTool {
    namespaced_name: String,
    server_name: String,
    tool_info: McpToolInfo,
    client: Arc<McpClient>,
}

impl McpTool {
    pub fn new(server_name: &str, tool_info: McpToolInfo, client: Arc<McpClient>) -> Self {
        Self {
            namespaced_name: namespaced(server_name, &tool_info.name),
            server_name: server_name.to_string(),
            tool_info,
            client,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// The tool's name as the server knows it.
    pub fn remote_name(&self) -> &str {
        &self.tool_info.name
    }
}

fn namespaced(server: &str, tool: &str) -> String {
    format!("mcp__{server}__{tool}")
}

impl tether_types::Tool for McpTool {
    fn name(&self) -> &str {
        &self.namespaced_name
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.namespaced_name.clone(),
            description: format!("[MCP: {}] {}", self.server_name, self.tool_info.description),
            input_schema: self.tool_info.input_schema.clone(),
        }
    }

    fn execute(
        &self,
        input: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + '_>> {
        Box::pin(async move {
            let arguments = match input {
                serde_json::Value::Null => serde_json::json!({}),
                obj @ serde_json::Value::Object(_) => obj,
                other => {
                    return Err(ToolError::InvalidInput {
                        tool: self.namespaced_name.clone(),
                        message: format!("arguments must be a JSON object, got {other}"),
                    });
                }
            };

            let result = self
                .client
                .call_tool_result(&self.tool_info.name, arguments)
                .await
                .map_err(|e| self.map_error(e))?;

            Ok(ToolOutput {
                content: result.content.into_iter().map(convert_content).collect(),
                is_error: result.is_error,
            })
        })
    }
}

impl McpTool {
    fn map_error(&self, err: McpError) -> ToolError {
        match err {
            McpError::Timeout { timeout_ms, .. } => ToolError::Timeout { timeout_ms },
            McpError::JsonRpc { code, message, .. } if code == error_codes::INVALID_PARAMS => {
                ToolError::InvalidInput {
                    tool: self.namespaced_name.clone(),
                    message,
                }
            }
            McpError::JsonRpc { code, .. } if code == error_codes::METHOD_NOT_FOUND => {
                ToolError::UnknownTool {
                    name: self.namespaced_name.clone(),
                }
            }
            other => ToolError::ExecutionFailed(format!("[{}] {other}", self.server_name)),
        }
    }
}

fn convert_content(content: ToolContent) -> ToolOutputContent {
    match content {
        ToolContent::Text { text } => ToolOutputContent::Text { text },
        ToolContent::Image { data, mime_type } => ToolOutputContent::Image { data, mime_type },
        ToolContent::Resource { resource } => match resource {
            ResourceContents::Text {
                uri,
                mime_type,
                text,
            } => ToolOutputContent::Resource {
                uri,
                mime_type,
                text: Some(text),
            },
            // Binary payloads are not inlined; the host can read the URI itself.
            ResourceContents::Blob { uri, mime_type, .. } => ToolOutputContent::Resource {
                uri,
                mime_type,
                text: None,
            },
        },
    }
}
