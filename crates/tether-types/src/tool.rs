//! Tool trait and related types.
//!
//! This is the boundary a host application programs against: it sees tools,
//! not MCP sessions. `tether-mcp` bridges server tools onto this trait.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// A tool definition as presented to the host (name, description, input schema).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Result of executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// The output content blocks.
    pub content: Vec<ToolOutputContent>,
    /// Whether the tool execution resulted in an error.
    pub is_error: bool,
}

/// A single piece of tool output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolOutputContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        mime_type: String,
    },
    Resource {
        uri: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
}

impl ToolOutput {
    /// Create a successful text output.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolOutputContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Create an error text output.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolOutputContent::Text { text: text.into() }],
            is_error: true,
        }
    }

    /// Concatenate all text blocks, newline separated.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolOutputContent::Text { text } => Some(text.as_str()),
                ToolOutputContent::Resource { text, .. } => text.as_deref(),
                ToolOutputContent::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Trait that all tools must implement.
///
/// Dyn-compatible so hosts can hold `Arc<dyn Tool>` regardless of where the
/// tool actually runs.
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// The tool definition (name, description, input schema).
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with the given JSON input.
    fn execute(
        &self,
        input: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, crate::error::ToolError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn tool_is_dyn_compatible() {
        fn _accept(_t: &dyn Tool) {}
        fn _assert_send_sync<T: Send + Sync>() {}
        _assert_send_sync::<Arc<dyn Tool>>();
    }

    #[test]
    fn output_content_serializes_with_type_tag() {
        let content = ToolOutputContent::Image {
            data: "aGk=".into(),
            mime_type: "image/png".into(),
        };
        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(json["type"], "image");
        assert_eq!(json["mime_type"], "image/png");
    }

    #[test]
    fn joined_text_skips_images() {
        let output = ToolOutput {
            content: vec![
                ToolOutputContent::Text { text: "a".into() },
                ToolOutputContent::Image {
                    data: String::new(),
                    mime_type: "image/png".into(),
                },
                ToolOutputContent::Resource {
                    uri: "file:///b".into(),
                    mime_type: None,
                    text: Some("b".into()),
                },
            ],
            is_error: false,
        };
        assert_eq!(output.joined_text(), "a\nb");
    }

    #[test]
    fn error_output_is_flagged() {
        let output = ToolOutput::error("boom");
        assert!(output.is_error);
        assert_eq!(output.joined_text(), "boom");
    }
}
