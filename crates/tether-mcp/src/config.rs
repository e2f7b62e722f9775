//! Configuration types for MCP clients and servers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::PROTOCOL_VERSION;

fn default_client_name() -> String {
    "tether".to_string()
}

fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_protocol_version() -> String {
    PROTOCOL_VERSION.to_string()
}

fn default_timeout() -> u64 {
    30_000
}

fn default_max_concurrent() -> usize {
    100
}

fn default_true() -> bool {
    true
}

fn default_reconnect_delay() -> u64 {
    1_000
}

fn default_shutdown_grace() -> u64 {
    5_000
}

/// Session-level behavior shared by every server connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientOptions {
    /// Name sent as `clientInfo.name` during the handshake.
    #[serde(default = "default_client_name")]
    pub name: String,
    /// Version sent as `clientInfo.version`.
    #[serde(default = "default_client_version")]
    pub version: String,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    /// Per-request deadline in milliseconds (default: 30000).
    #[serde(default = "default_timeout")]
    pub request_timeout_ms: u64,
    /// Upper bound on requests awaiting a response (default: 100).
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_true")]
    pub enable_metrics: bool,
    /// Reserved; reconnection is not performed automatically.
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    /// Reserved; see `auto_reconnect`.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    /// How long a child gets to exit after SIGTERM before it is killed.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            version: default_client_version(),
            protocol_version: default_protocol_version(),
            request_timeout_ms: default_timeout(),
            max_concurrent_requests: default_max_concurrent(),
            enable_metrics: true,
            auto_reconnect: true,
            reconnect_delay_ms: default_reconnect_delay(),
            shutdown_grace_ms: default_shutdown_grace(),
        }
    }
}

impl ClientOptions {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Options for one server: the shared options with that server's overrides applied.
    pub fn for_server(&self, server: &McpServerConfig) -> ClientOptions {
        let mut options = self.clone();
        if let Some(timeout_ms) = server.timeout_ms {
            options.request_timeout_ms = timeout_ms;
        }
        if let Some(max) = server.max_concurrent_requests {
            options.max_concurrent_requests = max;
        }
        options
    }
}

/// Which transport carries frames to a server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Stdio,
    Http,
}

/// Top-level MCP configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default)]
    pub client: ClientOptions,
    #[serde(default)]
    pub servers: HashMap<String, McpServerConfig>,
}

/// Configuration for a single MCP server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    #[serde(default)]
    pub transport: TransportKind,
    /// Command to run (e.g., "npx", "python").
    #[serde(default)]
    pub command: String,
    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables to set for the server process.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the server process.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Endpoint for the HTTP transport.
    #[serde(default)]
    pub url: Option<String>,
    /// Overrides `client.request_timeout_ms` for this server.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Overrides `client.max_concurrent_requests` for this server.
    #[serde(default)]
    pub max_concurrent_requests: Option<usize>,
}

impl McpServerConfig {
    /// A stdio server launched as `command args...`.
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_server() {
        let toml_str = r#"
[servers.filesystem]
command = "npx"
args = ["-y", "@modelcontextprotocol/server-filesystem", "/home/user"]
"#;
        let config: McpConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.servers.len(), 1);
        let fs = &config.servers["filesystem"];
        assert_eq!(fs.command, "npx");
        assert_eq!(fs.args.len(), 3);
        assert_eq!(fs.transport, TransportKind::Stdio);
        assert!(fs.timeout_ms.is_none());
        assert_eq!(config.client.request_timeout_ms, 30_000);
        assert_eq!(config.client.max_concurrent_requests, 100);
    }

    #[test]
    fn parse_client_section_and_overrides() {
        let toml_str = r#"
[client]
name = "host-app"
request_timeout_ms = 5000
max_concurrent_requests = 8
enable_metrics = false

[servers.github]
command = "npx"
args = ["-y", "@modelcontextprotocol/server-github"]
timeout_ms = 60000
env = { GITHUB_TOKEN = "ghp_xxxx" }

[servers.remote]
transport = "http"
url = "http://localhost:8080/mcp"
"#;
        let config: McpConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.client.name, "host-app");
        assert!(!config.client.enable_metrics);
        assert_eq!(config.client.shutdown_grace_ms, 5_000);

        let gh = &config.servers["github"];
        assert_eq!(gh.env["GITHUB_TOKEN"], "ghp_xxxx");
        let options = config.client.for_server(gh);
        assert_eq!(options.request_timeout_ms, 60_000);
        assert_eq!(options.max_concurrent_requests, 8);

        let remote = &config.servers["remote"];
        assert_eq!(remote.transport, TransportKind::Http);
        assert_eq!(remote.url.as_deref(), Some("http://localhost:8080/mcp"));
    }

    #[test]
    fn default_config_is_empty() {
        let config = McpConfig::default();
        assert!(config.servers.is_empty());
        assert_eq!(config.client.protocol_version, PROTOCOL_VERSION);
        assert_eq!(config.client.request_timeout(), Duration::from_secs(30));
    }
}
