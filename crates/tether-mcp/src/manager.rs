//! MCP manager: owns the client for every configured server.

use crate::client::{ClientStatus, McpClient};
use crate::config::McpConfig;
use crate::dispatcher::HandlerResult;
use crate::protocol::methods;
use crate::tool::McpTool;
use futures_util::future::join_all;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Manages connections to multiple MCP servers, keyed by server name.
pub struct McpManager {
    clients: BTreeMap<String, Arc<McpClient>>,
}

impl McpManager {
    /// Start all configured MCP servers.
    ///
    /// Servers that fail to start are logged and skipped; the manager keeps
    /// whatever servers came up.
    pub async fn start(config: &McpConfig) -> Self {
        let names: Vec<String> = config.servers.keys().cloned().collect();
        Self::start_only(config, &names).await
    }

    /// Start only the named servers. Unknown names are logged and ignored.
    pub async fn start_only(config: &McpConfig, names: &[String]) -> Self {
        let mut clients = BTreeMap::new();

        for name in names {
            let Some(server_config) = config.servers.get(name) else {
                tracing::warn!("No MCP server named '{name}' is configured");
                continue;
            };
            let client = McpClient::from_config(name.clone(), server_config, &config.client);
            let server = name.clone();
            client.add_notification_handler(methods::NOTIFICATIONS_MESSAGE, move |params| {
                log_server_message(&server, params.as_ref());
                std::future::ready(HandlerResult::Ok(()))
            });
            match client.connect().await {
                Ok(()) => {
                    let server = client
                        .server_info()
                        .map(|info| format!("{} {}", info.name, info.version))
                        .unwrap_or_default();
                    tracing::info!("MCP server '{name}' started ({server})");
                    clients.insert(name.clone(), Arc::new(client));
                }
                Err(e) => {
                    tracing::warn!("Failed to start MCP server '{name}': {e}");
                }
            }
        }

        Self { clients }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<McpClient>> {
        self.clients.get(name)
    }

    /// Names of connected servers, sorted.
    pub fn server_names(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }

    /// Number of connected servers.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn status(&self) -> Vec<ClientStatus> {
        self.clients.values().map(|c| c.get_status()).collect()
    }

    /// List tools on every server concurrently and wrap each as an [`McpTool`].
    ///
    /// A server whose listing fails contributes no tools.
    pub async fn discover_tools(&self) -> Vec<McpTool> {
        let listings = join_all(
            self.clients
                .iter()
                .map(|(name, client)| async move { (name, client, client.list_tools().await) }),
        )
        .await;

        let mut tools = Vec::new();
        for (name, client, listing) in listings {
            match listing {
                Ok(infos) => {
                    tracing::debug!("MCP server '{name}' offers {} tools", infos.len());
                    tools.extend(
                        infos
                            .into_iter()
                            .map(|info| McpTool::new(name, info, Arc::clone(client))),
                    );
                }
                Err(e) => tracing::warn!("Failed to list tools on MCP server '{name}': {e}"),
            }
        }
        tools
    }

    /// Disconnect every server. Clients stay registered but report disconnected.
    pub async fn shutdown(&self) {
        for (name, client) in &self.clients {
            tracing::debug!("Shutting down MCP server '{name}'");
            client.disconnect().await;
        }
    }
}

/// Re-emit a server's `notifications/message` through tracing at the matching level.
fn log_server_message(server: &str, params: Option<&Value>) {
    let Some(params) = params else {
        return;
    };
    let level = params.get("level").and_then(Value::as_str).unwrap_or("info");
    let data = match params.get("data") {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    match level {
        "debug" => tracing::debug!(server, "{data}"),
        "info" | "notice" => tracing::info!(server, "{data}"),
        "warning" => tracing::warn!(server, "{data}"),
        _ => tracing::error!(server, level, "{data}"),
    }
}
