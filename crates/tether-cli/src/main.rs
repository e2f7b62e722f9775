//! Tether CLI: inspect and drive MCP servers from the terminal.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tether_config::{CliOverrides, TetherConfig};
use tether_mcp::{
    McpClient, McpManager, PromptArguments, ResourceContents, ToolContent, TransportKind,
};

#[derive(Parser)]
#[command(name = "tether", version, about = "A client for Model Context Protocol servers")]
struct Cli {
    /// Config file to use instead of ~/.tether/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Per-request timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Maximum number of requests in flight per server
    #[arg(long, global = true)]
    max_concurrent: Option<usize>,

    /// Enable verbose/debug logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List configured servers without starting them
    Servers,
    /// Start servers and print their session status as JSON
    Status {
        /// Only this server (default: all)
        server: Option<String>,
    },
    /// List the tools a server offers
    Tools { server: String },
    /// Call a tool
    Call {
        server: String,
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// List the resources a server offers
    Resources { server: String },
    /// Read a resource by URI
    Read { server: String, uri: String },
    /// List the prompts a server offers
    Prompts { server: String },
    /// Render a prompt
    Prompt {
        server: String,
        name: String,
        /// Prompt argument as key=value (repeatable)
        #[arg(long = "arg", value_parser = parse_key_val)]
        args: Vec<(String, String)>,
    },
}

impl Command {
    /// The single server this command talks to, if any.
    fn server(&self) -> Option<&str> {
        match self {
            Command::Servers | Command::Status { .. } => None,
            Command::Tools { server }
            | Command::Call { server, .. }
            | Command::Resources { server }
            | Command::Read { server, .. }
            | Command::Prompts { server }
            | Command::Prompt { server, .. } => Some(server),
        }
    }
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let config = TetherConfig::load(CliOverrides {
        config_path: cli.config,
        request_timeout_ms: cli.timeout_ms,
        max_concurrent_requests: cli.max_concurrent,
    })
    .context("Failed to load configuration")?;

    match cli.command {
        Command::Servers => {
            print_servers(&config);
            Ok(())
        }
        Command::Status { server } => {
            let manager = match server {
                Some(name) => McpManager::start_only(&config.mcp, &[name]).await,
                None => McpManager::start(&config.mcp).await,
            };
            let result = print_json(&manager.status());
            manager.shutdown().await;
            result
        }
        command => {
            let Some(name) = command.server().map(str::to_string) else {
                bail!("command needs a server name");
            };
            if !config.mcp.servers.contains_key(&name) {
                bail!("No MCP server named '{name}' in the configuration");
            }
            let manager = McpManager::start_only(&config.mcp, std::slice::from_ref(&name)).await;
            let Some(client) = manager.get(&name).cloned() else {
                bail!("MCP server '{name}' failed to start (rerun with --verbose for details)");
            };
            let result = run(&client, command).await;
            manager.shutdown().await;
            result
        }
    }
}

async fn run(client: &Arc<McpClient>, command: Command) -> Result<()> {
    match command {
        Command::Tools { .. } => {
            for tool in client.list_tools().await? {
                println!("{}\t{}", tool.name, tool.description);
            }
        }
        Command::Call { tool, args, .. } => {
            let arguments: serde_json::Value =
                serde_json::from_str(&args).context("--args must be valid JSON")?;
            let result = client.call_tool_result(&tool, arguments).await?;
            for item in &result.content {
                print_tool_content(item);
            }
            if result.is_error {
                bail!("Tool '{tool}' reported an error");
            }
        }
        Command::Resources { .. } => {
            for resource in client.list_resources().await? {
                println!("{}\t{}", resource.uri, resource.name);
            }
        }
        Command::Read { uri, .. } => {
            for contents in client.read_resource(&uri).await? {
                match contents {
                    ResourceContents::Text { text, .. } => println!("{text}"),
                    ResourceContents::Blob { uri, mime_type, blob } => println!(
                        "[binary {} from {uri}, {} base64 bytes]",
                        mime_type.as_deref().unwrap_or("data"),
                        blob.len()
                    ),
                }
            }
        }
        Command::Prompts { .. } => {
            for prompt in client.list_prompts().await? {
                let args: Vec<String> = prompt
                    .arguments
                    .iter()
                    .map(|a| {
                        if a.required {
                            a.name.clone()
                        } else {
                            format!("[{}]", a.name)
                        }
                    })
                    .collect();
                println!(
                    "{}\t{}\t{}",
                    prompt.name,
                    args.join(" "),
                    prompt.description.unwrap_or_default()
                );
            }
        }
        Command::Prompt { name, args, .. } => {
            let arguments: PromptArguments = args.into_iter().collect();
            let arguments = (!arguments.is_empty()).then_some(arguments);
            print_json(&client.get_prompt(&name, arguments).await?)?;
        }
        Command::Servers | Command::Status { .. } => {}
    }
    Ok(())
}

fn print_servers(config: &TetherConfig) {
    let mut names: Vec<&String> = config.mcp.servers.keys().collect();
    names.sort();
    if names.is_empty() {
        eprintln!(
            "No MCP servers configured (looked in {})",
            config
                .source
                .as_ref()
                .unwrap_or(&config.config_dir.join(tether_config::CONFIG_FILE_NAME))
                .display()
        );
        return;
    }
    for name in names {
        let server = &config.mcp.servers[name];
        match server.transport {
            TransportKind::Stdio => {
                println!("{name}\tstdio\t{} {}", server.command, server.args.join(" "))
            }
            TransportKind::Http => println!(
                "{name}\thttp\t{}",
                server.url.as_deref().unwrap_or_default()
            ),
        }
    }
}

fn print_tool_content(item: &ToolContent) {
    match item {
        ToolContent::Text { text } => println!("{text}"),
        ToolContent::Image { mime_type, data } => {
            println!("[image {mime_type}, {} base64 bytes]", data.len())
        }
        ToolContent::Resource { resource } => match resource {
            ResourceContents::Text { uri, text, .. } => println!("[{uri}]\n{text}"),
            ResourceContents::Blob { uri, .. } => println!("[binary resource {uri}]"),
        },
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
