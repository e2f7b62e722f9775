//! Multi-tier TOML configuration for Tether.
//!
//! Reads configuration from multiple sources with precedence:
//! CLI flags > env vars > config file > defaults

use std::path::{Path, PathBuf};
use tether_mcp::{McpConfig, TransportKind};
use tether_types::ConfigError;

/// Name of the config file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Resolved configuration for a Tether run.
#[derive(Debug, Clone)]
pub struct TetherConfig {
    pub mcp: McpConfig,
    pub config_dir: PathBuf,
    /// The file the settings came from, if any was read.
    pub source: Option<PathBuf>,
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// Explicit config file; must exist and parse.
    pub config_path: Option<PathBuf>,
    pub request_timeout_ms: Option<u64>,
    pub max_concurrent_requests: Option<usize>,
}

impl TetherConfig {
    /// Load configuration from all sources, applying precedence rules.
    ///
    /// Precedence (highest to lowest):
    /// 1. CLI flags
    /// 2. Environment variables (`TETHER_CONFIG`, `TETHER_REQUEST_TIMEOUT_MS`,
    ///    `TETHER_MAX_CONCURRENT_REQUESTS`)
    /// 3. Config file (`$TETHER_CONFIG_DIR/config.toml` or `~/.tether/config.toml`)
    /// 4. Defaults
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        Self::load_with_env(overrides, |key| std::env::var(key).ok())
    }

    fn load_with_env(
        overrides: CliOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let config_dir = config_dir_with_env(&env);

        // An explicitly named file must be usable; the default one is optional.
        let explicit = overrides
            .config_path
            .clone()
            .or_else(|| env("TETHER_CONFIG").map(PathBuf::from));
        let (mut mcp, source) = match explicit {
            Some(path) => (load_config_file(&path)?, Some(path)),
            None => {
                let path = config_dir.join(CONFIG_FILE_NAME);
                let loaded = load_default_file(&path);
                let source = loaded.is_some().then_some(path);
                (loaded.unwrap_or_default(), source)
            }
        };

        // Resolve request timeout: CLI > env > file
        if let Some(ms) = overrides.request_timeout_ms {
            mcp.client.request_timeout_ms = ms;
        } else if let Some(raw) = env("TETHER_REQUEST_TIMEOUT_MS") {
            mcp.client.request_timeout_ms = parse_env("TETHER_REQUEST_TIMEOUT_MS", &raw)?;
        }

        // Resolve concurrency bound: CLI > env > file
        if let Some(max) = overrides.max_concurrent_requests {
            mcp.client.max_concurrent_requests = max;
        } else if let Some(raw) = env("TETHER_MAX_CONCURRENT_REQUESTS") {
            mcp.client.max_concurrent_requests =
                parse_env("TETHER_MAX_CONCURRENT_REQUESTS", &raw)?;
        }

        validate(&mcp)?;

        Ok(TetherConfig {
            mcp,
            config_dir,
            source,
        })
    }
}

/// Get the Tether config directory path (~/.tether/).
pub fn config_dir() -> PathBuf {
    config_dir_with_env(|key| std::env::var(key).ok())
}

fn config_dir_with_env(env: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(dir) = env("TETHER_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tether")
}

/// Read and parse a config file the user asked for by name.
pub fn load_config_file(path: &Path) -> Result<McpConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|_| ConfigError::NotFound {
        path: path.display().to_string(),
    })?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Load the default config file, returning `None` if it is absent or broken.
fn load_default_file(path: &Path) -> Option<McpConfig> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!("Failed to parse {}: {}", path.display(), e);
            None
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{raw}': {e}"),
    })
}

/// Reject settings no session could run with.
pub fn validate(config: &McpConfig) -> Result<(), ConfigError> {
    if config.client.max_concurrent_requests == 0 {
        return Err(ConfigError::InvalidValue {
            key: "client.max_concurrent_requests".into(),
            message: "must be at least 1".into(),
        });
    }
    if config.client.request_timeout_ms == 0 {
        return Err(ConfigError::InvalidValue {
            key: "client.request_timeout_ms".into(),
            message: "must be at least 1".into(),
        });
    }

    for (name, server) in &config.servers {
        match server.transport {
            TransportKind::Stdio if server.command.trim().is_empty() => {
                return Err(ConfigError::MissingKey {
                    key: format!("servers.{name}.command"),
                });
            }
            TransportKind::Http if server.url.as_deref().is_none_or(str::is_empty) => {
                return Err(ConfigError::MissingKey {
                    key: format!("servers.{name}.url"),
                });
            }
            _ => {}
        }
        if server.max_concurrent_requests == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: format!("servers.{name}.max_concurrent_requests"),
                message: "must be at least 1".into(),
            });
        }
        if server.timeout_ms == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: format!("servers.{name}.timeout_ms"),
                message: "must be at least 1".into(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
[client]
request_timeout_ms = 10000

[servers.filesystem]
command = "npx"
args = ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]
"#;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn dir_with_config(content: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), content).unwrap();
        dir
    }

    #[test]
    fn defaults_when_no_file_exists() {
        let dir = TempDir::new().unwrap();
        let env = env_from(&[("TETHER_CONFIG_DIR", dir.path().to_str().unwrap())]);
        let config = TetherConfig::load_with_env(CliOverrides::default(), env).unwrap();
        assert!(config.mcp.servers.is_empty());
        assert!(config.source.is_none());
        assert_eq!(config.mcp.client.request_timeout_ms, 30_000);
        assert_eq!(config.config_dir, dir.path());
    }

    #[test]
    fn reads_default_file_from_config_dir() {
        let dir = dir_with_config(SAMPLE);
        let env = env_from(&[("TETHER_CONFIG_DIR", dir.path().to_str().unwrap())]);
        let config = TetherConfig::load_with_env(CliOverrides::default(), env).unwrap();
        assert_eq!(config.mcp.client.request_timeout_ms, 10_000);
        assert_eq!(config.mcp.servers["filesystem"].command, "npx");
        assert_eq!(
            config.source.as_deref(),
            Some(dir.path().join(CONFIG_FILE_NAME).as_path())
        );
    }

    #[test]
    fn malformed_default_file_falls_back_to_defaults() {
        let dir = dir_with_config("this is [not valid toml");
        let env = env_from(&[("TETHER_CONFIG_DIR", dir.path().to_str().unwrap())]);
        let config = TetherConfig::load_with_env(CliOverrides::default(), env).unwrap();
        assert!(config.mcp.servers.is_empty());
        assert!(config.source.is_none());
    }

    #[test]
    fn explicit_file_must_exist_and_parse() {
        let dir = TempDir::new().unwrap();
        let missing = CliOverrides {
            config_path: Some(dir.path().join("nope.toml")),
            ..CliOverrides::default()
        };
        assert!(matches!(
            TetherConfig::load_with_env(missing, env_from(&[])),
            Err(ConfigError::NotFound { .. })
        ));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "servers = 3").unwrap();
        let broken = CliOverrides {
            config_path: Some(bad),
            ..CliOverrides::default()
        };
        assert!(matches!(
            TetherConfig::load_with_env(broken, env_from(&[])),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn env_config_path_is_used_when_no_flag() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let env = env_from(&[("TETHER_CONFIG", path.to_str().unwrap())]);
        let config = TetherConfig::load_with_env(CliOverrides::default(), env).unwrap();
        assert_eq!(config.source, Some(path));
        assert!(config.mcp.servers.contains_key("filesystem"));
    }

    #[test]
    fn precedence_cli_over_env_over_file() {
        let dir = dir_with_config(SAMPLE);
        let dir_str = dir.path().to_str().unwrap();

        let env = env_from(&[
            ("TETHER_CONFIG_DIR", dir_str),
            ("TETHER_REQUEST_TIMEOUT_MS", "2500"),
            ("TETHER_MAX_CONCURRENT_REQUESTS", "4"),
        ]);
        let config = TetherConfig::load_with_env(CliOverrides::default(), env).unwrap();
        assert_eq!(config.mcp.client.request_timeout_ms, 2_500);
        assert_eq!(config.mcp.client.max_concurrent_requests, 4);

        let env = env_from(&[
            ("TETHER_CONFIG_DIR", dir_str),
            ("TETHER_REQUEST_TIMEOUT_MS", "2500"),
        ]);
        let overrides = CliOverrides {
            request_timeout_ms: Some(750),
            max_concurrent_requests: Some(2),
            ..CliOverrides::default()
        };
        let config = TetherConfig::load_with_env(overrides, env).unwrap();
        assert_eq!(config.mcp.client.request_timeout_ms, 750);
        assert_eq!(config.mcp.client.max_concurrent_requests, 2);
    }

    #[test]
    fn unparsable_env_override_is_rejected() {
        let dir = TempDir::new().unwrap();
        let env = env_from(&[
            ("TETHER_CONFIG_DIR", dir.path().to_str().unwrap()),
            ("TETHER_REQUEST_TIMEOUT_MS", "soon"),
        ]);
        match TetherConfig::load_with_env(CliOverrides::default(), env) {
            Err(ConfigError::InvalidValue { key, .. }) => {
                assert_eq!(key, "TETHER_REQUEST_TIMEOUT_MS")
            }
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn validation_rejects_unusable_settings() {
        let zero_concurrency = CliOverrides {
            max_concurrent_requests: Some(0),
            ..CliOverrides::default()
        };
        let dir = TempDir::new().unwrap();
        let env = || env_from(&[("TETHER_CONFIG_DIR", dir.path().to_str().unwrap())]);
        assert!(matches!(
            TetherConfig::load_with_env(zero_concurrency, env()),
            Err(ConfigError::InvalidValue { .. })
        ));

        let no_command: McpConfig = toml::from_str(
            r#"
[servers.empty]
args = ["x"]
"#,
        )
        .unwrap();
        match validate(&no_command) {
            Err(ConfigError::MissingKey { key }) => assert_eq!(key, "servers.empty.command"),
            other => panic!("expected MissingKey, got {other:?}"),
        }

        let no_url: McpConfig = toml::from_str(
            r#"
[servers.remote]
transport = "http"
"#,
        )
        .unwrap();
        match validate(&no_url) {
            Err(ConfigError::MissingKey { key }) => assert_eq!(key, "servers.remote.url"),
            other => panic!("expected MissingKey, got {other:?}"),
        }

        let zero_timeout: McpConfig = toml::from_str(
            r#"
[servers.fs]
command = "npx"
timeout_ms = 0
"#,
        )
        .unwrap();
        assert!(matches!(
            validate(&zero_timeout),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
