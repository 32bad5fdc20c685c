//! MCP configuration parsing.
//!
//! The document's root key is `mcpServers`, mapping server name to command,
//! arguments, environment, a disabled flag, and an optional transport
//! (`stdio` default, or `sse`/`http` with a `url`).

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpTransport {
    #[default]
    Stdio,
    Sse,
    Http,
}

impl McpTransport {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::Http => "http",
        }
    }
}

/// One server entry from the config document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct McpServerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub disabled: bool,
    pub transport: McpTransport,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpConfig {
    #[serde(default)]
    pub mcp_servers: HashMap<String, McpServerConfig>,
}

impl McpConfig {
    /// Load the config document. A missing file is an empty config; a
    /// malformed one is a startup error.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {path:?}"))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {path:?}"))?;

        info!(
            "loaded MCP config with {} servers from {:?}",
            config.mcp_servers.len(),
            path
        );
        Ok(config)
    }

    /// Enabled servers only, with `${VAR}` expansion applied to env values.
    pub fn enabled_servers(&self) -> HashMap<String, McpServerConfig> {
        self.mcp_servers
            .iter()
            .filter(|(_, cfg)| !cfg.disabled)
            .map(|(name, cfg)| {
                let mut expanded = cfg.clone();
                for value in expanded.env.values_mut() {
                    *value = expand_env_vars(value);
                }
                (name.clone(), expanded)
            })
            .collect()
    }
}

/// Expand `${VAR}` references from the process environment. Unknown
/// variables expand to the empty string.
fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        let Some(end_offset) = result[start..].find('}') else {
            break;
        };
        let end = start + end_offset;
        let var_name = result[start + 2..end].to_string();
        let value = std::env::var(&var_name).unwrap_or_default();
        result.replace_range(start..=end, &value);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stdio_server_with_defaults() {
        let json = r#"{
            "mcpServers": {
                "files": {
                    "command": "mcp-files",
                    "args": ["--root", "/tmp"],
                    "env": {"TOKEN": "t"}
                }
            }
        }"#;
        let config: McpConfig = serde_json::from_str(json).unwrap();
        let server = &config.mcp_servers["files"];
        assert_eq!(server.transport, McpTransport::Stdio);
        assert!(!server.disabled);
        assert_eq!(server.args, vec!["--root", "/tmp"]);
    }

    #[test]
    fn parses_http_server_and_skips_disabled() {
        let json = r#"{
            "mcpServers": {
                "remote": {"transport": "http", "url": "https://mcp.example.com/rpc"},
                "off": {"command": "x", "disabled": true}
            }
        }"#;
        let config: McpConfig = serde_json::from_str(json).unwrap();
        let enabled = config.enabled_servers();
        assert!(enabled.contains_key("remote"));
        assert!(!enabled.contains_key("off"));
        assert_eq!(enabled["remote"].transport, McpTransport::Http);
    }

    #[test]
    fn env_expansion_replaces_known_vars() {
        std::env::set_var("ENSEMBLE_TEST_TOKEN", "secret");
        assert_eq!(expand_env_vars("v=${ENSEMBLE_TEST_TOKEN}"), "v=secret");
        assert_eq!(expand_env_vars("v=${ENSEMBLE_TEST_MISSING_VAR}"), "v=");
        assert_eq!(expand_env_vars("plain"), "plain");
    }

    #[tokio::test]
    async fn missing_file_is_empty_config() {
        let config = McpConfig::load(Path::new("/nonexistent/mcp.json"))
            .await
            .unwrap();
        assert!(config.mcp_servers.is_empty());
    }
}
