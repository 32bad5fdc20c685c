//! MCP manager - owns the long-lived server connections.
//!
//! Connections are dialed at startup (or on explicit reconfiguration) and
//! re-dialed with exponential backoff when a call finds them dead.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::client::McpClient;
use super::config::{McpConfig, McpServerConfig};
use super::protocol::{McpToolDef, McpToolResult};

const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(200);
const RECONNECT_ATTEMPTS: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McpServerStatus {
    Disconnected,
    Connected,
    Error(String),
}

#[derive(Debug, Clone)]
pub struct McpServerInfo {
    pub name: String,
    pub transport: String,
    pub status: McpServerStatus,
    pub tool_count: usize,
}

pub struct McpManager {
    clients: RwLock<HashMap<String, Arc<McpClient>>>,
    configs: RwLock<HashMap<String, McpServerConfig>>,
    working_dir: PathBuf,
}

impl McpManager {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            configs: RwLock::new(HashMap::new()),
            working_dir,
        }
    }

    /// Load the configuration document and remember enabled servers.
    pub async fn load_config(&self, path: &std::path::Path) -> Result<()> {
        let config = McpConfig::load(path).await?;
        *self.configs.write().await = config.enabled_servers();
        Ok(())
    }

    /// Dial every enabled server in parallel. Individual failures are
    /// logged, not fatal.
    pub async fn connect_all(&self) {
        let configs: Vec<(String, McpServerConfig)> = {
            let configs = self.configs.read().await;
            configs.iter().map(|(n, c)| (n.clone(), c.clone())).collect()
        };
        if configs.is_empty() {
            return;
        }

        info!("connecting to {} MCP servers", configs.len());
        let futures: Vec<_> = configs
            .iter()
            .map(|(name, _)| async move { (name.clone(), self.connect(name).await) })
            .collect();

        for (name, result) in futures::future::join_all(futures).await {
            if let Err(e) = result {
                warn!("failed to connect MCP server {name}: {e:#}");
            }
        }
    }

    /// Connect (or reconnect) one server: dial, initialize, enumerate tools.
    pub async fn connect(&self, name: &str) -> Result<()> {
        let config = self
            .configs
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("unknown MCP server: {name}"))?;

        self.disconnect(name).await;

        let client = McpClient::connect(name, &config, &self.working_dir).await?;
        client.initialize().await?;
        client.list_tools().await?;

        self.clients
            .write()
            .await
            .insert(name.to_string(), Arc::new(client));
        info!("connected to MCP server: {name}");
        Ok(())
    }

    pub async fn disconnect(&self, name: &str) {
        if self.clients.write().await.remove(name).is_some() {
            info!("disconnected from MCP server: {name}");
        }
    }

    /// All tools across connected servers as (server, tool) pairs.
    pub async fn all_tools(&self) -> Vec<(String, McpToolDef)> {
        let clients = self.clients.read().await;
        let mut tools = Vec::new();
        for (name, client) in clients.iter() {
            for tool in client.cached_tools().await {
                tools.push((name.clone(), tool));
            }
        }
        tools
    }

    /// Call a tool, reconnecting with backoff when the connection is dead.
    pub async fn call_tool(&self, server: &str, tool: &str, arguments: Value) -> Result<McpToolResult> {
        let client = self.live_client(server).await?;
        client.call_tool(tool, arguments).await
    }

    async fn live_client(&self, server: &str) -> Result<Arc<McpClient>> {
        if let Some(client) = self.clients.read().await.get(server) {
            if client.is_alive().await {
                return Ok(client.clone());
            }
        }

        let mut delay = RECONNECT_BASE_DELAY;
        for attempt in 1..=RECONNECT_ATTEMPTS {
            warn!(server, attempt, "MCP connection dead, reconnecting");
            match self.connect(server).await {
                Ok(()) => {
                    if let Some(client) = self.clients.read().await.get(server) {
                        return Ok(client.clone());
                    }
                }
                Err(e) if attempt == RECONNECT_ATTEMPTS => return Err(e),
                Err(_) => {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
        Err(anyhow!("MCP server not connected: {server}"))
    }

    pub async fn list_servers(&self) -> Vec<McpServerInfo> {
        let configs = self.configs.read().await;
        let clients = self.clients.read().await;

        let mut servers = Vec::new();
        for (name, config) in configs.iter() {
            let (status, tool_count) = match clients.get(name) {
                Some(client) => {
                    let tools = client.cached_tools().await.len();
                    if client.is_alive().await {
                        (McpServerStatus::Connected, tools)
                    } else {
                        (McpServerStatus::Error("process died".to_string()), 0)
                    }
                }
                None => (McpServerStatus::Disconnected, 0),
            };
            servers.push(McpServerInfo {
                name: name.clone(),
                transport: config.transport.as_str().to_string(),
                status,
                tool_count,
            });
        }
        servers.sort_by(|a, b| a.name.cmp(&b.name));
        servers
    }

    pub async fn has_servers(&self) -> bool {
        !self.configs.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_server_errors() {
        let manager = McpManager::new(PathBuf::from("."));
        assert!(manager.connect("ghost").await.is_err());
        assert!(!manager.has_servers().await);
    }

    #[tokio::test]
    async fn list_servers_reports_disconnected_configs() {
        let manager = McpManager::new(PathBuf::from("."));
        let config: McpConfig = serde_json::from_str(
            r#"{"mcpServers": {"files": {"command": "mcp-files"}}}"#,
        )
        .unwrap();
        *manager.configs.write().await = config.enabled_servers();

        let servers = manager.list_servers().await;
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].status, McpServerStatus::Disconnected);
        assert_eq!(servers[0].transport, "stdio");
    }
}
