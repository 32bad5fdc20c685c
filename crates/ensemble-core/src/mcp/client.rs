//! MCP client for a single server.
//!
//! Requests are serialized per server: one JSON-RPC exchange at a time,
//! matched by id as it is read (the transport holds the pipe for the whole
//! round trip). A stdio server's process dies with the client; sse/http
//! servers are plain request/response. Either way the surface is
//! initialize / list_tools / call_tool.

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::config::{McpServerConfig, McpTransport};
use super::protocol::{
    ClientInfo, InitializeParams, InitializeResult, McpRequest, McpResponse, McpToolDef,
    McpToolResult, ToolCallParams, ToolCallResult, ToolsListResult, PROTOCOL_VERSION,
};
use super::transport::{HttpTransport, StdioTransport};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// What the client needs from a dialed connection: send one request and get
/// its response body, or push a one-way notification.
#[async_trait]
trait Wire: Send + Sync {
    async fn exchange(&self, json: &str, id: i64) -> Result<String>;

    async fn push(&self, json: &str) -> Result<()>;

    async fn alive(&self) -> bool;
}

#[async_trait]
impl Wire for StdioTransport {
    async fn exchange(&self, json: &str, id: i64) -> Result<String> {
        StdioTransport::exchange(self, json, id).await
    }

    async fn push(&self, json: &str) -> Result<()> {
        self.write_line(json).await
    }

    async fn alive(&self) -> bool {
        self.is_alive().await
    }
}

#[async_trait]
impl Wire for HttpTransport {
    async fn exchange(&self, json: &str, _id: i64) -> Result<String> {
        // HTTP pairs request and response on its own; no id matching needed.
        self.round_trip(json).await
    }

    async fn push(&self, json: &str) -> Result<()> {
        self.round_trip(json).await.map(|_| ())
    }

    async fn alive(&self) -> bool {
        true
    }
}

pub struct McpClient {
    name: String,
    wire: Box<dyn Wire>,
    next_id: AtomicI64,
    tools: RwLock<Vec<McpToolDef>>,
}

impl McpClient {
    /// Dial a server according to its configured transport.
    pub async fn connect(name: &str, config: &McpServerConfig, working_dir: &Path) -> Result<Self> {
        info!("connecting to MCP server: {name}");

        let wire: Box<dyn Wire> = match config.transport {
            McpTransport::Stdio => {
                if config.command.is_empty() {
                    return Err(anyhow!("MCP server {name} has stdio transport but no command"));
                }
                Box::new(
                    StdioTransport::spawn(&config.command, &config.args, &config.env, working_dir)
                        .await?,
                )
            }
            McpTransport::Sse | McpTransport::Http => {
                let url = config.url.as_deref().ok_or_else(|| {
                    anyhow!(
                        "MCP server {name} has {} transport but no url",
                        config.transport.as_str()
                    )
                })?;
                Box::new(HttpTransport::new(url))
            }
        };

        Ok(Self {
            name: name.to_string(),
            wire,
            next_id: AtomicI64::new(1),
            tools: RwLock::new(Vec::new()),
        })
    }

    /// Initialize the connection (required before using tools).
    pub async fn initialize(&self) -> Result<InitializeResult> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            client_info: ClientInfo {
                name: "ensemble".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        let result: InitializeResult = self
            .request("initialize", Some(serde_json::to_value(params)?))
            .await?;
        info!(
            "MCP {} initialized (protocol: {})",
            self.name, result.protocol_version
        );

        self.notify("notifications/initialized").await?;
        Ok(result)
    }

    /// List and cache the server's tools.
    pub async fn list_tools(&self) -> Result<Vec<McpToolDef>> {
        let result: ToolsListResult = self.request("tools/list", None).await?;
        info!("MCP {} has {} tools", self.name, result.tools.len());
        *self.tools.write().await = result.tools.clone();
        Ok(result.tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<McpToolResult> {
        let params = ToolCallParams {
            name: name.to_string(),
            arguments: if arguments.is_null() {
                None
            } else {
                Some(arguments)
            },
        };
        let result: ToolCallResult = self
            .request("tools/call", Some(serde_json::to_value(params)?))
            .await?;
        Ok(result.into())
    }

    pub async fn cached_tools(&self) -> Vec<McpToolDef> {
        self.tools.read().await.clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn is_alive(&self) -> bool {
        self.wire.alive().await
    }

    /// One JSON-RPC round trip with the standard deadline. Protocol-level
    /// errors come back as `Err`, results as the deserialized payload.
    async fn request<R: for<'de> serde::Deserialize<'de>>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<R> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let json = serde_json::to_string(&McpRequest::new(id, method, params))?;
        debug!("MCP {} request [{id}]: {method}", self.name);

        let body = tokio::time::timeout(REQUEST_TIMEOUT, self.wire.exchange(&json, id))
            .await
            .map_err(|_| {
                anyhow!(
                    "MCP {} request timed out after {}s",
                    self.name,
                    REQUEST_TIMEOUT.as_secs()
                )
            })??;

        let response: McpResponse = serde_json::from_str(&body)?;
        if let Some(error) = response.error {
            return Err(anyhow!("MCP error {}: {}", error.code, error.message));
        }
        Ok(serde_json::from_value(response.result.unwrap_or(Value::Null))?)
    }

    /// One-way notification; no response is read.
    async fn notify(&self, method: &str) -> Result<()> {
        let json = serde_json::json!({"jsonrpc": "2.0", "method": method}).to_string();
        debug!("MCP {} notify: {method}", self.name);
        self.wire.push(&json).await
    }
}
