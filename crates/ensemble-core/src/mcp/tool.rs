//! Bridge from MCP tool definitions to the registry's `Tool` trait.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::manager::McpManager;
use super::protocol::McpToolDef;
use crate::tools::registry::{Tool, ToolContext, ToolRegistry, ToolResult};

/// A remote tool exposed under `server__tool`.
pub struct McpToolAdapter {
    manager: Arc<McpManager>,
    server: String,
    def: McpToolDef,
    qualified_name: String,
}

impl McpToolAdapter {
    pub fn new(manager: Arc<McpManager>, server: &str, def: McpToolDef) -> Self {
        let qualified_name = format!("{server}__{}", def.name);
        Self {
            manager,
            server: server.to_string(),
            def,
            qualified_name,
        }
    }
}

#[async_trait]
impl Tool for McpToolAdapter {
    fn name(&self) -> &str {
        &self.qualified_name
    }

    fn description(&self) -> &str {
        &self.def.description
    }

    fn parameters_schema(&self) -> Value {
        if self.def.input_schema.is_null() {
            serde_json::json!({"type": "object"})
        } else {
            self.def.input_schema.clone()
        }
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> ToolResult {
        match self.manager.call_tool(&self.server, &self.def.name, args).await {
            Ok(result) if result.is_error => ToolResult::err(result.content),
            Ok(result) => ToolResult::ok(result.content),
            Err(e) => ToolResult::err(format!("MCP call failed: {e:#}")),
        }
    }
}

/// Register every tool of every connected server. Load-order step 2: MCP
/// names shadow natives on collision (the registry warns).
pub async fn register_mcp_tools(registry: &ToolRegistry, manager: &Arc<McpManager>) {
    for (server, def) in manager.all_tools().await {
        registry
            .register(Arc::new(McpToolAdapter::new(manager.clone(), &server, def)))
            .await;
    }
}
