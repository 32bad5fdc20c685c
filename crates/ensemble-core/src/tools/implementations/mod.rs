//! Built-in tool implementations.

mod ask_user;
mod bash;
mod list;
mod read;
mod skill;
mod write;

pub use ask_user::{parse_input_fields, GetUserInputTool, InputField, USER_INPUT_TOOL};
pub use bash::BashTool;
pub use list::ListFilesTool;
pub use read::ReadFileTool;
pub use skill::GetSkillTool;
pub use write::WriteFileTool;

use std::sync::Arc;

use crate::skills::SkillCatalog;
use crate::tools::registry::{ToolRegistry, ToolResult};

/// Register the native tool set. This is load-order step 1; MCP, sandbox
/// substitutes and the spawn tool layer on top.
pub async fn register_native_tools(registry: &ToolRegistry, skills: SkillCatalog) {
    registry.register(Arc::new(ReadFileTool)).await;
    registry.register(Arc::new(WriteFileTool)).await;
    registry.register(Arc::new(ListFilesTool)).await;
    registry.register(Arc::new(BashTool)).await;
    registry.register(Arc::new(GetUserInputTool)).await;
    registry.register(Arc::new(GetSkillTool::new(skills))).await;
}

/// Decode tool arguments into a typed payload, mapping failures to a failed
/// result rather than an error.
pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(
    args: serde_json::Value,
) -> Result<T, ToolResult> {
    serde_json::from_value(args).map_err(|e| ToolResult::err(format!("invalid arguments: {e}")))
}
