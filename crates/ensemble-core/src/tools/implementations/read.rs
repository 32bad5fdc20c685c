//! read_file - read a UTF-8 file from the workspace.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::parse_args;
use crate::tools::registry::{Tool, ToolContext, ToolResult};

pub struct ReadFileTool;

#[derive(Deserialize)]
struct ReadArgs {
    path: String,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file. Relative paths resolve against the workspace directory."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path to read"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let args: ReadArgs = match parse_args(args) {
            Ok(args) => args,
            Err(result) => return result,
        };
        let path = ctx.resolve_path(&args.path);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => ToolResult::ok(content),
            Err(e) => ToolResult::err(format!("cannot read {}: {e}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_relative_to_workspace() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("a.txt"), "hello").unwrap();
        let ctx = ToolContext::default().with_workspace(temp.path().to_path_buf());

        let result = ReadFileTool.execute(json!({"path": "a.txt"}), &ctx).await;
        assert!(result.success);
        assert_eq!(result.content, "hello");
    }

    #[tokio::test]
    async fn missing_file_is_a_failed_result() {
        let result = ReadFileTool
            .execute(json!({"path": "/nonexistent/x"}), &ToolContext::default())
            .await;
        assert!(!result.success);
    }
}
