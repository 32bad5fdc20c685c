//! write_file - create or overwrite a file in the workspace.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::parse_args;
use crate::tools::registry::{Tool, ToolContext, ToolResult};

pub struct WriteFileTool;

#[derive(Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path to write"},
                "content": {"type": "string", "description": "Full file content"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let args: WriteArgs = match parse_args(args) {
            Ok(args) => args,
            Err(result) => return result,
        };
        let path = ctx.resolve_path(&args.path);
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResult::err(format!("cannot create {}: {e}", parent.display()));
            }
        }
        match tokio::fs::write(&path, &args.content).await {
            Ok(()) => ToolResult::ok(format!(
                "wrote {} bytes to {}",
                args.content.len(),
                path.display()
            )),
            Err(e) => ToolResult::err(format!("cannot write {}: {e}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_and_creates_parents() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = ToolContext::default().with_workspace(temp.path().to_path_buf());

        let result = WriteFileTool
            .execute(json!({"path": "sub/dir/out.txt", "content": "data"}), &ctx)
            .await;
        assert!(result.success);
        assert_eq!(
            std::fs::read_to_string(temp.path().join("sub/dir/out.txt")).unwrap(),
            "data"
        );
    }
}
