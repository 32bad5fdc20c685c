//! list_files - list a workspace directory.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::parse_args;
use crate::tools::registry::{Tool, ToolContext, ToolResult};

pub struct ListFilesTool;

#[derive(Deserialize)]
struct ListArgs {
    #[serde(default)]
    path: Option<String>,
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List directory entries. Defaults to the workspace root."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory to list (default: workspace root)"}
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let args: ListArgs = match parse_args(args) {
            Ok(args) => args,
            Err(result) => return result,
        };
        let dir = match args.path {
            Some(path) => ctx.resolve_path(&path),
            None => ctx.workspace_dir.clone(),
        };

        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) => return ToolResult::err(format!("cannot list {}: {e}", dir.display())),
        };

        let mut entries = Vec::new();
        while let Ok(Some(entry)) = reader.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            let suffix = match entry.file_type().await {
                Ok(kind) if kind.is_dir() => "/",
                _ => "",
            };
            entries.push(format!("{name}{suffix}"));
        }
        entries.sort();
        ToolResult::ok(entries.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_sorted_with_dir_suffix() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("b.txt"), "").unwrap();
        std::fs::create_dir(temp.path().join("a")).unwrap();
        let ctx = ToolContext::default().with_workspace(temp.path().to_path_buf());

        let result = ListFilesTool.execute(json!({}), &ctx).await;
        assert!(result.success);
        assert_eq!(result.content, "a/\nb.txt");
    }
}
