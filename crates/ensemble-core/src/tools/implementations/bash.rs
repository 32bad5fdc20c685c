//! bash - run a shell command in the workspace.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::parse_args;
use crate::tools::registry::{Tool, ToolContext, ToolResult};

pub struct BashTool;

#[derive(Deserialize)]
struct BashArgs {
    command: String,
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run a bash command in the workspace directory and return combined output."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "Shell command to execute"}
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let args: BashArgs = match parse_args(args) {
            Ok(args) => args,
            Err(result) => return result,
        };

        let output = tokio::process::Command::new("bash")
            .arg("-c")
            .arg(&args.command)
            .current_dir(&ctx.workspace_dir)
            .stdin(Stdio::null())
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => return ToolResult::err(format!("cannot spawn bash: {e}")),
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }

        if output.status.success() {
            ToolResult::ok(combined)
        } else {
            ToolResult::err(format!(
                "command exited with {}: {}",
                output.status.code().unwrap_or(-1),
                combined.trim()
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout() {
        let result = BashTool
            .execute(json!({"command": "echo hi"}), &ToolContext::default())
            .await;
        assert!(result.success);
        assert_eq!(result.content.trim(), "hi");
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failed_result() {
        let result = BashTool
            .execute(json!({"command": "exit 3"}), &ToolContext::default())
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("exited with 3"));
    }
}
