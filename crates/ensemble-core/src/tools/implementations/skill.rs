//! get_skill - load a skill's full content on demand.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::parse_args;
use crate::skills::SkillCatalog;
use crate::tools::registry::{Tool, ToolContext, ToolResult};

pub struct GetSkillTool {
    catalog: SkillCatalog,
}

impl GetSkillTool {
    pub fn new(catalog: SkillCatalog) -> Self {
        Self { catalog }
    }
}

#[derive(Deserialize)]
struct SkillArgs {
    name: String,
}

#[async_trait]
impl Tool for GetSkillTool {
    fn name(&self) -> &str {
        "get_skill"
    }

    fn description(&self) -> &str {
        "Load the full content of an available skill by name."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "description": "Skill name from the Available Skills list"}
            },
            "required": ["name"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> ToolResult {
        let args: SkillArgs = match parse_args(args) {
            Ok(args) => args,
            Err(result) => return result,
        };
        match self.catalog.load_skill(&args.name) {
            Ok(body) => ToolResult::ok(body),
            Err(e) => ToolResult::err(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_known_skill() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("pdf");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("SKILL.md"),
            "---\nname: pdf\ndescription: d\n---\nbody text",
        )
        .unwrap();
        let tool = GetSkillTool::new(SkillCatalog::load(temp.path()));

        let result = tool
            .execute(json!({"name": "pdf"}), &ToolContext::default())
            .await;
        assert!(result.success);
        assert_eq!(result.content, "body text");

        let missing = tool
            .execute(json!({"name": "nope"}), &ToolContext::default())
            .await;
        assert!(!missing.success);
    }
}
