//! get_user_input - pause the run and request values from the user.
//!
//! The tool body never runs: the agent loop detects calls to this name,
//! suspends, and yields an input request to its caller. The caller answers
//! with a follow-up user message and the loop resumes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tools::registry::{Tool, ToolContext, ToolResult};

pub const USER_INPUT_TOOL: &str = "get_user_input";

/// One field the user is asked to fill in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputField {
    pub name: String,
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: String,
    pub description: String,
}

fn default_field_type() -> String {
    "string".to_string()
}

/// Decode the field list out of a `get_user_input` call's arguments.
pub fn parse_input_fields(arguments: &Value) -> (Vec<InputField>, Option<String>) {
    let fields = arguments
        .get("user_input_fields")
        .and_then(|f| f.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    Some(InputField {
                        name: item.get("field_name")?.as_str()?.to_string(),
                        field_type: item
                            .get("field_type")
                            .and_then(|t| t.as_str())
                            .unwrap_or("string")
                            .to_string(),
                        description: item
                            .get("field_description")
                            .and_then(|d| d.as_str())
                            .unwrap_or("")
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let context = arguments
        .get("context")
        .and_then(|c| c.as_str())
        .map(str::to_string);

    (fields, context)
}

pub struct GetUserInputTool;

#[async_trait]
impl Tool for GetUserInputTool {
    fn name(&self) -> &str {
        USER_INPUT_TOOL
    }

    fn description(&self) -> &str {
        "Request additional information from the user. Use this when you need \
         clarification or missing information to complete a task. Provide all \
         required fields as if the user were filling out a form."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_input_fields": {
                    "type": "array",
                    "description": "List of fields requiring user input",
                    "items": {
                        "type": "object",
                        "properties": {
                            "field_name": {
                                "type": "string",
                                "description": "The name of the field"
                            },
                            "field_type": {
                                "type": "string",
                                "description": "The type of the field",
                                "enum": ["string", "int", "float", "bool"]
                            },
                            "field_description": {
                                "type": "string",
                                "description": "What information is needed"
                            }
                        },
                        "required": ["field_name", "field_description"]
                    }
                },
                "context": {
                    "type": "string",
                    "description": "Why this input is needed"
                }
            },
            "required": ["user_input_fields"]
        })
    }

    fn instructions(&self) -> Option<String> {
        Some(
            "## Requesting user input\n\
             Use `get_user_input` only when you cannot proceed without information \
             the user has not provided. Ask for every missing field in one call, \
             with clear descriptions, and never ask for values you already have."
                .to_string(),
        )
    }

    fn add_instructions_to_prompt(&self) -> bool {
        true
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> ToolResult {
        // Interception happens in the loop; reaching here means a registry
        // without a loop in front of it.
        ToolResult::err("get_user_input must be handled by the agent loop")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fields_and_context() {
        let arguments = json!({
            "user_input_fields": [
                {"field_name": "city", "field_type": "string", "field_description": "Which city?"},
                {"field_name": "days", "field_type": "int", "field_description": "How many days?"}
            ],
            "context": "Needed for the forecast"
        });
        let (fields, context) = parse_input_fields(&arguments);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "city");
        assert_eq!(fields[1].field_type, "int");
        assert_eq!(context.as_deref(), Some("Needed for the forecast"));
    }

    #[test]
    fn missing_fields_yield_empty_list() {
        let (fields, context) = parse_input_fields(&json!({}));
        assert!(fields.is_empty());
        assert!(context.is_none());
    }
}
