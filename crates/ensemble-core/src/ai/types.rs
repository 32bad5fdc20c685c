//! Wire types for provider communication.
//!
//! These are NOT domain types - they mirror what the provider APIs exchange.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message role in a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single conversation message.
///
/// Invariant: every `Tool` message references a prior assistant tool call via
/// `tool_call_id`, and every assistant tool call is answered before the next
/// assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool name, set on `Tool` messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn assistant_with_calls(
        content: impl Into<String>,
        thinking: Option<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            thinking,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            tool_call_id: None,
            name: None,
        }
    }

    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            thinking: None,
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            thinking: None,
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }
}

/// A tool invocation requested by the model. `id` is unique within a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Always a JSON object; malformed streamed arguments arrive wrapped as
    /// `{"_raw": "<text>"}`.
    pub arguments: Value,
}

/// Tool definition sent to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// A complete (non-streaming) model response.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub content: String,
    pub thinking: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
}

/// Incremental parts of a streaming model response.
#[derive(Debug, Clone)]
pub enum StreamPart {
    ContentDelta(String),
    ThinkingDelta(String),
    /// Raw argument fragment for an in-flight tool call.
    ToolCallPartial {
        id: String,
        name: String,
        args_chunk: String,
    },
    /// Arguments reassembled into a complete call.
    ToolCallComplete(ToolCall),
    Usage(Usage),
    Done,
    Error(String),
}

/// Wrap raw text that failed to parse as JSON arguments.
pub fn raw_arguments(text: &str) -> Value {
    serde_json::json!({ "_raw": text })
}

/// True when `arguments` came from unparseable streamed text.
pub fn arguments_are_raw(arguments: &Value) -> bool {
    arguments.get("_raw").is_some() && arguments.as_object().map(|o| o.len()) == Some(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_message_carries_call_id_and_name() {
        let msg = ChatMessage::tool("output", "call_1", "echo");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.name.as_deref(), Some("echo"));
    }

    #[test]
    fn raw_arguments_detection() {
        assert!(arguments_are_raw(&raw_arguments("{not json")));
        assert!(!arguments_are_raw(&serde_json::json!({"x": 1})));
        assert!(!arguments_are_raw(&serde_json::json!({"_raw": "a", "b": 2})));
    }
}
