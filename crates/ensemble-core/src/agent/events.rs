//! Canonical event protocol for the agent loop.
//!
//! `AgentEvent` is the single source of truth for everything a run emits.
//! The run logger, the trace logger, the SSE layer and tests all consume
//! this enum; none of them get their own event shape.

use serde::Serialize;
use serde_json::Value;

use crate::tools::implementations::InputField;

/// Events emitted by the agent loop, in strict program order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Where this run's JSONL log is being written, emitted once at start
    /// when file logging is on.
    LogFile { path: String },

    /// A step is starting. `token_count` is measured after any compaction.
    Step {
        step: usize,
        max_steps: usize,
        token_count: usize,
        token_limit: usize,
    },

    /// Text content delta from the model.
    ContentDelta { delta: String },

    /// Thinking delta from the model.
    ThinkingDelta { delta: String },

    /// A model turn finished.
    Response {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        thinking: Option<String>,
        tool_call_count: usize,
    },

    /// A tool is about to execute.
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },

    /// A tool finished.
    ToolResult {
        id: String,
        name: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        duration_ms: u64,
    },

    /// The run suspended waiting for out-of-band user input.
    UserInputRequired {
        tool_call_id: String,
        fields: Vec<InputField>,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },

    /// Terminal: the run finished (including the max-steps case, which is
    /// terminal but not an error).
    Completion {
        message: String,
        steps: usize,
        reason: String,
    },

    /// Terminal: the run failed.
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl AgentEvent {
    /// Whether this event ends the run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completion { .. } | Self::Error { .. } | Self::UserInputRequired { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_snake_case_tagged() {
        let event = AgentEvent::Step {
            step: 1,
            max_steps: 50,
            token_count: 10,
            token_limit: 1000,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "step");
        assert_eq!(value["token_count"], 10);

        let event = AgentEvent::UserInputRequired {
            tool_call_id: "c1".into(),
            fields: Vec::new(),
            context: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "user_input_required");
        assert!(value.get("context").is_none());
    }
}
