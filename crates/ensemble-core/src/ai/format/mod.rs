//! Provider dialect handlers.
//!
//! Each handler knows how to build a request body, parse a blocking
//! response, and parse the provider's SSE events into [`StreamPart`]s.
//! Stream parsing is stateful (argument fragments accumulate per call), so
//! handlers hand out a fresh [`StreamParser`] per request.

use serde_json::Value;

use crate::ai::types::{ChatMessage, LlmResponse, StreamPart, ToolDef};

pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicFormat;
pub use openai::OpenAiFormat;

/// Per-request options threaded into body construction.
pub struct RequestOptions<'a> {
    pub max_tokens: usize,
    pub streaming: bool,
    pub tools: &'a [ToolDef],
}

/// A provider dialect.
pub trait FormatHandler: Send + Sync {
    /// Build the JSON request body for this dialect.
    fn build_request_body(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &RequestOptions<'_>,
    ) -> Value;

    /// Parse a complete (non-streaming) response body.
    fn parse_response(&self, body: &Value) -> anyhow::Result<LlmResponse>;

    /// Start a stateful parser for one SSE stream.
    fn new_stream(&self) -> Box<dyn StreamParser>;
}

/// Stateful SSE parser for a single request.
pub trait StreamParser: Send {
    /// Feed one `data:` payload; returns zero or more stream parts.
    fn handle_data(&mut self, data: &str) -> Vec<StreamPart>;

    /// Flush at end of stream. Incomplete tool calls are force-completed
    /// here (with raw arguments when the accumulated JSON does not parse).
    fn finish(&mut self) -> Vec<StreamPart>;
}

/// Accumulates streamed tool-call argument fragments for one call.
#[derive(Debug, Default, Clone)]
pub struct ToolCallAccumulator {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCallAccumulator {
    pub fn new(id: String, name: String) -> Self {
        Self {
            id,
            name,
            arguments: String::new(),
        }
    }

    /// Finalize into a complete tool call. Empty arguments become `{}`;
    /// unparseable arguments are wrapped as raw text.
    pub fn complete(self) -> crate::ai::types::ToolCall {
        let arguments = if self.arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            match serde_json::from_str::<Value>(&self.arguments) {
                Ok(Value::Object(map)) => Value::Object(map),
                Ok(other) => serde_json::json!({ "value": other }),
                Err(_) => crate::ai::types::raw_arguments(&self.arguments),
            }
        };
        crate::ai::types::ToolCall {
            id: self.id,
            name: self.name,
            arguments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_completes_valid_json() {
        let mut acc = ToolCallAccumulator::new("c1".into(), "echo".into());
        acc.arguments.push_str("{\"text\":");
        acc.arguments.push_str("\"hi\"}");
        let call = acc.complete();
        assert_eq!(call.arguments["text"], "hi");
    }

    #[test]
    fn accumulator_wraps_malformed_json_as_raw() {
        let mut acc = ToolCallAccumulator::new("c1".into(), "echo".into());
        acc.arguments.push_str("{broken");
        let call = acc.complete();
        assert!(crate::ai::types::arguments_are_raw(&call.arguments));
    }

    #[test]
    fn accumulator_defaults_empty_arguments_to_object() {
        let acc = ToolCallAccumulator::new("c1".into(), "noop".into());
        assert_eq!(acc.complete().arguments, serde_json::json!({}));
    }
}
