//! Anthropic Messages API format handler.
//!
//! The Messages API wants the system prompt in a top-level `system` field,
//! strict user/assistant alternation, and tool results delivered as user
//! messages carrying `tool_result` blocks.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use serde_json::{json, Value};

use super::{FormatHandler, RequestOptions, StreamParser, ToolCallAccumulator};
use crate::ai::types::{ChatMessage, LlmResponse, Role, StreamPart, ToolCall, Usage};

pub struct AnthropicFormat;

impl FormatHandler for AnthropicFormat {
    fn build_request_body(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &RequestOptions<'_>,
    ) -> Value {
        let system = collect_system_text(messages);
        let converted = convert_messages(messages);

        let mut body = json!({
            "model": model,
            "messages": converted,
            "max_tokens": options.max_tokens,
        });

        if options.streaming {
            body["stream"] = json!(true);
        }
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        if !options.tools.is_empty() {
            let tools: Vec<Value> = options
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }

        body
    }

    fn parse_response(&self, body: &Value) -> Result<LlmResponse> {
        let blocks = body
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| anyhow!("anthropic response missing content array"))?;

        let mut response = LlmResponse::default();
        for block in blocks {
            match block.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                        response.content.push_str(text);
                    }
                }
                Some("thinking") => {
                    if let Some(text) = block.get("thinking").and_then(|t| t.as_str()) {
                        response
                            .thinking
                            .get_or_insert_with(String::new)
                            .push_str(text);
                    }
                }
                Some("tool_use") => {
                    response.tool_calls.push(ToolCall {
                        id: str_field(block, "id"),
                        name: str_field(block, "name"),
                        arguments: block.get("input").cloned().unwrap_or_else(|| json!({})),
                    });
                }
                _ => {}
            }
        }

        response.usage = parse_usage(body.get("usage"));
        Ok(response)
    }

    fn new_stream(&self) -> Box<dyn StreamParser> {
        Box::new(AnthropicStream::default())
    }
}

/// Concatenate all system-role message contents.
fn collect_system_text(messages: &[ChatMessage]) -> String {
    let mut combined = String::new();
    for msg in messages.iter().filter(|m| m.role == Role::System) {
        if !combined.is_empty() {
            combined.push_str("\n\n");
        }
        combined.push_str(&msg.content);
    }
    combined
}

/// Convert non-system messages to Anthropic shape. Tool results become user
/// messages; consecutive same-role messages are merged rather than padded.
fn convert_messages(messages: &[ChatMessage]) -> Vec<Value> {
    let mut result: Vec<Value> = Vec::new();

    for msg in messages.iter().filter(|m| m.role != Role::System) {
        let (role, blocks) = match msg.role {
            Role::User => (
                "user",
                vec![json!({"type": "text", "text": msg.content})],
            ),
            Role::Assistant => {
                let mut blocks = Vec::new();
                if !msg.content.is_empty() {
                    blocks.push(json!({"type": "text", "text": msg.content}));
                }
                for call in msg.tool_calls.iter().flatten() {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": call.arguments,
                    }));
                }
                if blocks.is_empty() {
                    blocks.push(json!({"type": "text", "text": ""}));
                }
                ("assistant", blocks)
            }
            Role::Tool => (
                "user",
                vec![json!({
                    "type": "tool_result",
                    "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                    "content": msg.content,
                })],
            ),
            Role::System => unreachable!(),
        };

        // The API requires alternation; fold same-role neighbors together.
        if let Some(last) = result.last_mut() {
            if last["role"] == role {
                if let Some(existing) = last["content"].as_array_mut() {
                    existing.extend(blocks);
                    continue;
                }
            }
        }
        result.push(json!({"role": role, "content": blocks}));
    }

    result
}

fn parse_usage(value: Option<&Value>) -> Option<Usage> {
    let usage = value?;
    Some(Usage {
        input_tokens: usage.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as usize,
        output_tokens: usage.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as usize,
    })
}

fn str_field(value: &Value, key: &str) -> String {
    value.get(key).and_then(|v| v.as_str()).unwrap_or("").to_string()
}

/// Stateful parser for the Messages API event stream. Tool-use blocks are
/// keyed by content block index and completed on `content_block_stop`.
#[derive(Default)]
struct AnthropicStream {
    tool_blocks: HashMap<u64, ToolCallAccumulator>,
    usage: Usage,
    saw_usage: bool,
}

impl StreamParser for AnthropicStream {
    fn handle_data(&mut self, data: &str) -> Vec<StreamPart> {
        let Ok(event) = serde_json::from_str::<Value>(data) else {
            return Vec::new();
        };
        let event_type = event.get("type").and_then(|t| t.as_str()).unwrap_or("");
        let index = event.get("index").and_then(|i| i.as_u64()).unwrap_or(0);

        match event_type {
            "content_block_start" => {
                let Some(block) = event.get("content_block") else {
                    return Vec::new();
                };
                if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                    let acc =
                        ToolCallAccumulator::new(str_field(block, "id"), str_field(block, "name"));
                    let part = StreamPart::ToolCallPartial {
                        id: acc.id.clone(),
                        name: acc.name.clone(),
                        args_chunk: String::new(),
                    };
                    self.tool_blocks.insert(index, acc);
                    return vec![part];
                }
                Vec::new()
            }
            "content_block_delta" => {
                let Some(delta) = event.get("delta") else {
                    return Vec::new();
                };
                match delta.get("type").and_then(|t| t.as_str()) {
                    Some("text_delta") => {
                        vec![StreamPart::ContentDelta(str_field(delta, "text"))]
                    }
                    Some("thinking_delta") => {
                        vec![StreamPart::ThinkingDelta(str_field(delta, "thinking"))]
                    }
                    Some("input_json_delta") => {
                        let chunk = str_field(delta, "partial_json");
                        if let Some(acc) = self.tool_blocks.get_mut(&index) {
                            acc.arguments.push_str(&chunk);
                            return vec![StreamPart::ToolCallPartial {
                                id: acc.id.clone(),
                                name: acc.name.clone(),
                                args_chunk: chunk,
                            }];
                        }
                        Vec::new()
                    }
                    _ => Vec::new(),
                }
            }
            "content_block_stop" => {
                if let Some(acc) = self.tool_blocks.remove(&index) {
                    return vec![StreamPart::ToolCallComplete(acc.complete())];
                }
                Vec::new()
            }
            "message_start" => {
                if let Some(usage) = event.pointer("/message/usage") {
                    if let Some(parsed) = parse_usage(Some(usage)) {
                        self.usage.input_tokens = parsed.input_tokens;
                        self.saw_usage = true;
                    }
                }
                Vec::new()
            }
            "message_delta" => {
                if let Some(tokens) = event.pointer("/usage/output_tokens").and_then(|v| v.as_u64()) {
                    self.usage.output_tokens = tokens as usize;
                    self.saw_usage = true;
                }
                Vec::new()
            }
            "message_stop" => {
                let mut parts = self.finish();
                parts.push(StreamPart::Done);
                parts
            }
            "error" => {
                let message = event
                    .pointer("/error/message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown provider error");
                vec![StreamPart::Error(message.to_string())]
            }
            _ => Vec::new(),
        }
    }

    fn finish(&mut self) -> Vec<StreamPart> {
        let mut parts: Vec<StreamPart> = self
            .tool_blocks
            .drain()
            .map(|(_, acc)| StreamPart::ToolCallComplete(acc.complete()))
            .collect();
        if self.saw_usage {
            parts.push(StreamPart::Usage(self.usage));
            self.saw_usage = false;
        }
        parts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::types::ToolDef;

    fn handler() -> AnthropicFormat {
        AnthropicFormat
    }

    #[test]
    fn system_message_lands_in_system_field() {
        let messages = vec![ChatMessage::system("be helpful"), ChatMessage::user("hi")];
        let body = handler().build_request_body(
            "claude-3-5-sonnet",
            &messages,
            &RequestOptions {
                max_tokens: 100,
                streaming: false,
                tools: &[],
            },
        );
        assert_eq!(body["system"], "be helpful");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn tool_result_becomes_user_tool_result_block() {
        let messages = vec![
            ChatMessage::user("go"),
            ChatMessage::assistant_with_calls(
                "",
                None,
                vec![ToolCall {
                    id: "c1".into(),
                    name: "echo".into(),
                    arguments: json!({"text": "hi"}),
                }],
            ),
            ChatMessage::tool("hi", "c1", "echo"),
        ];
        let body = handler().build_request_body(
            "claude-3-5-sonnet",
            &messages,
            &RequestOptions {
                max_tokens: 100,
                streaming: false,
                tools: &[],
            },
        );
        let converted = body["messages"].as_array().unwrap();
        assert_eq!(converted.len(), 3);
        assert_eq!(converted[2]["role"], "user");
        assert_eq!(converted[2]["content"][0]["type"], "tool_result");
        assert_eq!(converted[2]["content"][0]["tool_use_id"], "c1");
    }

    #[test]
    fn tools_use_input_schema_key() {
        let tools = vec![ToolDef {
            name: "echo".into(),
            description: "echo".into(),
            parameters: json!({"type": "object"}),
        }];
        let body = handler().build_request_body(
            "claude-3-5-sonnet",
            &[ChatMessage::user("hi")],
            &RequestOptions {
                max_tokens: 100,
                streaming: true,
                tools: &tools,
            },
        );
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn parses_blocking_response_with_tool_use() {
        let body = json!({
            "content": [
                {"type": "text", "text": "calling"},
                {"type": "tool_use", "id": "c9", "name": "echo", "input": {"text": "hi"}}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 5}
        });
        let response = handler().parse_response(&body).unwrap();
        assert_eq!(response.content, "calling");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].arguments["text"], "hi");
        assert_eq!(response.usage.unwrap().input_tokens, 10);
    }

    #[test]
    fn stream_reassembles_tool_arguments() {
        let mut parser = handler().new_stream();
        parser.handle_data(
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"c1","name":"echo"}}"#,
        );
        parser.handle_data(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"text\":"}}"#,
        );
        parser.handle_data(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"\"hi\"}"}}"#,
        );
        let parts = parser.handle_data(r#"{"type":"content_block_stop","index":0}"#);
        let StreamPart::ToolCallComplete(call) = &parts[0] else {
            panic!("expected completed call, got {parts:?}");
        };
        assert_eq!(call.arguments["text"], "hi");
    }

    #[test]
    fn stream_finish_flushes_incomplete_call_as_raw() {
        let mut parser = handler().new_stream();
        parser.handle_data(
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"c1","name":"echo"}}"#,
        );
        parser.handle_data(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"tex"}}"#,
        );
        let parts = parser.finish();
        let StreamPart::ToolCallComplete(call) = &parts[0] else {
            panic!("expected completed call");
        };
        assert!(crate::ai::types::arguments_are_raw(&call.arguments));
    }
}
