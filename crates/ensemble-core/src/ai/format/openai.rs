//! OpenAI chat/completions format handler.
//!
//! Also serves Gemini, Mistral and Together through their OpenAI-compatible
//! endpoints. Tool-call arguments travel as JSON-encoded strings and stream
//! as fragments keyed by call index.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use serde_json::{json, Value};

use super::{FormatHandler, RequestOptions, StreamParser, ToolCallAccumulator};
use crate::ai::types::{ChatMessage, LlmResponse, Role, StreamPart, ToolCall, Usage};

pub struct OpenAiFormat;

impl FormatHandler for OpenAiFormat {
    fn build_request_body(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &RequestOptions<'_>,
    ) -> Value {
        let converted: Vec<Value> = messages.iter().map(convert_message).collect();

        let mut body = json!({
            "model": model,
            "messages": converted,
            "max_tokens": options.max_tokens,
        });

        if options.streaming {
            body["stream"] = json!(true);
            body["stream_options"] = json!({"include_usage": true});
        }
        if !options.tools.is_empty() {
            let tools: Vec<Value> = options
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }

        body
    }

    fn parse_response(&self, body: &Value) -> Result<LlmResponse> {
        let message = body
            .pointer("/choices/0/message")
            .ok_or_else(|| anyhow!("openai response missing choices[0].message"))?;

        let mut response = LlmResponse {
            content: message
                .get("content")
                .and_then(|c| c.as_str())
                .unwrap_or("")
                .to_string(),
            thinking: message
                .get("reasoning_content")
                .and_then(|c| c.as_str())
                .map(str::to_string),
            ..Default::default()
        };

        for call in message
            .get("tool_calls")
            .and_then(|t| t.as_array())
            .into_iter()
            .flatten()
        {
            let raw_args = call
                .pointer("/function/arguments")
                .and_then(|a| a.as_str())
                .unwrap_or("{}");
            let arguments = serde_json::from_str::<Value>(raw_args)
                .ok()
                .filter(Value::is_object)
                .unwrap_or_else(|| crate::ai::types::raw_arguments(raw_args));
            response.tool_calls.push(ToolCall {
                id: call.get("id").and_then(|i| i.as_str()).unwrap_or("").to_string(),
                name: call
                    .pointer("/function/name")
                    .and_then(|n| n.as_str())
                    .unwrap_or("")
                    .to_string(),
                arguments,
            });
        }

        response.usage = parse_usage(body.get("usage"));
        Ok(response)
    }

    fn new_stream(&self) -> Box<dyn StreamParser> {
        Box::new(OpenAiStream::default())
    }
}

fn convert_message(msg: &ChatMessage) -> Value {
    match msg.role {
        Role::System => json!({"role": "system", "content": msg.content}),
        Role::User => json!({"role": "user", "content": msg.content}),
        Role::Assistant => {
            let mut out = json!({"role": "assistant", "content": msg.content});
            if let Some(calls) = &msg.tool_calls {
                let converted: Vec<Value> = calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": {
                                "name": c.name,
                                "arguments": c.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                out["tool_calls"] = json!(converted);
            }
            out
        }
        Role::Tool => json!({
            "role": "tool",
            "content": msg.content,
            "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
        }),
    }
}

fn parse_usage(value: Option<&Value>) -> Option<Usage> {
    let usage = value?;
    Some(Usage {
        input_tokens: usage
            .get("prompt_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize,
        output_tokens: usage
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize,
    })
}

/// Stateful parser for the chat/completions chunk stream. Tool calls are
/// keyed by their `index` in the delta; completed calls are flushed when the
/// finish reason arrives or the stream ends.
#[derive(Default)]
struct OpenAiStream {
    // BTreeMap keeps flush order stable by call index.
    tool_calls: BTreeMap<u64, ToolCallAccumulator>,
    usage: Option<Usage>,
    finished: bool,
}

impl OpenAiStream {
    fn flush_tool_calls(&mut self) -> Vec<StreamPart> {
        std::mem::take(&mut self.tool_calls)
            .into_values()
            .map(|acc| StreamPart::ToolCallComplete(acc.complete()))
            .collect()
    }
}

impl StreamParser for OpenAiStream {
    fn handle_data(&mut self, data: &str) -> Vec<StreamPart> {
        if data.trim() == "[DONE]" {
            let mut parts = self.finish();
            parts.push(StreamPart::Done);
            return parts;
        }
        let Ok(chunk) = serde_json::from_str::<Value>(data) else {
            return Vec::new();
        };

        if let Some(usage) = parse_usage(chunk.get("usage").filter(|u| !u.is_null())) {
            self.usage = Some(usage);
        }

        let mut parts = Vec::new();
        let Some(choice) = chunk.pointer("/choices/0") else {
            return parts;
        };

        if let Some(delta) = choice.get("delta") {
            if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
                if !text.is_empty() {
                    parts.push(StreamPart::ContentDelta(text.to_string()));
                }
            }
            if let Some(text) = delta.get("reasoning_content").and_then(|c| c.as_str()) {
                if !text.is_empty() {
                    parts.push(StreamPart::ThinkingDelta(text.to_string()));
                }
            }
            for call in delta
                .get("tool_calls")
                .and_then(|t| t.as_array())
                .into_iter()
                .flatten()
            {
                let index = call.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                let acc = self.tool_calls.entry(index).or_default();
                if let Some(id) = call.get("id").and_then(|i| i.as_str()) {
                    acc.id = id.to_string();
                }
                if let Some(name) = call.pointer("/function/name").and_then(|n| n.as_str()) {
                    acc.name.push_str(name);
                }
                if let Some(chunk) = call.pointer("/function/arguments").and_then(|a| a.as_str()) {
                    acc.arguments.push_str(chunk);
                    parts.push(StreamPart::ToolCallPartial {
                        id: acc.id.clone(),
                        name: acc.name.clone(),
                        args_chunk: chunk.to_string(),
                    });
                }
            }
        }

        if choice
            .get("finish_reason")
            .map(|r| !r.is_null())
            .unwrap_or(false)
        {
            parts.extend(self.flush_tool_calls());
        }

        parts
    }

    fn finish(&mut self) -> Vec<StreamPart> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let mut parts = self.flush_tool_calls();
        if let Some(usage) = self.usage.take() {
            parts.push(StreamPart::Usage(usage));
        }
        parts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_tool_calls_serialize_arguments_as_strings() {
        let msg = ChatMessage::assistant_with_calls(
            "",
            None,
            vec![ToolCall {
                id: "c1".into(),
                name: "echo".into(),
                arguments: json!({"text": "hi"}),
            }],
        );
        let converted = convert_message(&msg);
        let args = converted["tool_calls"][0]["function"]["arguments"]
            .as_str()
            .unwrap();
        assert_eq!(serde_json::from_str::<Value>(args).unwrap()["text"], "hi");
    }

    #[test]
    fn parses_blocking_response() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": "4",
                    "tool_calls": [{
                        "id": "c1",
                        "function": {"name": "echo", "arguments": "{\"text\":\"hi\"}"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        });
        let response = OpenAiFormat.parse_response(&body).unwrap();
        assert_eq!(response.content, "4");
        assert_eq!(response.tool_calls[0].arguments["text"], "hi");
        assert_eq!(response.usage.unwrap().output_tokens, 3);
    }

    #[test]
    fn stream_accumulates_split_arguments() {
        let mut parser = OpenAiFormat.new_stream();
        parser.handle_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"echo","arguments":"{\"te"}}]}}]}"#,
        );
        parser.handle_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"xt\":\"hi\"}"}}]}}]}"#,
        );
        let parts = parser.handle_data(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#);
        let completed: Vec<_> = parts
            .iter()
            .filter_map(|p| match p {
                StreamPart::ToolCallComplete(c) => Some(c),
                _ => None,
            })
            .collect();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].arguments["text"], "hi");
    }

    #[test]
    fn done_sentinel_flushes_and_terminates() {
        let mut parser = OpenAiFormat.new_stream();
        parser.handle_data(r#"{"choices":[{"delta":{"content":"hello"}}]}"#);
        let parts = parser.handle_data("[DONE]");
        assert!(matches!(parts.last(), Some(StreamPart::Done)));
    }
}
