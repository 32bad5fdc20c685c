//! HTTP client for provider endpoints.
//!
//! One client per configured model. Blocking calls go through
//! [`LlmClient::generate`]; streaming calls return an unbounded channel of
//! [`StreamPart`]s fed by a spawned SSE reader task.

mod config;

pub use config::LlmClientConfig;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::ai::format::{AnthropicFormat, FormatHandler, OpenAiFormat, RequestOptions};
use crate::ai::models::{ApiFormat, Provider};
use crate::ai::retry::{with_retry, CallError};
use crate::ai::types::{ChatMessage, LlmResponse, StreamPart, ToolDef};
use crate::ai::ModelBackend;

pub struct LlmClient {
    config: LlmClientConfig,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmClientConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { config, http }
    }

    pub fn config(&self) -> &LlmClientConfig {
        &self.config
    }

    fn format_handler(&self) -> &'static dyn FormatHandler {
        match self.config.api_format() {
            ApiFormat::Anthropic => &AnthropicFormat,
            ApiFormat::OpenAi => &OpenAiFormat,
        }
    }

    /// Resolve the effective output budget, capping at the provider ceiling.
    /// The cap is logged once per call.
    fn effective_max_tokens(&self, requested: Option<usize>) -> usize {
        let requested = requested.unwrap_or(self.config.max_tokens);
        let ceiling = self.config.provider().max_output_ceiling();
        if requested > ceiling {
            warn!(
                requested,
                ceiling,
                model = %self.config.model,
                "max_tokens above provider ceiling, capping"
            );
            ceiling
        } else {
            requested
        }
    }

    fn build_request(&self, body: &Value) -> reqwest::RequestBuilder {
        let mut request = self.http.post(self.config.api_url()).json(body);
        if let Some(key) = &self.config.api_key {
            request = match self.config.provider() {
                Provider::Anthropic => request
                    .header("x-api-key", key)
                    .header("anthropic-version", "2023-06-01"),
                _ => request.bearer_auth(key),
            };
        }
        request
    }

    async fn send_checked(&self, body: &Value) -> Result<reqwest::Response, CallError> {
        let response = self
            .build_request(body)
            .send()
            .await
            .map_err(|e| CallError::Transient(anyhow!("transport error: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        Err(CallError::from_status(
            status.as_u16(),
            anyhow!("provider returned {status}: {text}"),
        ))
    }
}

#[async_trait]
impl ModelBackend for LlmClient {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDef],
        max_tokens: Option<usize>,
    ) -> Result<LlmResponse> {
        let handler = self.format_handler();
        let options = RequestOptions {
            max_tokens: self.effective_max_tokens(max_tokens),
            streaming: false,
            tools,
        };
        let body = handler.build_request_body(self.config.bare_model(), messages, &options);
        debug!(model = %self.config.model, messages = messages.len(), "llm generate");

        let response_body: Value = with_retry("llm generate", || async {
            let response = self.send_checked(&body).await?;
            response
                .json::<Value>()
                .await
                .map_err(|e| CallError::Transient(anyhow!("response decode error: {e}")))
        })
        .await?;

        handler.parse_response(&response_body)
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDef],
        max_tokens: Option<usize>,
    ) -> Result<mpsc::UnboundedReceiver<StreamPart>> {
        let handler = self.format_handler();
        let options = RequestOptions {
            max_tokens: self.effective_max_tokens(max_tokens),
            streaming: true,
            tools,
        };
        let body = handler.build_request_body(self.config.bare_model(), messages, &options);
        debug!(model = %self.config.model, messages = messages.len(), "llm stream");

        // Retry covers connection + status; once the stream is open, errors
        // surface as StreamPart::Error instead.
        let response =
            with_retry("llm stream", || async { self.send_checked(&body).await }).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut parser = handler.new_stream();

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut lines = SseLineBuffer::default();
            let mut done = false;

            'read: while let Some(chunk) = byte_stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(StreamPart::Error(format!("stream read error: {e}")));
                        return;
                    }
                };
                for data in lines.push(&bytes) {
                    for part in parser.handle_data(&data) {
                        let is_done = matches!(part, StreamPart::Done);
                        if tx.send(part).is_err() {
                            return;
                        }
                        if is_done {
                            done = true;
                            break 'read;
                        }
                    }
                }
            }

            if !done {
                for part in parser.finish() {
                    let _ = tx.send(part);
                }
                let _ = tx.send(StreamPart::Done);
            }
        });

        Ok(rx)
    }
}

/// Splits a byte stream into SSE `data:` payloads across chunk boundaries.
#[derive(Default)]
struct SseLineBuffer {
    buffer: String,
}

impl SseLineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        let mut out = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end();
            if let Some(data) = line.strip_prefix("data:") {
                out.push(data.trim_start().to_string());
            }
        }
        out
    }
}
