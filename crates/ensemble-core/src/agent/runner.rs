//! The agent loop: a bounded step machine.
//!
//! One step is compact -> model call -> tool dispatch. The loop terminates
//! deterministically: no tool calls means done, the step budget is a hard
//! bound checked before each step, tool failures never propagate (the model
//! sees them as tool results), and only unrecoverable provider failures or
//! context overflow end a run in error.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;

use super::events::AgentEvent;
use super::state::{AgentState, AgentStatus, PendingInput};
use crate::ai::types::{arguments_are_raw, ChatMessage, LlmResponse, StreamPart, ToolCall, ToolDef};
use crate::ai::ModelBackend;
use crate::constants;
use crate::context::{Compactor, TokenCounter};
use crate::logging::RunLogger;
use crate::tools::implementations::{parse_input_fields, USER_INPUT_TOOL};
use crate::tools::registry::{ToolContext, ToolRegistry, ToolResult};

/// Per-run loop configuration.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub max_steps: usize,
    pub token_limit: usize,
    pub streaming: bool,
    pub enable_summarization: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_steps: constants::agent::DEFAULT_MAX_STEPS,
            token_limit: constants::agent::DEFAULT_TOKEN_LIMIT,
            streaming: false,
            enable_summarization: true,
        }
    }
}

/// Terminal summary of one `AgentLoop::run` invocation.
#[derive(Debug, Clone)]
pub struct LoopResult {
    pub status: AgentStatus,
    pub content: String,
    pub steps: usize,
    pub success: bool,
    pub reason: String,
}

enum StepOutcome {
    Continue,
    Completed { content: String },
    WaitingInput,
    Failed { message: String, reason: Option<String> },
}

pub struct AgentLoop {
    backend: Arc<dyn ModelBackend>,
    registry: Arc<ToolRegistry>,
    counter: TokenCounter,
    compactor: Compactor,
    config: RunConfig,
    logger: Arc<RunLogger>,
}

impl AgentLoop {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        registry: Arc<ToolRegistry>,
        counter: TokenCounter,
        config: RunConfig,
        logger: Arc<RunLogger>,
    ) -> Self {
        let compactor = Compactor::new(backend.clone(), counter.clone());
        Self {
            backend,
            registry,
            counter,
            compactor,
            config,
            logger,
        }
    }

    /// Drive the loop until a terminal state. `state.status` must already be
    /// `Running` (fresh run or resumption).
    pub async fn run(
        &self,
        state: &mut AgentState,
        ctx: &ToolContext,
        events: &mpsc::UnboundedSender<AgentEvent>,
    ) -> LoopResult {
        while state.step < self.config.max_steps {
            if ctx.cancel.is_cancelled() {
                return self.fail(state, events, "run cancelled", Some("cancelled"));
            }
            state.increment_step();

            match self.execute_step(state, ctx, events).await {
                StepOutcome::Continue => {}
                StepOutcome::Completed { content } => {
                    state.mark_completed();
                    let event = AgentEvent::Completion {
                        message: content.clone(),
                        steps: state.step,
                        reason: "completed".to_string(),
                    };
                    self.emit(events, event);
                    self.logger.log(
                        "completion",
                        json!({
                            "message": content,
                            "steps": state.step,
                            "input_tokens": state.total_input_tokens,
                            "output_tokens": state.total_output_tokens,
                        }),
                    );
                    return LoopResult {
                        status: AgentStatus::Completed,
                        content,
                        steps: state.step,
                        success: true,
                        reason: "completed".to_string(),
                    };
                }
                StepOutcome::WaitingInput => {
                    return LoopResult {
                        status: AgentStatus::WaitingInput,
                        content: String::new(),
                        steps: state.step,
                        success: true,
                        reason: "waiting_input".to_string(),
                    };
                }
                StepOutcome::Failed { message, reason } => {
                    return self.fail(state, events, &message, reason.as_deref());
                }
            }
        }

        // Step budget exhausted: terminal but not an error.
        state.mark_max_steps();
        let content = state.last_assistant_content().unwrap_or("").to_string();
        self.emit(
            events,
            AgentEvent::Completion {
                message: content.clone(),
                steps: state.step,
                reason: "max_steps_reached".to_string(),
            },
        );
        self.logger.log(
            "completion",
            json!({"message": content, "steps": state.step, "reason": "max_steps_reached"}),
        );
        LoopResult {
            status: AgentStatus::MaxSteps,
            content,
            steps: state.step,
            success: true,
            reason: "max_steps_reached".to_string(),
        }
    }

    async fn execute_step(
        &self,
        state: &mut AgentState,
        ctx: &ToolContext,
        events: &mpsc::UnboundedSender<AgentEvent>,
    ) -> StepOutcome {
        // Compaction guard before the model sees the list.
        let mut token_count = self.counter.count(&state.messages);
        if token_count > self.config.token_limit && self.config.enable_summarization {
            match self
                .compactor
                .maybe_compact(state.messages.clone(), self.config.token_limit)
                .await
            {
                Ok(compacted) => {
                    state.messages = compacted;
                    token_count = self.counter.count(&state.messages);
                }
                Err(e) => {
                    return StepOutcome::Failed {
                        message: e.to_string(),
                        reason: Some("context_overflow".to_string()),
                    }
                }
            }
        }

        self.emit(
            events,
            AgentEvent::Step {
                step: state.step,
                max_steps: self.config.max_steps,
                token_count,
                token_limit: self.config.token_limit,
            },
        );
        self.logger.log(
            "step",
            json!({
                "step": state.step,
                "max_steps": self.config.max_steps,
                "token_count": token_count,
                "token_limit": self.config.token_limit,
            }),
        );

        let tools = self.registry.defs().await;
        self.logger.log(
            "request",
            json!({
                "message_count": state.messages.len(),
                "tool_count": tools.len(),
                "streaming": self.config.streaming,
            }),
        );

        let response = if self.config.streaming {
            self.stream_model_turn(state, &tools, events).await
        } else {
            self.backend.generate(&state.messages, &tools, None).await
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                return StepOutcome::Failed {
                    message: format!("LLM call failed: {e:#}"),
                    reason: None,
                }
            }
        };

        if let Some(usage) = response.usage {
            state.add_usage(usage);
        }

        self.emit(
            events,
            AgentEvent::Response {
                content: response.content.clone(),
                thinking: response.thinking.clone(),
                tool_call_count: response.tool_calls.len(),
            },
        );
        self.logger.log(
            "response",
            json!({
                "content": response.content,
                "thinking": response.thinking,
                "tool_call_count": response.tool_calls.len(),
            }),
        );

        state.messages.push(ChatMessage::assistant_with_calls(
            response.content.clone(),
            response.thinking.clone(),
            response.tool_calls.clone(),
        ));

        if response.tool_calls.is_empty() {
            return StepOutcome::Completed {
                content: response.content,
            };
        }

        self.dispatch_tools(state, ctx, events, &response.tool_calls)
            .await
    }

    /// Execute the turn's tool calls in order. Human-input calls suspend the
    /// run after every other call has been answered, so the tool_call_id
    /// bijection holds across the pause.
    async fn dispatch_tools(
        &self,
        state: &mut AgentState,
        ctx: &ToolContext,
        events: &mpsc::UnboundedSender<AgentEvent>,
        tool_calls: &[ToolCall],
    ) -> StepOutcome {
        let first_input_call = tool_calls.iter().find(|c| c.name == USER_INPUT_TOOL);
        let mut cancelled = false;

        for call in tool_calls {
            if call.name == USER_INPUT_TOOL {
                continue;
            }

            self.emit(
                events,
                AgentEvent::ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            );

            let start = Instant::now();
            let result = if cancelled || ctx.cancel.is_cancelled() {
                cancelled = true;
                ToolResult::err("run cancelled before execution")
            } else if arguments_are_raw(&call.arguments) {
                ToolResult::err("invalid_tool_arguments")
            } else {
                self.registry
                    .invoke(&call.name, call.arguments.clone(), ctx)
                    .await
            };
            let duration_ms = (start.elapsed().as_millis() as u64).max(1);

            self.emit(
                events,
                AgentEvent::ToolResult {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    success: result.success,
                    content: result.success.then(|| result.content.clone()),
                    error: result.error.clone(),
                    duration_ms,
                },
            );
            self.logger.log(
                "tool_execution",
                json!({
                    "tool": call.name,
                    "tool_call_id": call.id,
                    "success": result.success,
                    "duration_ms": duration_ms,
                }),
            );

            state.messages.push(ChatMessage::tool(
                result.transcript_content(),
                &call.id,
                &call.name,
            ));
        }

        if let Some(input_call) = first_input_call {
            // Any duplicate input requests in the same turn are answered
            // synthetically so every call id stays paired.
            for duplicate in tool_calls
                .iter()
                .filter(|c| c.name == USER_INPUT_TOOL && c.id != input_call.id)
            {
                state.messages.push(ChatMessage::tool(
                    "Duplicate input request ignored; ask for all fields in one call.",
                    &duplicate.id,
                    USER_INPUT_TOOL,
                ));
            }

            let (fields, context) = parse_input_fields(&input_call.arguments);
            let pending = PendingInput {
                tool_call_id: input_call.id.clone(),
                fields: fields.clone(),
                context: context.clone(),
            };
            state.mark_waiting_input(pending);
            self.emit(
                events,
                AgentEvent::UserInputRequired {
                    tool_call_id: input_call.id.clone(),
                    fields,
                    context,
                },
            );
            debug!(tool_call_id = %input_call.id, "run suspended for user input");
            return StepOutcome::WaitingInput;
        }

        if cancelled {
            return StepOutcome::Failed {
                message: "run cancelled".to_string(),
                reason: Some("cancelled".to_string()),
            };
        }
        StepOutcome::Continue
    }

    /// Streaming model turn: forward deltas as they arrive, reassemble the
    /// full response from the parts.
    async fn stream_model_turn(
        &self,
        state: &AgentState,
        tools: &[ToolDef],
        events: &mpsc::UnboundedSender<AgentEvent>,
    ) -> anyhow::Result<LlmResponse> {
        let mut rx = self.backend.stream(&state.messages, tools, None).await?;
        let mut response = LlmResponse::default();

        while let Some(part) = rx.recv().await {
            match part {
                StreamPart::ContentDelta(delta) => {
                    response.content.push_str(&delta);
                    self.emit(events, AgentEvent::ContentDelta { delta });
                }
                StreamPart::ThinkingDelta(delta) => {
                    response
                        .thinking
                        .get_or_insert_with(String::new)
                        .push_str(&delta);
                    self.emit(events, AgentEvent::ThinkingDelta { delta });
                }
                StreamPart::ToolCallPartial { .. } => {}
                StreamPart::ToolCallComplete(call) => response.tool_calls.push(call),
                StreamPart::Usage(usage) => response.usage = Some(usage),
                StreamPart::Done => break,
                StreamPart::Error(message) => {
                    return Err(anyhow::anyhow!("stream error: {message}"))
                }
            }
        }

        Ok(response)
    }

    fn fail(
        &self,
        state: &mut AgentState,
        events: &mpsc::UnboundedSender<AgentEvent>,
        message: &str,
        reason: Option<&str>,
    ) -> LoopResult {
        state.mark_error(message);
        self.emit(
            events,
            AgentEvent::Error {
                message: message.to_string(),
                reason: reason.map(str::to_string),
            },
        );
        self.logger
            .log("completion", json!({"error": message, "reason": reason}));
        LoopResult {
            status: AgentStatus::Error,
            content: message.to_string(),
            steps: state.step,
            success: false,
            reason: reason.unwrap_or("error").to_string(),
        }
    }

    fn emit(&self, events: &mpsc::UnboundedSender<AgentEvent>, event: AgentEvent) {
        // A dropped receiver just means nobody is watching.
        let _ = events.send(event);
    }
}
