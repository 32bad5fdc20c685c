//! Run state machine.

use serde::Serialize;

use crate::ai::types::{ChatMessage, Usage};
use crate::tools::implementations::InputField;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Running,
    WaitingInput,
    Completed,
    /// Terminal but not an error: the step budget ran out.
    MaxSteps,
    Error,
}

/// The suspended input request while status is `WaitingInput`.
#[derive(Debug, Clone, Serialize)]
pub struct PendingInput {
    pub tool_call_id: String,
    pub fields: Vec<InputField>,
    pub context: Option<String>,
}

/// Mutable per-run state: message list, step counter, token totals, and the
/// suspension bookkeeping for the human-input bridge.
#[derive(Debug)]
pub struct AgentState {
    pub status: AgentStatus,
    pub step: usize,
    pub messages: Vec<ChatMessage>,
    pub pending_input: Option<PendingInput>,
    pub total_input_tokens: usize,
    pub total_output_tokens: usize,
    pub error_message: Option<String>,
    /// The task that opened the current run, for the run record.
    pub current_task: String,
    /// Identity of the in-flight run; survives a human-input suspension so
    /// the eventual run record covers the whole run.
    pub run_id: Option<String>,
    pub run_started_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl AgentState {
    pub fn new(system_prompt: Option<String>) -> Self {
        let messages = match system_prompt {
            Some(prompt) if !prompt.is_empty() => vec![ChatMessage::system(prompt)],
            _ => Vec::new(),
        };
        Self {
            status: AgentStatus::Idle,
            step: 0,
            messages,
            pending_input: None,
            total_input_tokens: 0,
            total_output_tokens: 0,
            error_message: None,
            current_task: String::new(),
            run_id: None,
            run_started_at: None,
        }
    }

    /// Reset counters for a new run, keeping the message history. Resuming
    /// from a suspension must NOT go through here: the step counter keeps
    /// counting across the pause.
    pub fn reset_for_run(&mut self) {
        self.status = AgentStatus::Running;
        self.step = 0;
        self.total_input_tokens = 0;
        self.total_output_tokens = 0;
        self.pending_input = None;
        self.error_message = None;
    }

    pub fn increment_step(&mut self) -> usize {
        self.step += 1;
        self.step
    }

    pub fn add_usage(&mut self, usage: Usage) {
        self.total_input_tokens += usage.input_tokens;
        self.total_output_tokens += usage.output_tokens;
    }

    pub fn mark_waiting_input(&mut self, pending: PendingInput) {
        self.status = AgentStatus::WaitingInput;
        self.pending_input = Some(pending);
    }

    pub fn mark_completed(&mut self) {
        self.status = AgentStatus::Completed;
        self.pending_input = None;
    }

    pub fn mark_max_steps(&mut self) {
        self.status = AgentStatus::MaxSteps;
        self.pending_input = None;
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = AgentStatus::Error;
        self.error_message = Some(message.into());
    }

    /// Leave the suspension; the caller has already appended the synthetic
    /// tool message answering the paused call.
    pub fn resume_from_input(&mut self) {
        if self.status == AgentStatus::WaitingInput {
            self.status = AgentStatus::Running;
            self.pending_input = None;
        }
    }

    pub fn is_waiting_input(&self) -> bool {
        self.status == AgentStatus::WaitingInput
    }

    /// Last assistant text, used for the max-steps terminal response.
    pub fn last_assistant_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::ai::types::Role::Assistant && !m.content.is_empty())
            .map(|m| m.content.as_str())
    }
}
