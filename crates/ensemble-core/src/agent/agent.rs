//! The `Agent` facade.
//!
//! Assembles the system prompt from config, tool usage notes, the skill
//! index and replayed session history; owns the run state behind a lock so
//! a suspended run can be resumed later; records every terminal run into
//! the session store.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;
use uuid::Uuid;

use super::events::AgentEvent;
use super::runner::{AgentLoop, RunConfig};
use super::state::{AgentState, AgentStatus, PendingInput};
use crate::ai::types::ChatMessage;
use crate::ai::ModelBackend;
use crate::context::TokenCounter;
use crate::logging::{RunExporter, RunLogger};
use crate::prompt::{PromptBuilder, PromptConfig};
use crate::session::{RunRecord, RunnerType, SessionStore};
use crate::skills::SkillCatalog;
use crate::tools::implementations::USER_INPUT_TOOL;
use crate::tools::registry::{CancellationFlag, ToolContext, ToolRegistry};

/// Everything an agent needs besides its own config.
#[derive(Clone)]
pub struct AgentServices {
    pub backend: Arc<dyn ModelBackend>,
    pub registry: Arc<ToolRegistry>,
    pub skills: SkillCatalog,
    pub session: Option<(Arc<dyn SessionStore>, String)>,
    /// Per-run JSONL logs land here; None disables file logging.
    pub log_dir: Option<PathBuf>,
    /// Installed exporter suppresses the file sink.
    pub exporter: Option<Arc<dyn RunExporter>>,
}

impl AgentServices {
    pub fn new(backend: Arc<dyn ModelBackend>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            backend,
            registry,
            skills: SkillCatalog::default(),
            session: None,
            log_dir: None,
            exporter: None,
        }
    }

    pub fn with_session(mut self, store: Arc<dyn SessionStore>, session_id: &str) -> Self {
        self.session = Some((store, session_id.to_string()));
        self
    }

    pub fn with_skills(mut self, skills: SkillCatalog) -> Self {
        self.skills = skills;
        self
    }

    pub fn with_log_dir(mut self, dir: PathBuf) -> Self {
        self.log_dir = Some(dir);
        self
    }
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub name: String,
    pub prompt: PromptConfig,
    pub run: RunConfig,
    pub workspace_dir: PathBuf,
    /// How many past top-level runs replay into the prompt.
    pub history_runs: usize,
    /// Spawn/team nesting depth; the root agent is 0.
    pub depth: usize,
    pub runner_type: RunnerType,
    pub parent_run_id: Option<String>,
    /// Pre-allocated run id. Teams allocate the leader's id up front so
    /// member records can link to it while the leader run is in flight.
    pub run_id: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "agent".to_string(),
            prompt: PromptConfig::default(),
            run: RunConfig::default(),
            workspace_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            history_runs: 3,
            depth: 0,
            runner_type: RunnerType::Solo,
            parent_run_id: None,
            run_id: None,
        }
    }
}

/// Terminal summary of one run, plus the buffered event log.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub success: bool,
    pub content: String,
    pub steps: usize,
    pub reason: String,
    pub requires_input: bool,
    pub input_request: Option<PendingInput>,
    pub events: Vec<AgentEvent>,
    pub log_file: Option<PathBuf>,
}

pub struct Agent {
    name: String,
    services: AgentServices,
    config: AgentConfig,
    counter: TokenCounter,
    state: Mutex<AgentState>,
    cancel: CancellationFlag,
}

impl Agent {
    /// Build an agent: fetch replayable history, assemble the system
    /// prompt, seed the message list.
    pub async fn new(services: AgentServices, mut config: AgentConfig) -> Result<Self> {
        if let Some((store, session_id)) = &services.session {
            let history = store
                .history_context(session_id, config.history_runs)
                .await?;
            if !history.is_empty() {
                config.prompt.additional_context = Some(match config.prompt.additional_context.take() {
                    Some(existing) => format!("{history}\n\n{existing}"),
                    None => history,
                });
            }
        }

        let tool_instructions = services.registry.prompt_instructions().await;
        let system_prompt = PromptBuilder::build(
            &config.prompt,
            &tool_instructions,
            services.skills.list(),
            &config.workspace_dir,
        );

        Ok(Self {
            name: config.name.clone(),
            services,
            counter: TokenCounter::new(),
            state: Mutex::new(AgentState::new(Some(system_prompt))),
            config,
            cancel: CancellationFlag::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Share a caller-owned cancellation flag (graph runs cancel their
    /// in-flight agent nodes through this).
    pub fn set_cancellation(&mut self, cancel: CancellationFlag) {
        self.cancel = cancel;
    }

    pub async fn is_waiting_input(&self) -> bool {
        self.state.lock().await.is_waiting_input()
    }

    pub async fn pending_input(&self) -> Option<PendingInput> {
        self.state.lock().await.pending_input.clone()
    }

    /// Run to a terminal state (or a suspension), buffering events.
    pub async fn run(&self, task: &str) -> Result<RunOutcome> {
        self.run_buffered(Some(task.to_string())).await
    }

    /// Streaming run: events arrive on the returned channel as they happen,
    /// ending with a terminal event. Recording still happens internally.
    pub fn run_stream(self: &Arc<Self>, task: &str) -> mpsc::UnboundedReceiver<AgentEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let agent = Arc::clone(self);
        let task = task.to_string();
        tokio::spawn(async move {
            if let Err(e) = agent.run_inner(Some(task), tx).await {
                warn!(agent = %agent.name, "streaming run failed: {e:#}");
            }
        });
        rx
    }

    /// Drive a run and collect its event stream into the outcome.
    async fn run_buffered(&self, task: Option<String>) -> Result<RunOutcome> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut outcome = self.run_inner(task, tx).await?;
        while let Ok(event) = rx.try_recv() {
            outcome.events.push(event);
        }
        Ok(outcome)
    }

    /// Streaming resume: like [`Agent::resume_with_message`] but events
    /// arrive live on the returned channel.
    pub fn resume_stream(self: &Arc<Self>, message: &str) -> mpsc::UnboundedReceiver<AgentEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let agent = Arc::clone(self);
        let message = message.to_string();
        tokio::spawn(async move {
            {
                let mut state = agent.state.lock().await;
                if let Some(pending) = state.pending_input.clone() {
                    state.messages.push(ChatMessage::tool(
                        format!("User inputs received: {message}"),
                        &pending.tool_call_id,
                        USER_INPUT_TOOL,
                    ));
                    state.resume_from_input();
                }
            }
            if let Err(e) = agent.run_inner(Some(message), tx).await {
                warn!(agent = %agent.name, "streaming resume failed: {e:#}");
            }
        });
        rx
    }

    /// Answer a pending `get_user_input` call with typed field values. The
    /// paused tool call receives a synthetic tool message; call
    /// [`Agent::resume`] afterwards to continue the run.
    pub async fn provide_user_input(&self, values: &HashMap<String, Value>) -> Result<()> {
        let mut state = self.state.lock().await;
        let pending = state
            .pending_input
            .clone()
            .ok_or_else(|| anyhow!("no pending user input request"))?;

        let answered: Vec<Value> = pending
            .fields
            .iter()
            .map(|field| {
                serde_json::json!({
                    "name": field.name,
                    "value": values.get(&field.name).cloned().unwrap_or(Value::Null),
                })
            })
            .collect();

        state.messages.push(ChatMessage::tool(
            format!(
                "User inputs received: {}",
                serde_json::to_string(&answered).unwrap_or_default()
            ),
            &pending.tool_call_id,
            USER_INPUT_TOOL,
        ));
        state.resume_from_input();
        Ok(())
    }

    /// Resume a suspended run with a free-form follow-up user message. The
    /// paused call is answered with the raw message text, and the message
    /// also becomes a new user turn.
    pub async fn resume_with_message(&self, message: &str) -> Result<RunOutcome> {
        {
            let mut state = self.state.lock().await;
            if let Some(pending) = state.pending_input.clone() {
                state.messages.push(ChatMessage::tool(
                    format!("User inputs received: {message}"),
                    &pending.tool_call_id,
                    USER_INPUT_TOOL,
                ));
                state.resume_from_input();
            }
        }
        self.run_buffered(Some(message.to_string())).await
    }

    /// Continue after [`Agent::provide_user_input`].
    pub async fn resume(&self) -> Result<RunOutcome> {
        {
            let state = self.state.lock().await;
            if state.pending_input.is_some() {
                return Err(anyhow!(
                    "still waiting for user input; call provide_user_input first"
                ));
            }
        }
        self.run_buffered(None).await
    }

    async fn run_inner(
        &self,
        task: Option<String>,
        tx: mpsc::UnboundedSender<AgentEvent>,
    ) -> Result<RunOutcome> {
        let mut state = self.state.lock().await;

        let resuming = state.status == AgentStatus::Running && state.run_id.is_some();
        if state.is_waiting_input() {
            return Err(anyhow!("run is waiting for user input"));
        }

        if let Some(task) = &task {
            state.messages.push(ChatMessage::user(task.clone()));
            if !resuming {
                state.current_task = task.clone();
            }
        } else if state.current_task.is_empty() {
            return Err(anyhow!("no task: pass one or add a user message first"));
        }

        if !resuming {
            state.reset_for_run();
            state.run_id = Some(
                self.config
                    .run_id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
            );
            state.run_started_at = Some(Utc::now());
        }
        let run_id = state.run_id.clone().unwrap_or_default();

        let logger = self.make_logger();
        let log_file = logger.path().map(|p| p.to_path_buf());
        if let Some(path) = &log_file {
            let _ = tx.send(AgentEvent::LogFile {
                path: path.display().to_string(),
            });
        }

        let agent_loop = AgentLoop::new(
            self.services.backend.clone(),
            self.services.registry.clone(),
            self.counter.clone(),
            self.config.run.clone(),
            logger,
        );

        let mut ctx = ToolContext::default()
            .with_workspace(self.config.workspace_dir.clone())
            .with_depth(self.config.depth);
        ctx.cancel = self.cancel.clone();
        if let Some((_, session_id)) = &self.services.session {
            ctx.session_id = Some(session_id.clone());
        }

        let result = agent_loop.run(&mut state, &ctx, &tx).await;

        let requires_input = result.status == AgentStatus::WaitingInput;
        if !requires_input {
            self.record_run(&mut state, &run_id, &result.content, result.success, result.steps)
                .await;
            state.run_id = None;
            state.run_started_at = None;
        }

        let input_request = state.pending_input.clone();

        Ok(RunOutcome {
            run_id,
            success: result.success,
            content: result.content,
            steps: result.steps,
            reason: result.reason,
            requires_input,
            input_request,
            events: Vec::new(),
            log_file,
        })
    }

    async fn record_run(
        &self,
        state: &mut AgentState,
        run_id: &str,
        response: &str,
        success: bool,
        steps: usize,
    ) {
        let Some((store, session_id)) = &self.services.session else {
            return;
        };
        let record = RunRecord {
            run_id: run_id.to_string(),
            parent_run_id: self.config.parent_run_id.clone(),
            runner_type: self.config.runner_type,
            runner_name: self.name.clone(),
            task: state.current_task.clone(),
            response: response.to_string(),
            success,
            steps,
            started_at: state.run_started_at.unwrap_or_else(Utc::now),
            ended_at: Utc::now(),
            metadata: serde_json::json!({
                "input_tokens": state.total_input_tokens,
                "output_tokens": state.total_output_tokens,
            }),
        };
        if let Err(e) = store.append_run(session_id, record).await {
            warn!(session_id = %session_id, "failed to record run: {e:#}");
        }
    }

    fn make_logger(&self) -> Arc<RunLogger> {
        if let Some(exporter) = &self.services.exporter {
            return Arc::new(RunLogger::with_exporter(exporter.clone()));
        }
        if let Some(dir) = &self.services.log_dir {
            match RunLogger::to_dir(dir) {
                Ok(logger) => return Arc::new(logger),
                Err(e) => warn!("run logging disabled: {e:#}"),
            }
        }
        Arc::new(RunLogger::disabled())
    }
}
