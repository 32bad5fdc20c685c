//! Run endpoints: blocking and SSE streaming.
//!
//! A request carrying the session id of a paused run delivers its message as
//! the follow-up user input and continues that run; anything else starts a
//! fresh agent bound to the session.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::post,
    Json, Router,
};
use futures::stream::Stream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use ensemble_core::agent::{Agent, AgentConfig, AgentEvent, AgentServices, RunConfig, RunOutcome};
use ensemble_core::paths;
use ensemble_core::prompt::PromptConfig;
use ensemble_core::sandbox::substitute_sandbox_tools;

use crate::error::AppError;
use crate::types::{RunRequest, RunResponse};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(run_blocking))
        .route("/stream", post(run_stream))
}

/// `POST /api/run` - run to completion (or suspension) and return the
/// outcome with the buffered event log.
async fn run_blocking(
    State(state): State<AppState>,
    Json(request): Json<RunRequest>,
) -> Result<Json<RunResponse>, AppError> {
    let session_id = resolve_session(&state, &request).await?;
    let lock = state.session_lock(&session_id).await;
    let _guard = lock.lock().await;

    let outcome = if let Some(paused) = take_paused(&state, &session_id).await {
        let outcome = paused
            .resume_with_message(&request.message)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?;
        if outcome.requires_input {
            state
                .paused_runs
                .write()
                .await
                .insert(session_id.clone(), paused);
        }
        outcome
    } else {
        let agent = Arc::new(build_agent(&state, &request, &session_id, false).await?);
        let outcome = agent
            .run(&request.message)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?;
        if outcome.requires_input {
            state
                .paused_runs
                .write()
                .await
                .insert(session_id.clone(), agent);
        }
        outcome
    };

    Ok(Json(to_response(outcome, session_id)))
}

/// `POST /api/run/stream` - server-sent events with types `log_file, step,
/// thinking, content, tool_call, tool_result, user_input_required, done,
/// error`.
async fn run_stream(
    State(state): State<AppState>,
    Json(request): Json<RunRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let session_id = resolve_session(&state, &request).await?;
    let lock = state.session_lock(&session_id).await;
    // Hold the lock for the duration of the streamed run.
    let guard = lock.clone().lock_owned().await;

    let (agent, events) = if let Some(paused) = take_paused(&state, &session_id).await {
        let events = paused.resume_stream(&request.message);
        (paused, events)
    } else {
        let agent = Arc::new(build_agent(&state, &request, &session_id, true).await?);
        let events = agent.run_stream(&request.message);
        (agent, events)
    };

    let stream = sse_stream(state, agent, events, session_id, guard);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn sse_stream(
    state: AppState,
    agent: Arc<Agent>,
    events: mpsc::UnboundedReceiver<AgentEvent>,
    session_id: String,
    guard: tokio::sync::OwnedMutexGuard<()>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    // The guard rides along until the stream is dropped.
    let guard = Arc::new(guard);
    UnboundedReceiverStream::new(events).filter_map(move |event| {
        let state = state.clone();
        let agent = agent.clone();
        let session_id = session_id.clone();
        let guard = guard.clone();
        async move {
            let _keep_alive = guard;
            if matches!(event, AgentEvent::UserInputRequired { .. }) {
                state
                    .paused_runs
                    .write()
                    .await
                    .insert(session_id.clone(), agent);
            }
            // Response turns are already covered by the content deltas.
            if matches!(event, AgentEvent::Response { .. }) {
                return None;
            }
            Some(Ok(to_sse_event(&event, &session_id)))
        }
    })
}
fn to_sse_event(event: &AgentEvent, session_id: &str) -> Event {
    let (name, data) = match event {
        AgentEvent::LogFile { path } => ("log_file", serde_json::json!({"path": path})),
        AgentEvent::Step {
            step,
            max_steps,
            token_count,
            token_limit,
        } => (
            "step",
            serde_json::json!({
                "step": step,
                "max_steps": max_steps,
                "token_count": token_count,
                "token_limit": token_limit,
            }),
        ),
        AgentEvent::ThinkingDelta { delta } => ("thinking", serde_json::json!({"delta": delta})),
        AgentEvent::ContentDelta { delta } => ("content", serde_json::json!({"delta": delta})),
        AgentEvent::Response { .. } => ("response", serde_json::json!({})),
        AgentEvent::ToolCall { id, name, arguments } => (
            "tool_call",
            serde_json::json!({"id": id, "tool": name, "arguments": arguments}),
        ),
        AgentEvent::ToolResult {
            id,
            name,
            success,
            content,
            error,
            duration_ms,
        } => (
            "tool_result",
            serde_json::json!({
                "id": id,
                "tool": name,
                "success": success,
                "content": content,
                "error": error,
                "duration_ms": duration_ms,
            }),
        ),
        AgentEvent::UserInputRequired {
            tool_call_id,
            fields,
            context,
        } => (
            "user_input_required",
            serde_json::json!({
                "tool_call_id": tool_call_id,
                "fields": fields,
                "context": context,
                "session_id": session_id,
            }),
        ),
        AgentEvent::Completion {
            message,
            steps,
            reason,
        } => (
            "done",
            serde_json::json!({
                "message": message,
                "steps": steps,
                "reason": reason,
                "session_id": session_id,
            }),
        ),
        AgentEvent::Error { message, reason } => (
            "error",
            serde_json::json!({"message": message, "reason": reason}),
        ),
    };

    Event::default()
        .event(name)
        .data(data.to_string())
}

async fn resolve_session(state: &AppState, request: &RunRequest) -> Result<String, AppError> {
    let session_id = request
        .session_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let name = request.agent_name.as_deref().unwrap_or("agent");
    state.store.get_or_create(&session_id, None, name).await?;
    Ok(session_id)
}

async fn take_paused(state: &AppState, session_id: &str) -> Option<Arc<Agent>> {
    state.paused_runs.write().await.remove(session_id)
}

/// Build a session-bound agent. With the sandbox enabled the session gets
/// its own registry view with sandboxed tool substitutes.
async fn build_agent(
    state: &AppState,
    request: &RunRequest,
    session_id: &str,
    streaming: bool,
) -> Result<Agent, AppError> {
    let registry = match &state.sandbox {
        Some(manager) => {
            let names = state.registry.names().await;
            let view = Arc::new(state.registry.subset(&names).await);
            substitute_sandbox_tools(&view, manager).await;
            view
        }
        None => state.registry.clone(),
    };

    let mut prompt = PromptConfig::with_description("You are a helpful AI assistant.");
    prompt.instructions = request.instructions.clone().unwrap_or_else(|| {
        vec![
            "Think step by step".to_string(),
            "Use available tools when appropriate".to_string(),
            "Provide clear and accurate responses".to_string(),
        ]
    });
    prompt.add_workspace_info = true;
    prompt.markdown = true;

    let config = AgentConfig {
        name: request.agent_name.clone().unwrap_or_else(|| "agent".to_string()),
        prompt,
        run: RunConfig {
            max_steps: request.max_steps.unwrap_or(state.config.max_steps),
            token_limit: state.config.token_limit,
            streaming,
            enable_summarization: true,
        },
        workspace_dir: (*state.workspace_dir).clone(),
        ..Default::default()
    };

    let services = AgentServices::new(state.backend.clone(), registry)
        .with_skills(state.skills.clone())
        .with_session(state.store.clone(), session_id)
        .with_log_dir(paths::logs_dir());

    Agent::new(services, config)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))
}

fn to_response(outcome: RunOutcome, session_id: String) -> RunResponse {
    RunResponse {
        success: outcome.success,
        message: outcome.content,
        steps: outcome.steps,
        logs: outcome
            .events
            .iter()
            .filter_map(|e| serde_json::to_value(e).ok())
            .collect(),
        run_id: outcome.run_id,
        session_id,
        requires_input: outcome.requires_input,
        input_request: outcome.input_request,
    }
}
