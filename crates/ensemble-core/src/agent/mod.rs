//! Agent execution: the bounded step machine and its facade.

mod agent;
mod events;
mod runner;
mod spawn;
mod state;

pub use agent::{Agent, AgentConfig, AgentServices, RunOutcome};
pub use events::AgentEvent;
pub use runner::{AgentLoop, LoopResult, RunConfig};
pub use spawn::{register_spawn_tool, SpawnAgentTool};
pub use state::{AgentState, AgentStatus, PendingInput};

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted model backend shared by loop, team and graph tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::mpsc;

    use crate::ai::types::{
        ChatMessage, LlmResponse, StreamPart, ToolCall, ToolDef, Usage,
    };
    use crate::ai::ModelBackend;

    /// Pops one scripted response per model call, in order. Works for both
    /// blocking and streaming calls; streamed responses are chopped into
    /// parts the way a real provider would emit them.
    pub struct ScriptedBackend {
        responses: Mutex<VecDeque<LlmResponse>>,
    }

    impl ScriptedBackend {
        pub fn new(responses: Vec<LlmResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
            }
        }

        pub fn text(content: &str) -> LlmResponse {
            LlmResponse {
                content: content.to_string(),
                usage: Some(Usage {
                    input_tokens: 10,
                    output_tokens: 5,
                }),
                ..Default::default()
            }
        }

        pub fn with_calls(content: &str, calls: Vec<(&str, &str, Value)>) -> LlmResponse {
            LlmResponse {
                content: content.to_string(),
                tool_calls: calls
                    .into_iter()
                    .map(|(id, name, arguments)| ToolCall {
                        id: id.to_string(),
                        name: name.to_string(),
                        arguments,
                    })
                    .collect(),
                usage: Some(Usage {
                    input_tokens: 10,
                    output_tokens: 5,
                }),
                ..Default::default()
            }
        }

        fn pop(&self) -> Result<LlmResponse> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow!("script exhausted"))
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        async fn generate(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolDef],
            _max_tokens: Option<usize>,
        ) -> Result<LlmResponse> {
            self.pop()
        }

        async fn stream(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolDef],
            _max_tokens: Option<usize>,
        ) -> Result<mpsc::UnboundedReceiver<StreamPart>> {
            let response = self.pop()?;
            let (tx, rx) = mpsc::unbounded_channel();

            if let Some(thinking) = &response.thinking {
                let _ = tx.send(StreamPart::ThinkingDelta(thinking.clone()));
            }
            // Split content in two to exercise delta accumulation.
            let mid = response.content.len() / 2;
            let mid = (0..=mid)
                .rev()
                .find(|i| response.content.is_char_boundary(*i))
                .unwrap_or(0);
            let (a, b) = response.content.split_at(mid);
            for chunk in [a, b] {
                if !chunk.is_empty() {
                    let _ = tx.send(StreamPart::ContentDelta(chunk.to_string()));
                }
            }
            for call in response.tool_calls {
                let _ = tx.send(StreamPart::ToolCallComplete(call));
            }
            if let Some(usage) = response.usage {
                let _ = tx.send(StreamPart::Usage(usage));
            }
            let _ = tx.send(StreamPart::Done);
            Ok(rx)
        }
    }

    /// Minimal echo tool for round-trip tests.
    pub struct EchoTool;

    #[async_trait]
    impl crate::tools::registry::Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the given text back"
        }

        fn parameters_schema(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            })
        }

        async fn execute(
            &self,
            args: Value,
            _ctx: &crate::tools::registry::ToolContext,
        ) -> crate::tools::registry::ToolResult {
            match args.get("text").and_then(|t| t.as_str()) {
                Some(text) => crate::tools::registry::ToolResult::ok(text),
                None => crate::tools::registry::ToolResult::err("text must be a string"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::testing::{EchoTool, ScriptedBackend};
    use super::*;
    use crate::ai::types::raw_arguments;
    use crate::session::{MemorySessionStore, RunnerType, SessionStore};
    use crate::tools::registry::ToolRegistry;

    async fn make_agent(
        backend: ScriptedBackend,
        registry: ToolRegistry,
        config: AgentConfig,
    ) -> (Agent, Arc<MemorySessionStore>) {
        let store = Arc::new(MemorySessionStore::new());
        store.get_or_create("s1", None, "agent").await.unwrap();
        let services = AgentServices::new(Arc::new(backend), Arc::new(registry))
            .with_session(store.clone(), "s1");
        (Agent::new(services, config).await.unwrap(), store)
    }

    fn event_types(events: &[AgentEvent]) -> Vec<&'static str> {
        events
            .iter()
            .map(|e| match e {
                AgentEvent::LogFile { .. } => "log_file",
                AgentEvent::Step { .. } => "step",
                AgentEvent::ContentDelta { .. } => "content",
                AgentEvent::ThinkingDelta { .. } => "thinking",
                AgentEvent::Response { .. } => "response",
                AgentEvent::ToolCall { .. } => "tool_call",
                AgentEvent::ToolResult { .. } => "tool_result",
                AgentEvent::UserInputRequired { .. } => "user_input_required",
                AgentEvent::Completion { .. } => "done",
                AgentEvent::Error { .. } => "error",
            })
            .collect()
    }

    #[tokio::test]
    async fn single_step_answer_without_tools() {
        let backend = ScriptedBackend::new(vec![ScriptedBackend::text("4")]);
        let (agent, store) = make_agent(backend, ToolRegistry::new(), AgentConfig::default()).await;

        let outcome = agent.run("What is 2+2?").await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.content, "4");
        assert_eq!(outcome.steps, 1);
        assert_eq!(event_types(&outcome.events), vec!["step", "response", "done"]);

        let session = store.get("s1").await.unwrap().unwrap();
        assert_eq!(session.runs.len(), 1);
        assert_eq!(session.runs[0].runner_type, RunnerType::Solo);
        assert_eq!(session.runs[0].response, "4");
        assert!(session.runs[0].parent_run_id.is_none());
    }

    #[tokio::test]
    async fn tool_round_trip() {
        let backend = ScriptedBackend::new(vec![
            ScriptedBackend::with_calls("", vec![("c1", "echo", json!({"text": "hi"}))]),
            ScriptedBackend::text("hi"),
        ]);
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await;
        let (agent, _) = make_agent(backend, registry, AgentConfig::default()).await;

        let outcome = agent.run("Call echo with 'hi', then reply with its output.").await.unwrap();
        assert_eq!(outcome.content, "hi");
        assert_eq!(outcome.steps, 2);
        assert_eq!(
            event_types(&outcome.events),
            vec!["step", "response", "tool_call", "tool_result", "step", "response", "done"]
        );

        // tool_result carries a positive duration and the echoed content.
        let AgentEvent::ToolResult {
            success,
            content,
            duration_ms,
            ..
        } = &outcome.events[3]
        else {
            panic!("expected tool_result event");
        };
        assert!(*success);
        assert_eq!(content.as_deref(), Some("hi"));
        assert!(*duration_ms > 0);
    }

    #[tokio::test]
    async fn tool_calls_and_tool_messages_form_a_bijection() {
        let backend = ScriptedBackend::new(vec![
            ScriptedBackend::with_calls(
                "",
                vec![
                    ("c1", "echo", json!({"text": "a"})),
                    ("c2", "echo", json!({"text": "b"})),
                    ("c3", "missing_tool", json!({})),
                ],
            ),
            ScriptedBackend::text("done"),
        ]);
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await;
        let (agent, _) = make_agent(backend, registry, AgentConfig::default()).await;

        let outcome = agent.run("go").await.unwrap();
        assert!(outcome.success);

        // Every emitted tool call id got exactly one tool result, in order.
        let call_ids: Vec<String> = outcome
            .events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::ToolCall { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect();
        let result_ids: Vec<String> = outcome
            .events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::ToolResult { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(call_ids, vec!["c1", "c2", "c3"]);
        assert_eq!(call_ids, result_ids);
    }

    #[tokio::test]
    async fn unknown_tool_lets_the_model_recover() {
        let backend = ScriptedBackend::new(vec![
            ScriptedBackend::with_calls("", vec![("c1", "ghost", json!({}))]),
            ScriptedBackend::text("recovered"),
        ]);
        let (agent, _) = make_agent(backend, ToolRegistry::new(), AgentConfig::default()).await;

        let outcome = agent.run("go").await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.content, "recovered");
        let AgentEvent::ToolResult { error, .. } = &outcome.events[3] else {
            panic!("expected tool_result");
        };
        assert_eq!(error.as_deref(), Some("unknown tool ghost"));
    }

    #[tokio::test]
    async fn malformed_streamed_arguments_report_invalid_tool_arguments() {
        let backend = ScriptedBackend::new(vec![
            ScriptedBackend::with_calls("", vec![("c1", "echo", raw_arguments("{broken"))]),
            ScriptedBackend::text("ok"),
        ]);
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await;
        let (agent, _) = make_agent(backend, registry, AgentConfig::default()).await;

        let outcome = agent.run("go").await.unwrap();
        let errors: Vec<&str> = outcome
            .events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::ToolResult { error: Some(error), .. } => Some(error.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(errors, vec!["invalid_tool_arguments"]);
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn max_steps_terminates_with_reason_and_success() {
        let call = |id: &str| ScriptedBackend::with_calls("still working", vec![(id, "echo", json!({"text": "x"}))]);
        let backend = ScriptedBackend::new(vec![call("c1"), call("c2"), call("c3")]);
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await;

        let config = AgentConfig {
            run: RunConfig {
                max_steps: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        let (agent, _) = make_agent(backend, registry, config).await;

        let outcome = agent.run("loop forever").await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.reason, "max_steps_reached");
        assert_eq!(outcome.content, "still working");

        let steps = outcome
            .events
            .iter()
            .filter(|e| matches!(e, AgentEvent::Step { .. }))
            .count();
        assert_eq!(steps, 2);
    }

    #[tokio::test]
    async fn provider_failure_after_retries_is_done_error() {
        // Empty script: the first generate() errors.
        let backend = ScriptedBackend::new(vec![]);
        let (agent, store) = make_agent(backend, ToolRegistry::new(), AgentConfig::default()).await;

        let outcome = agent.run("hello").await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.content.contains("LLM call failed"));

        let session = store.get("s1").await.unwrap().unwrap();
        assert_eq!(session.runs.len(), 1);
        assert!(!session.runs[0].success);
    }

    #[tokio::test]
    async fn cancellation_surfaces_as_error_with_reason() {
        let backend = ScriptedBackend::new(vec![ScriptedBackend::text("never used")]);
        let (agent, _) = make_agent(backend, ToolRegistry::new(), AgentConfig::default()).await;
        agent.cancel();

        let outcome = agent.run("hello").await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.reason, "cancelled");
    }

    #[tokio::test]
    async fn user_input_suspends_and_resumes_without_extra_steps() {
        let backend = ScriptedBackend::new(vec![
            ScriptedBackend::with_calls(
                "",
                vec![(
                    "c1",
                    "get_user_input",
                    json!({
                        "user_input_fields": [
                            {"field_name": "city", "field_type": "string", "field_description": "Which city?"}
                        ],
                        "context": "Needed for the forecast"
                    }),
                )],
            ),
            ScriptedBackend::text("It is sunny in Paris."),
        ]);
        let registry = ToolRegistry::new();
        crate::tools::implementations::register_native_tools(&registry, Default::default()).await;
        let (agent, store) = make_agent(backend, registry, AgentConfig::default()).await;

        let outcome = agent.run("What's the weather?").await.unwrap();
        assert!(outcome.requires_input);
        let request = outcome.input_request.as_ref().unwrap();
        assert_eq!(request.tool_call_id, "c1");
        assert_eq!(request.fields[0].name, "city");
        assert_eq!(request.context.as_deref(), Some("Needed for the forecast"));
        assert!(outcome
            .events
            .iter()
            .any(|e| matches!(e, AgentEvent::UserInputRequired { .. })));
        // Suspension itself recorded nothing: the run is still open.
        assert_eq!(store.get("s1").await.unwrap().unwrap().runs.len(), 0);

        let resumed = agent
            .resume_with_message("[user_input] city: Paris")
            .await
            .unwrap();
        assert!(resumed.success);
        assert!(resumed.content.contains("Paris"));
        // One step before the pause, one after: the suspension consumed none.
        assert_eq!(resumed.steps, 2);
        assert_eq!(resumed.run_id, outcome.run_id);

        let session = store.get("s1").await.unwrap().unwrap();
        assert_eq!(session.runs.len(), 1);
        assert_eq!(session.runs[0].run_id, outcome.run_id);
    }

    #[tokio::test]
    async fn typed_user_input_answers_the_paused_call() {
        let backend = ScriptedBackend::new(vec![
            ScriptedBackend::with_calls(
                "",
                vec![(
                    "c1",
                    "get_user_input",
                    json!({
                        "user_input_fields": [
                            {"field_name": "city", "field_description": "Which city?"}
                        ]
                    }),
                )],
            ),
            ScriptedBackend::text("done"),
        ]);
        let registry = ToolRegistry::new();
        crate::tools::implementations::register_native_tools(&registry, Default::default()).await;
        let (agent, _) = make_agent(backend, registry, AgentConfig::default()).await;

        agent.run("ask me").await.unwrap();
        let mut values = std::collections::HashMap::new();
        values.insert("city".to_string(), json!("Paris"));
        agent.provide_user_input(&values).await.unwrap();

        let outcome = agent.resume().await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.content, "done");
    }

    #[tokio::test]
    async fn streaming_run_emits_deltas_in_order() {
        let backend = ScriptedBackend::new(vec![
            ScriptedBackend::with_calls("", vec![("c1", "echo", json!({"text": "hi"}))]),
            ScriptedBackend::text("hi"),
        ]);
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await;

        let config = AgentConfig {
            run: RunConfig {
                streaming: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let (agent, _) = make_agent(backend, registry, config).await;
        let agent = Arc::new(agent);

        let mut rx = agent.run_stream("go");
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        let types = event_types(&events);
        // Deltas appear between step and response on the final turn.
        assert!(types.contains(&"content"));
        assert_eq!(types.last(), Some(&"done"));
        let full: String = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::ContentDelta { delta } => Some(delta.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(full, "hi");
    }

    #[tokio::test]
    async fn spawn_runs_nested_agent_and_caps_depth() {
        // Parent spawns; child answers; parent wraps up.
        let backend = Arc::new(ScriptedBackend::new(vec![
            ScriptedBackend::with_calls("", vec![("c1", "spawn_agent", json!({"task": "sub"}))]),
            ScriptedBackend::text("child result"),
            ScriptedBackend::text("parent done"),
        ]));
        let registry = Arc::new(ToolRegistry::new());
        register_spawn_tool(&registry, backend.clone(), 3).await;

        let services = AgentServices::new(backend.clone(), registry.clone());
        let agent = Agent::new(services, AgentConfig::default()).await.unwrap();
        let outcome = agent.run("delegate").await.unwrap();
        assert_eq!(outcome.content, "parent done");

        let AgentEvent::ToolResult { content, .. } = &outcome.events[3] else {
            panic!("expected tool_result");
        };
        assert_eq!(content.as_deref(), Some("child result"));
    }

    #[tokio::test]
    async fn spawn_depth_exceeded_fails_without_spawning() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            ScriptedBackend::with_calls("", vec![("c1", "spawn_agent", json!({"task": "sub"}))]),
            ScriptedBackend::text("continued anyway"),
        ]));
        let registry = Arc::new(ToolRegistry::new());
        register_spawn_tool(&registry, backend.clone(), 3).await;

        let config = AgentConfig {
            depth: 3, // already at the cap; one more would exceed it
            ..Default::default()
        };
        let services = AgentServices::new(backend.clone(), registry.clone());
        let agent = Agent::new(services, config).await.unwrap();

        let outcome = agent.run("delegate").await.unwrap();
        // The parent continues: depth exhaustion is a tool failure, not a
        // run failure.
        assert!(outcome.success);
        assert_eq!(outcome.content, "continued anyway");
        let AgentEvent::ToolResult { error, .. } = &outcome.events[3] else {
            panic!("expected tool_result");
        };
        assert!(error.as_ref().unwrap().contains("spawn depth limit"));
    }
}
