//! Agent-backed graph nodes.

use anyhow::{anyhow, Result};
use serde_json::Value;

use super::{GraphState, StateUpdate};
use crate::agent::{Agent, AgentConfig, AgentServices};
use crate::tools::registry::CancellationFlag;

/// Wraps an agent as a graph node: reads `state[input_key]` as the user
/// message, runs the loop to completion, writes the final assistant text to
/// `state[output_key]`.
pub struct AgentNode {
    services: AgentServices,
    config: AgentConfig,
    input_key: String,
    output_key: String,
}

impl AgentNode {
    pub fn new(
        services: AgentServices,
        config: AgentConfig,
        input_key: &str,
        output_key: &str,
    ) -> Self {
        Self {
            services,
            config,
            input_key: input_key.to_string(),
            output_key: output_key.to_string(),
        }
    }

    pub(crate) async fn run(
        &self,
        state: GraphState,
        cancel: CancellationFlag,
    ) -> Result<StateUpdate> {
        let task = state
            .get(&self.input_key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("state field '{}' missing or not a string", self.input_key))?
            .to_string();

        let mut agent = Agent::new(self.services.clone(), self.config.clone()).await?;
        agent.set_cancellation(cancel);

        let outcome = agent.run(&task).await?;
        if !outcome.success {
            return Err(anyhow!("agent node failed: {}", outcome.content));
        }

        let mut update = StateUpdate::new();
        update.insert(self.output_key.clone(), Value::String(outcome.content));
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::agent::testing::ScriptedBackend;
    use crate::graph::{Reducer, StateGraph, END, START};
    use crate::tools::registry::ToolRegistry;
    use serde_json::json;

    fn agent_node(backend: Arc<ScriptedBackend>, input: &str, output: &str) -> AgentNode {
        let services = AgentServices::new(backend, Arc::new(ToolRegistry::new()));
        AgentNode::new(services, AgentConfig::default(), input, output)
    }

    #[tokio::test]
    async fn agent_node_maps_input_to_output_key() {
        let backend = Arc::new(ScriptedBackend::new(vec![ScriptedBackend::text(
            "a summary",
        )]));
        let graph = StateGraph::new()
            .add_agent_node("summarize", agent_node(backend, "task", "summary"))
            .add_edge(START, "summarize")
            .add_edge("summarize", END)
            .compile()
            .unwrap();

        let mut initial = GraphState::new();
        initial.insert("task".to_string(), json!("summarize the report"));
        let state = graph.invoke(initial).await.unwrap();
        assert_eq!(state["summary"], "a summary");
        // The input survives untouched.
        assert_eq!(state["task"], "summarize the report");
    }

    #[tokio::test]
    async fn missing_input_key_fails_the_node() {
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let graph = StateGraph::new()
            .add_agent_node("summarize", agent_node(backend, "task", "summary"))
            .add_edge(START, "summarize")
            .add_edge("summarize", END)
            .compile()
            .unwrap();

        let err = graph.invoke(GraphState::new()).await.unwrap_err();
        assert!(err.to_string().contains("task"));
    }

    #[tokio::test]
    async fn two_agent_nodes_in_parallel_with_append_reducer() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            ScriptedBackend::text("take one"),
            ScriptedBackend::text("take two"),
        ]));
        let make = |out: &str| agent_node(backend.clone(), "task", out);
        let graph = StateGraph::new()
            .set_reducer("log", Reducer::Append)
            .add_agent_node("a", make("out_a"))
            .add_agent_node("b", make("out_b"))
            .add_edge(START, "a")
            .add_edge(START, "b")
            .add_edge("a", END)
            .add_edge("b", END)
            .compile()
            .unwrap();

        let mut initial = GraphState::new();
        initial.insert("task".to_string(), json!("go"));
        let state = graph.invoke(initial).await.unwrap();
        let outputs: Vec<&str> = ["out_a", "out_b"]
            .iter()
            .map(|k| state[*k].as_str().unwrap())
            .collect();
        assert!(outputs.contains(&"take one"));
        assert!(outputs.contains(&"take two"));
    }
}
