//! spawn_agent - run a nested agent to completion as a tool call.
//!
//! The child gets a subset of the parent's tools and a fresh context; its
//! final assistant text becomes the tool result. Depth travels through
//! `ToolContext`, so spawns inside spawned agents (and inside team members)
//! all draw from one budget.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::agent::{Agent, AgentConfig, AgentServices};
use super::runner::RunConfig;
use crate::ai::ModelBackend;
use crate::constants;
use crate::prompt::PromptConfig;
use crate::session::RunnerType;
use crate::tools::registry::{Tool, ToolContext, ToolRegistry, ToolResult};

pub struct SpawnAgentTool {
    backend: Arc<dyn ModelBackend>,
    parent_registry: Arc<ToolRegistry>,
    max_depth: usize,
}

#[derive(Deserialize)]
struct SpawnArgs {
    task: String,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    context: Option<String>,
    #[serde(default)]
    tools: Option<Vec<String>>,
    #[serde(default)]
    max_steps: Option<usize>,
}

impl SpawnAgentTool {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        parent_registry: Arc<ToolRegistry>,
        max_depth: usize,
    ) -> Self {
        Self {
            backend,
            parent_registry,
            max_depth,
        }
    }
}

#[async_trait]
impl Tool for SpawnAgentTool {
    fn name(&self) -> &str {
        "spawn_agent"
    }

    fn description(&self) -> &str {
        "Spawn a specialized sub-agent to handle a specific task autonomously. \
         The sub-agent runs to completion and returns its final answer. Use it \
         to break off focused subtasks without cluttering your own context."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "Clear, specific description of what the sub-agent should accomplish"
                },
                "role": {
                    "type": "string",
                    "description": "Specialized role for the sub-agent (e.g. 'test writer')"
                },
                "context": {
                    "type": "string",
                    "description": "Relevant background from your current work"
                },
                "tools": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Tool names to enable; defaults to your own tool set"
                },
                "max_steps": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 30,
                    "description": "Step budget for the sub-agent"
                }
            },
            "required": ["task"]
        })
    }

    fn instructions(&self) -> Option<String> {
        Some(
            "## Delegating with spawn_agent\n\
             Give the sub-agent a focused task with concrete success criteria, \
             share the background it needs (sub-agents start fresh), and enable \
             only the tools the task requires. Prefer doing trivial work yourself."
                .to_string(),
        )
    }

    fn add_instructions_to_prompt(&self) -> bool {
        true
    }

    // A whole nested run executes inside this call.
    fn timeout(&self) -> Option<std::time::Duration> {
        Some(std::time::Duration::from_secs(3600))
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let args: SpawnArgs = match crate::tools::implementations::parse_args(args) {
            Ok(args) => args,
            Err(result) => return result,
        };

        let child_depth = ctx.depth + 1;
        if child_depth > self.max_depth {
            return ToolResult::err(format!(
                "spawn depth limit reached ({}); complete the task yourself",
                self.max_depth
            ));
        }

        let registry = match &args.tools {
            Some(names) => Arc::new(self.parent_registry.subset(names).await),
            None => self.parent_registry.clone(),
        };

        let mut prompt = PromptConfig::with_description(
            "You are a focused sub-agent. Complete the delegated task and reply \
             with your final result; your last message is returned verbatim to \
             the agent that spawned you.",
        );
        prompt.role = args.role;
        prompt.additional_context = args.context;
        prompt.add_workspace_info = true;

        let config = AgentConfig {
            name: "spawned-agent".to_string(),
            prompt,
            run: RunConfig {
                max_steps: args
                    .max_steps
                    .unwrap_or(constants::agent::SPAWN_DEFAULT_MAX_STEPS)
                    .clamp(1, 30),
                token_limit: constants::agent::SPAWN_TOKEN_LIMIT,
                streaming: false,
                enable_summarization: true,
            },
            workspace_dir: ctx.workspace_dir.clone(),
            history_runs: 0,
            depth: child_depth,
            runner_type: RunnerType::Solo,
            parent_run_id: None,
            run_id: None,
        };

        let services = AgentServices::new(self.backend.clone(), registry);
        let child = match Agent::new(services, config).await {
            Ok(child) => child,
            Err(e) => return ToolResult::err(format!("failed to build sub-agent: {e:#}")),
        };

        match child.run(&args.task).await {
            Ok(outcome) if outcome.success => ToolResult::ok(outcome.content),
            Ok(outcome) => ToolResult::err(outcome.content),
            Err(e) => ToolResult::err(format!("sub-agent failed: {e:#}")),
        }
    }
}

/// Load-order step 4: the spawn tool goes in last.
pub async fn register_spawn_tool(
    registry: &Arc<ToolRegistry>,
    backend: Arc<dyn ModelBackend>,
    max_depth: usize,
) {
    registry
        .register(Arc::new(SpawnAgentTool::new(
            backend,
            registry.clone(),
            max_depth,
        )))
        .await;
}
