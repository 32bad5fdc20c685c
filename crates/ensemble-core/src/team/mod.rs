//! Leader/member team coordination.
//!
//! The leader is an ordinary agent whose only tools are the synthetic
//! delegation tools. Delegating runs a fresh member agent (with just the
//! member's named tools) to completion and hands its final text back as the
//! tool result. Every member run is appended to the shared session with
//! `parent_run_id` pointing at the leader's run.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::agent::{Agent, AgentConfig, AgentServices, RunConfig, RunOutcome};
use crate::ai::ModelBackend;
use crate::constants;
use crate::logging::{TraceEventType, TraceLogger};
use crate::prompt::PromptConfig;
use crate::session::{RunnerType, SessionStore};
use crate::tools::registry::{Tool, ToolContext, ToolRegistry, ToolResult};

/// One member's static configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MemberConfig {
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub instructions: Option<String>,
    /// Names filtered out of the team's available tool set.
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default = "default_member_steps")]
    pub max_steps: usize,
}

fn default_member_steps() -> usize {
    constants::agent::SPAWN_DEFAULT_MAX_STEPS
}

#[derive(Debug, Clone, Deserialize)]
pub struct TeamConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub members: Vec<MemberConfig>,
    #[serde(default)]
    pub leader_instructions: Option<String>,
    /// When set, the leader gets a single fan-out tool instead of targeted
    /// delegation.
    #[serde(default)]
    pub delegate_to_all: bool,
    #[serde(default = "default_leader_steps")]
    pub max_steps: usize,
    #[serde(default = "default_history_runs")]
    pub history_runs: usize,
}

fn default_leader_steps() -> usize {
    constants::agent::DEFAULT_MAX_STEPS
}

fn default_history_runs() -> usize {
    3
}

pub struct Team {
    config: TeamConfig,
    backend: Arc<dyn ModelBackend>,
    /// The pool members draw their tools from.
    available_tools: Arc<ToolRegistry>,
    store: Arc<dyn SessionStore>,
    workspace_dir: PathBuf,
    trace_dir: Option<PathBuf>,
}

impl Team {
    pub fn new(
        config: TeamConfig,
        backend: Arc<dyn ModelBackend>,
        available_tools: Arc<ToolRegistry>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            config,
            backend,
            available_tools,
            store,
            workspace_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            trace_dir: None,
        }
    }

    pub fn with_workspace(mut self, dir: PathBuf) -> Self {
        self.workspace_dir = dir;
        self
    }

    pub fn with_trace_dir(mut self, dir: PathBuf) -> Self {
        self.trace_dir = Some(dir);
        self
    }

    /// Run the team on a task. The leader's final text is the team's answer.
    pub async fn run(&self, task: &str, session_id: &str) -> Result<RunOutcome> {
        self.store
            .get_or_create(session_id, None, &self.config.name)
            .await?;
        let history = self
            .store
            .history_context(session_id, self.config.history_runs)
            .await?;

        let trace = match &self.trace_dir {
            Some(dir) => Some(Arc::new(TraceLogger::start(dir, "team")?)),
            None => None,
        };

        let leader_run_id = Uuid::new_v4().to_string();
        let runtime = Arc::new(TeamRuntime {
            config: self.config.clone(),
            backend: self.backend.clone(),
            available_tools: self.available_tools.clone(),
            store: self.store.clone(),
            session_id: session_id.to_string(),
            leader_run_id: leader_run_id.clone(),
            workspace_dir: self.workspace_dir.clone(),
            trace: trace.clone(),
        });

        let leader_registry = Arc::new(ToolRegistry::new());
        if self.config.delegate_to_all {
            leader_registry
                .register(Arc::new(DelegateAllTool(runtime.clone())))
                .await;
        } else {
            leader_registry
                .register(Arc::new(DelegateTool(runtime.clone())))
                .await;
        }

        let services = AgentServices::new(self.backend.clone(), leader_registry)
            .with_session(self.store.clone(), session_id);
        let config = AgentConfig {
            name: self.config.name.clone(),
            prompt: PromptConfig::with_description(build_leader_prompt(&self.config, &history)),
            run: RunConfig {
                max_steps: self.config.max_steps,
                ..Default::default()
            },
            workspace_dir: self.workspace_dir.clone(),
            history_runs: 0, // history already folded into the leader prompt
            depth: 0,
            runner_type: RunnerType::Leader,
            parent_run_id: None,
            run_id: Some(leader_run_id.clone()),
        };

        let leader = Agent::new(services, config).await?;
        info!(team = %self.config.name, session_id, "team run starting");
        let outcome = leader.run(task).await?;

        if let Some(trace) = &trace {
            trace.end(outcome.success, &outcome.content);
        }
        Ok(outcome)
    }
}

/// Shared state between the leader's delegation tools and the team.
struct TeamRuntime {
    config: TeamConfig,
    backend: Arc<dyn ModelBackend>,
    available_tools: Arc<ToolRegistry>,
    store: Arc<dyn SessionStore>,
    session_id: String,
    leader_run_id: String,
    workspace_dir: PathBuf,
    trace: Option<Arc<TraceLogger>>,
}

impl TeamRuntime {
    fn member(&self, name: &str) -> Option<&MemberConfig> {
        self.config.members.iter().find(|m| m.name == name)
    }

    /// Run one member to completion; its final text is the delegation
    /// result. Member failures come back as the error string so the leader
    /// can retry or route elsewhere.
    async fn run_member(&self, member: &MemberConfig, task: &str, depth: usize) -> ToolResult {
        if let Some(trace) = &self.trace {
            trace.event(
                TraceEventType::Delegation,
                Some(&self.leader_run_id),
                None,
                json!({"member": member.name, "task": task}),
            );
        }

        let registry = Arc::new(self.available_tools.subset(&member.tools).await);
        let mut prompt = PromptConfig::with_description(format!(
            "You are {}, a member of the {} team. Complete the task you are \
             given and reply with your final result.",
            member.name, self.config.name
        ));
        prompt.role = Some(member.role.clone());
        if let Some(instructions) = &member.instructions {
            prompt.instructions = vec![instructions.clone()];
        }

        let member_run_id = Uuid::new_v4().to_string();
        let config = AgentConfig {
            name: member.name.clone(),
            prompt,
            run: RunConfig {
                max_steps: member.max_steps,
                ..Default::default()
            },
            workspace_dir: self.workspace_dir.clone(),
            history_runs: 0,
            depth,
            runner_type: RunnerType::Member,
            parent_run_id: Some(self.leader_run_id.clone()),
            run_id: Some(member_run_id.clone()),
        };
        let services = AgentServices::new(self.backend.clone(), registry)
            .with_session(self.store.clone(), &self.session_id);

        if let Some(trace) = &self.trace {
            trace.event(
                TraceEventType::AgentStart,
                Some(&member_run_id),
                Some(&self.leader_run_id),
                json!({"member": member.name}),
            );
        }

        let result = async {
            let agent = Agent::new(services, config).await?;
            agent.run(task).await
        }
        .await;

        let tool_result = match result {
            Ok(outcome) if outcome.success => ToolResult::ok(outcome.content),
            Ok(outcome) => ToolResult::err(outcome.content),
            Err(e) => ToolResult::err(format!("member {} failed: {e:#}", member.name)),
        };

        if let Some(trace) = &self.trace {
            trace.event(
                TraceEventType::AgentEnd,
                Some(&member_run_id),
                Some(&self.leader_run_id),
                json!({"member": member.name, "success": tool_result.success}),
            );
            trace.event(
                TraceEventType::MessagePass,
                Some(&self.leader_run_id),
                None,
                json!({"from": member.name, "chars": tool_result.content.len()}),
            );
        }

        tool_result
    }
}

/// `delegate_task_to_member(member_name, task)` - the leader's only tool in
/// targeted mode.
struct DelegateTool(Arc<TeamRuntime>);

#[derive(Deserialize)]
struct DelegateArgs {
    member_name: String,
    task: String,
}

#[async_trait]
impl Tool for DelegateTool {
    fn name(&self) -> &str {
        "delegate_task_to_member"
    }

    fn description(&self) -> &str {
        "Delegate a task to a team member by name and receive their final result."
    }

    fn parameters_schema(&self) -> Value {
        let names: Vec<&str> = self.0.config.members.iter().map(|m| m.name.as_str()).collect();
        json!({
            "type": "object",
            "properties": {
                "member_name": {
                    "type": "string",
                    "enum": names,
                    "description": "Which member to delegate to"
                },
                "task": {
                    "type": "string",
                    "description": "A clear description of the task"
                }
            },
            "required": ["member_name", "task"]
        })
    }

    // A whole member run executes inside this call.
    fn timeout(&self) -> Option<std::time::Duration> {
        Some(std::time::Duration::from_secs(3600))
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let args: DelegateArgs = match crate::tools::implementations::parse_args(args) {
            Ok(args) => args,
            Err(result) => return result,
        };
        let Some(member) = self.0.member(&args.member_name) else {
            return ToolResult::err(format!("unknown member: {}", args.member_name));
        };
        self.0.run_member(member, &args.task, ctx.depth + 1).await
    }
}

/// `delegate_task_to_all_members(task)` - fan the task out to every member
/// concurrently and collect their labelled responses.
struct DelegateAllTool(Arc<TeamRuntime>);

#[derive(Deserialize)]
struct DelegateAllArgs {
    task: String,
}

#[async_trait]
impl Tool for DelegateAllTool {
    fn name(&self) -> &str {
        "delegate_task_to_all_members"
    }

    fn description(&self) -> &str {
        "Send the task to every team member at once and receive all of their responses."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {"type": "string", "description": "A clear description of the task"}
            },
            "required": ["task"]
        })
    }

    fn timeout(&self) -> Option<std::time::Duration> {
        Some(std::time::Duration::from_secs(3600))
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let args: DelegateAllArgs = match crate::tools::implementations::parse_args(args) {
            Ok(args) => args,
            Err(result) => return result,
        };

        let futures: Vec<_> = self
            .0
            .config
            .members
            .iter()
            .map(|member| {
                let runtime = self.0.clone();
                let task = args.task.clone();
                let member = member.clone();
                let depth = ctx.depth + 1;
                async move {
                    let result = runtime.run_member(&member, &task, depth).await;
                    (member.name, result)
                }
            })
            .collect();

        let results = futures::future::join_all(futures).await;
        let mut combined = String::new();
        for (name, result) in results {
            if !combined.is_empty() {
                combined.push_str("\n\n");
            }
            combined.push_str(&format!("{name}:\n{}", result.transcript_content()));
        }
        ToolResult::ok(combined)
    }
}

/// The leader's structured system prompt: team identity, member roster,
/// delegation policy, optional custom instructions, previous interactions.
fn build_leader_prompt(config: &TeamConfig, history: &str) -> String {
    let mut members_info = String::new();
    for (idx, member) in config.members.iter().enumerate() {
        if idx > 0 {
            members_info.push('\n');
        }
        members_info.push_str(&format!(
            " - Agent {}:\n   - Name: {}\n   - Role: {}",
            idx + 1,
            member.name,
            member.role
        ));
        if member.tools.is_empty() {
            members_info.push_str("\n   - Member tools: (no tools)");
        } else {
            members_info.push_str("\n   - Member tools:");
            for tool in &member.tools {
                members_info.push_str(&format!("\n    - {tool}"));
            }
        }
        if let Some(instructions) = &member.instructions {
            members_info.push_str(&format!("\n   - Instructions: {instructions}"));
        }
    }

    let delegation_policy = if config.delegate_to_all {
        "- You cannot use a member's tools directly. You can only delegate tasks to members.\n\
         - Use the `delegate_task_to_all_members` tool to send the task to ALL team members.\n\
         - Always analyze the responses from members before responding to the user.\n\
         - If you are not satisfied with the responses, re-assign the task."
    } else {
        "- Your role is to delegate tasks to the members most likely to complete the user's request.\n\
         - Carefully consider each member's role and tools before delegating.\n\
         - You cannot use a member's tools directly. You can only delegate tasks to members.\n\
         - When delegating, pass the member's name and a clear description of the task.\n\
         - Always analyze the responses from members before responding to the user.\n\
         - If you are not satisfied with a response, re-assign the task to a different member.\n\
         - Answer simple greetings or questions about the team yourself; route real work to members."
    };

    let mut prompt = format!(
        "You are the leader of a team of AI agents.\n\n\
         Your task is to coordinate the team to complete the user's request.\n\n\
         <team_name>\n{}\n</team_name>\n\n\
         <team_description>\n{}\n</team_description>\n\n\
         <team_members>\n{members_info}\n</team_members>\n\n\
         <how_to_respond>\n{delegation_policy}\n</how_to_respond>",
        config.name,
        config
            .description
            .as_deref()
            .unwrap_or("A collaborative team of specialized agents"),
    );

    if let Some(instructions) = &config.leader_instructions {
        prompt.push_str(&format!("\n\n<instructions>\n{instructions}\n</instructions>"));
    }
    if !history.is_empty() {
        prompt.push_str(&format!(
            "\n\n<previous_interactions>\n{history}\n\nUse the previous interactions to maintain continuity and context.\n</previous_interactions>"
        ));
    }
    prompt
}
