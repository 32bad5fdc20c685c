//! Tool registry and dispatcher.
//!
//! Tools register in load order (native, MCP, sandbox substitutes, spawn);
//! a name collision shadows the earlier source with a warning. Dispatch is
//! never fatal to the agent loop: every failure mode becomes a
//! `ToolResult { success: false }`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::warn;

use crate::ai::types::ToolDef;
use crate::constants::tools::{DEFAULT_TOOL_TIMEOUT, MAX_TOOL_OUTPUT_CHARS};

/// Cooperative cancellation flag shared by a run and its tool calls.
#[derive(Clone, Debug, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of one tool invocation. `content` is always a UTF-8 string; tools
/// serialize structured output themselves.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub success: bool,
    pub content: String,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: truncate_output(&content.into()),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            content: String::new(),
            error: Some(error),
        }
    }

    /// The text appended to the transcript as the tool message.
    pub fn transcript_content(&self) -> String {
        if self.success {
            self.content.clone()
        } else {
            format!("Error: {}", self.error.as_deref().unwrap_or("tool failed"))
        }
    }
}

fn truncate_output(output: &str) -> String {
    if output.len() <= MAX_TOOL_OUTPUT_CHARS {
        return output.to_string();
    }
    let mut boundary = MAX_TOOL_OUTPUT_CHARS;
    while boundary > 0 && !output.is_char_boundary(boundary) {
        boundary -= 1;
    }
    format!(
        "{}\n\n[... output truncated, {} more characters ...]",
        &output[..boundary],
        output.len() - boundary
    )
}

/// Per-invocation context threaded into every tool.
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: Option<String>,
    pub workspace_dir: PathBuf,
    /// Spawn nesting depth; the root run is 0.
    pub depth: usize,
    pub cancel: CancellationFlag,
    /// Per-call timeout override.
    pub timeout: Option<Duration>,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            session_id: None,
            workspace_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            depth: 0,
            cancel: CancellationFlag::new(),
            timeout: None,
        }
    }
}

impl ToolContext {
    pub fn with_workspace(mut self, dir: PathBuf) -> Self {
        self.workspace_dir = dir;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Resolve a path relative to the workspace (absolute paths pass through).
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = PathBuf::from(path);
        if p.is_absolute() {
            p
        } else {
            self.workspace_dir.join(p)
        }
    }
}

/// Trait for tool implementations.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema for the arguments object.
    fn parameters_schema(&self) -> Value;

    /// Usage notes injected into the system prompt when
    /// `add_instructions_to_prompt` is true.
    fn instructions(&self) -> Option<String> {
        None
    }

    fn add_instructions_to_prompt(&self) -> bool {
        false
    }

    /// Per-tool timeout override.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult;
}

/// Registry over all tool sources reachable by one agent.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    default_timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            default_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Register a tool. A duplicate name shadows the earlier registration
    /// with a warning; sandbox substitution depends on this.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        let mut tools = self.tools.write().await;
        if tools.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "tool name collision, later registration shadows earlier");
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tool definitions for the provider request, name-sorted for
    /// deterministic prompts.
    pub async fn defs(&self) -> Vec<ToolDef> {
        let tools = self.tools.read().await;
        let mut defs: Vec<ToolDef> = tools
            .values()
            .map(|t| ToolDef {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Prompt-injectable usage notes from tools that opt in, name-sorted.
    pub async fn prompt_instructions(&self) -> Vec<String> {
        let tools = self.tools.read().await;
        let mut entries: Vec<(String, String)> = tools
            .values()
            .filter(|t| t.add_instructions_to_prompt())
            .filter_map(|t| t.instructions().map(|i| (t.name().to_string(), i)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, i)| i).collect()
    }

    /// A new registry containing only the named tools (unknown names are
    /// skipped). Used by member and spawned agents.
    pub async fn subset(&self, names: &[String]) -> ToolRegistry {
        let tools = self.tools.read().await;
        let mut filtered: HashMap<String, Arc<dyn Tool>> = HashMap::new();
        for name in names {
            if let Some(tool) = tools.get(name) {
                filtered.insert(name.clone(), tool.clone());
            }
        }
        ToolRegistry {
            tools: RwLock::new(filtered),
            default_timeout: self.default_timeout,
        }
    }

    /// Dispatch by name. Every failure path returns a `ToolResult`.
    pub async fn invoke(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.get(name).await else {
            return ToolResult::err(format!("unknown tool {name}"));
        };

        if let Some(missing) = missing_required_fields(&tool.parameters_schema(), &args) {
            return ToolResult::err(format!(
                "missing required field(s) for {name}: {}",
                missing.join(", ")
            ));
        }

        let timeout = ctx
            .timeout
            .or_else(|| tool.timeout())
            .unwrap_or(self.default_timeout);

        match tokio::time::timeout(timeout, tool.execute(args, ctx)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(tool = name, timeout_ms = timeout.as_millis() as u64, "tool timed out");
                ToolResult::err(format!("timeout after {}ms", timeout.as_millis()))
            }
        }
    }
}

/// Best-effort argument validation: check the schema's `required` list.
/// Extra fields pass through untouched.
fn missing_required_fields(schema: &Value, args: &Value) -> Option<Vec<String>> {
    let required = schema.get("required")?.as_array()?;
    let missing: Vec<String> = required
        .iter()
        .filter_map(|r| r.as_str())
        .filter(|field| args.get(field).is_none())
        .map(str::to_string)
        .collect();
    if missing.is_empty() {
        None
    } else {
        Some(missing)
    }
}
