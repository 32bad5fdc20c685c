//! Per-session sandbox substitution.
//!
//! The sandbox daemon itself is an external collaborator reached over HTTP;
//! this module manages one sandbox instance per session (created on first
//! use, shared by concurrent requests for the same session, evicted on TTL)
//! and substitutes sandboxed counterparts for native tools.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::tools::registry::{Tool, ToolContext, ToolRegistry, ToolResult};

/// Names of native tools that have sandbox counterparts. For the duration
/// of a sandboxed session these replace the natives under the same names.
pub const SUBSTITUTED_TOOLS: &[&str] = &["bash", "read_file", "write_file", "list_files"];

/// One sandbox bound to a session.
#[derive(Clone)]
pub struct SandboxInstance {
    pub sandbox_id: String,
    pub session_id: String,
    client: Arc<SandboxClient>,
    last_accessed: Instant,
}

impl SandboxInstance {
    fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }
}

/// Narrow HTTP contract to the sandbox daemon: exec a command, read and
/// write files.
pub struct SandboxClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct ExecResponse {
    #[serde(default)]
    output: String,
    #[serde(default)]
    exit_code: i32,
}

impl SandboxClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("sandbox request to {url} failed"))?;
        let status = response.status();
        let value: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(anyhow!("sandbox returned {status}: {value}"));
        }
        Ok(value)
    }

    pub async fn exec(&self, sandbox_id: &str, command: &str) -> Result<(String, i32)> {
        let value = self
            .post(
                "/v1/shell/exec",
                json!({"sandbox_id": sandbox_id, "command": command}),
            )
            .await?;
        let response: ExecResponse = serde_json::from_value(value)?;
        Ok((response.output, response.exit_code))
    }

    pub async fn read_file(&self, sandbox_id: &str, path: &str) -> Result<String> {
        let value = self
            .post("/v1/file/read", json!({"sandbox_id": sandbox_id, "path": path}))
            .await?;
        Ok(value
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string())
    }

    pub async fn write_file(&self, sandbox_id: &str, path: &str, content: &str) -> Result<()> {
        self.post(
            "/v1/file/write",
            json!({"sandbox_id": sandbox_id, "path": path, "content": content}),
        )
        .await
        .map(|_| ())
    }
}

/// Manages sandbox instances keyed by session id.
pub struct SandboxManager {
    client: Arc<SandboxClient>,
    ttl: Duration,
    instances: Mutex<HashMap<String, SandboxInstance>>,
}

impl SandboxManager {
    pub fn new(base_url: &str, ttl_seconds: u64) -> Self {
        Self {
            client: Arc::new(SandboxClient::new(base_url)),
            ttl: Duration::from_secs(ttl_seconds),
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Get the session's sandbox, creating it on first use. Concurrent
    /// callers with the same key share one instance.
    pub async fn get_or_create(&self, session_id: &str) -> SandboxInstance {
        let mut instances = self.instances.lock().await;
        self.evict_expired(&mut instances);

        if let Some(instance) = instances.get_mut(session_id) {
            instance.touch();
            return instance.clone();
        }

        let instance = SandboxInstance {
            sandbox_id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            client: self.client.clone(),
            last_accessed: Instant::now(),
        };
        info!(session_id, sandbox_id = %instance.sandbox_id, "created sandbox");
        instances.insert(session_id.to_string(), instance.clone());
        instance
    }

    pub async fn remove(&self, session_id: &str) {
        if self.instances.lock().await.remove(session_id).is_some() {
            info!(session_id, "removed sandbox");
        }
    }

    pub async fn active_count(&self) -> usize {
        self.instances.lock().await.len()
    }

    fn evict_expired(&self, instances: &mut HashMap<String, SandboxInstance>) {
        let ttl = self.ttl;
        instances.retain(|session_id, instance| {
            let keep = instance.last_accessed.elapsed() < ttl;
            if !keep {
                debug!(session_id = %session_id, "evicting idle sandbox");
            }
            keep
        });
    }
}

/// A native tool's sandboxed counterpart, registered under the same name.
pub struct SandboxTool {
    manager: Arc<SandboxManager>,
    native_name: &'static str,
    description: String,
    schema: Value,
}

#[async_trait]
impl Tool for SandboxTool {
    fn name(&self) -> &str {
        self.native_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let Some(session_id) = ctx.session_id.as_deref() else {
            return ToolResult::err("sandbox tools require a session");
        };
        let instance = self.manager.get_or_create(session_id).await;
        let client = instance.client.clone();
        let id = instance.sandbox_id.as_str();

        match self.native_name {
            "bash" => {
                let Some(command) = args.get("command").and_then(|c| c.as_str()) else {
                    return ToolResult::err("command must be a string");
                };
                match client.exec(id, command).await {
                    Ok((output, 0)) => ToolResult::ok(output),
                    Ok((output, code)) => {
                        ToolResult::err(format!("command exited with {code}: {}", output.trim()))
                    }
                    Err(e) => ToolResult::err(e.to_string()),
                }
            }
            "read_file" => {
                let Some(path) = args.get("path").and_then(|p| p.as_str()) else {
                    return ToolResult::err("path must be a string");
                };
                match client.read_file(id, path).await {
                    Ok(content) => ToolResult::ok(content),
                    Err(e) => ToolResult::err(e.to_string()),
                }
            }
            "write_file" => {
                let (Some(path), Some(content)) = (
                    args.get("path").and_then(|p| p.as_str()),
                    args.get("content").and_then(|c| c.as_str()),
                ) else {
                    return ToolResult::err("path and content must be strings");
                };
                match client.write_file(id, path, content).await {
                    Ok(()) => ToolResult::ok(format!("wrote {} bytes to {path}", content.len())),
                    Err(e) => ToolResult::err(e.to_string()),
                }
            }
            "list_files" => {
                let path = args.get("path").and_then(|p| p.as_str()).unwrap_or(".");
                match client.exec(id, &format!("ls -1F {path}")).await {
                    Ok((output, 0)) => ToolResult::ok(output),
                    Ok((output, code)) => {
                        ToolResult::err(format!("ls exited with {code}: {}", output.trim()))
                    }
                    Err(e) => ToolResult::err(e.to_string()),
                }
            }
            other => ToolResult::err(format!("no sandbox counterpart for {other}")),
        }
    }
}

/// Substitute sandboxed counterparts for every native tool that has one.
/// Registration shadows the native under the same name for this session's
/// registry view.
pub async fn substitute_sandbox_tools(registry: &ToolRegistry, manager: &Arc<SandboxManager>) {
    for &name in SUBSTITUTED_TOOLS {
        let Some(native) = registry.get(name).await else {
            continue;
        };
        registry
            .register(Arc::new(SandboxTool {
                manager: manager.clone(),
                native_name: name,
                description: format!("{} (sandboxed)", native.description()),
                schema: native.parameters_schema(),
            }))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_session_shares_instance() {
        let manager = SandboxManager::new("http://localhost:8080", 3600);
        let a = manager.get_or_create("s1").await;
        let b = manager.get_or_create("s1").await;
        assert_eq!(a.sandbox_id, b.sandbox_id);
        assert_eq!(manager.active_count().await, 1);
    }

    #[tokio::test]
    async fn distinct_sessions_get_distinct_sandboxes() {
        let manager = SandboxManager::new("http://localhost:8080", 3600);
        let a = manager.get_or_create("s1").await;
        let b = manager.get_or_create("s2").await;
        assert_ne!(a.sandbox_id, b.sandbox_id);
    }

    #[tokio::test]
    async fn ttl_eviction_replaces_instance() {
        let manager = SandboxManager::new("http://localhost:8080", 0);
        let a = manager.get_or_create("s1").await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let b = manager.get_or_create("s1").await;
        assert_ne!(a.sandbox_id, b.sandbox_id);
    }

    #[tokio::test]
    async fn substitution_shadows_natives() {
        let registry = ToolRegistry::new();
        crate::tools::implementations::register_native_tools(
            &registry,
            crate::skills::SkillCatalog::default(),
        )
        .await;
        let manager = Arc::new(SandboxManager::new("http://localhost:8080", 3600));
        substitute_sandbox_tools(&registry, &manager).await;

        // Same names, sandboxed descriptions.
        let bash = registry.get("bash").await.unwrap();
        assert!(bash.description().contains("sandboxed"));
        // Tools without counterparts are untouched.
        let skill = registry.get("get_skill").await.unwrap();
        assert!(!skill.description().contains("sandboxed"));
    }
}
