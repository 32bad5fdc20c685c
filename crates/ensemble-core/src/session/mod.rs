//! Session & run store.
//!
//! A session is an append-only container of run records bound to a caller
//! identity. Committed runs are never rewritten; the last N top-level runs
//! replay into the next run's prompt as a history block.

mod file;
mod memory;
mod sqlite;

pub use file::FileSessionStore;
pub use memory::MemorySessionStore;
pub use sqlite::SqliteSessionStore;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who produced a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerType {
    Leader,
    Member,
    Solo,
}

impl RunnerType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Leader => "leader",
            Self::Member => "member",
            Self::Solo => "solo",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "leader" => Some(Self::Leader),
            "member" => Some(Self::Member),
            "solo" => Some(Self::Solo),
            _ => None,
        }
    }
}

/// One completed run. Immutable once appended.
///
/// Invariant: `parent_run_id` is set exactly when `runner_type` is
/// [`RunnerType::Member`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub parent_run_id: Option<String>,
    pub runner_type: RunnerType,
    pub runner_name: String,
    pub task: String,
    pub response: String,
    pub success: bool,
    pub steps: usize,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
}

impl RunRecord {
    pub fn is_top_level(&self) -> bool {
        self.parent_run_id.is_none()
    }
}

/// Append-only session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub owner_id: Option<String>,
    /// Team or agent name the session is bound to.
    pub name: String,
    pub runs: Vec<RunRecord>,
    #[serde(default)]
    pub state: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: &str, owner_id: Option<&str>, name: &str) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            owner_id: owner_id.map(str::to_string),
            name: name.to_string(),
            runs: Vec::new(),
            state: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Format the last `num_runs` top-level runs for prompt injection.
    /// Leader history gets the `<team_history>` tag, solo history
    /// `<history>`. Empty history formats as the empty string.
    pub fn history_context(&self, num_runs: usize) -> String {
        let top_level: Vec<&RunRecord> = self.runs.iter().filter(|r| r.is_top_level()).collect();
        if top_level.is_empty() || num_runs == 0 {
            return String::new();
        }

        let recent = &top_level[top_level.len().saturating_sub(num_runs)..];
        let tag = if recent.iter().any(|r| r.runner_type == RunnerType::Leader) {
            "team_history"
        } else {
            "history"
        };

        let mut context = format!("<{tag}>\n");
        for (i, run) in recent.iter().enumerate() {
            context.push_str(&format!(
                "[Round {}]\nTask: {}\nResponse: {}\n\n",
                i + 1,
                run.task,
                run.response
            ));
        }
        context.push_str(&format!("</{tag}>"));
        context
    }
}

/// Pluggable session persistence. Implementations serialize writes per
/// session; nothing is promised about cross-process concurrency.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_or_create(
        &self,
        session_id: &str,
        owner_id: Option<&str>,
        name: &str,
    ) -> Result<Session>;

    /// Append a frozen run record. The record must not change afterwards
    /// and earlier records are never rewritten.
    async fn append_run(&self, session_id: &str, run: RunRecord) -> Result<()>;

    async fn get(&self, session_id: &str) -> Result<Option<Session>>;

    async fn set_state(&self, session_id: &str, key: &str, value: Value) -> Result<()>;

    async fn list_sessions(&self) -> Result<Vec<Session>>;

    /// History block for prompt injection; empty string when there is
    /// nothing to replay.
    async fn history_context(&self, session_id: &str, num_runs: usize) -> Result<String> {
        Ok(self
            .get(session_id)
            .await?
            .map(|s| s.history_context(num_runs))
            .unwrap_or_default())
    }
}

#[cfg(test)]
pub(crate) fn sample_run(run_id: &str, parent: Option<&str>, runner_type: RunnerType) -> RunRecord {
    let now = Utc::now();
    RunRecord {
        run_id: run_id.to_string(),
        parent_run_id: parent.map(str::to_string),
        runner_type,
        runner_name: "agent".to_string(),
        task: format!("task for {run_id}"),
        response: format!("response from {run_id}"),
        success: true,
        steps: 2,
        started_at: now,
        ended_at: now,
        metadata: serde_json::json!({}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_context_filters_member_runs_and_bounds_count() {
        let mut session = Session::new("s1", None, "team");
        session.runs.push(sample_run("r1", None, RunnerType::Leader));
        session
            .runs
            .push(sample_run("m1", Some("r1"), RunnerType::Member));
        session.runs.push(sample_run("r2", None, RunnerType::Leader));
        session.runs.push(sample_run("r3", None, RunnerType::Leader));

        let context = session.history_context(2);
        assert!(context.starts_with("<team_history>"));
        assert!(!context.contains("task for m1"));
        assert!(!context.contains("task for r1"));
        assert!(context.contains("task for r2"));
        assert!(context.contains("task for r3"));
    }

    #[test]
    fn solo_history_uses_plain_tag() {
        let mut session = Session::new("s1", None, "agent");
        session.runs.push(sample_run("r1", None, RunnerType::Solo));
        let context = session.history_context(3);
        assert!(context.starts_with("<history>"));
        assert!(context.ends_with("</history>"));
    }

    #[test]
    fn empty_history_is_empty_string() {
        let session = Session::new("s1", None, "agent");
        assert_eq!(session.history_context(5), "");
    }
}
