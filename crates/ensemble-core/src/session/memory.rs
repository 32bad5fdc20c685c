//! In-memory session backend.
//!
//! The default for tests and single-process servers. One lock serializes
//! writes; runs are appended in commit order.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{RunRecord, Session, SessionStore};

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get_or_create(
        &self,
        session_id: &str,
        owner_id: Option<&str>,
        name: &str,
    ) -> Result<Session> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id, owner_id, name));
        Ok(session.clone())
    }

    async fn append_run(&self, session_id: &str, run: RunRecord) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| anyhow!("unknown session: {session_id}"))?;
        session.runs.push(run);
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.lock().await.get(session_id).cloned())
    }

    async fn set_state(&self, session_id: &str, key: &str, value: Value) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| anyhow!("unknown session: {session_id}"))?;
        session.state.insert(key.to_string(), value);
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let sessions = self.sessions.lock().await;
        let mut all: Vec<Session> = sessions.values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{sample_run, RunnerType};

    #[tokio::test]
    async fn append_is_monotonic() {
        let store = MemorySessionStore::new();
        store.get_or_create("s1", None, "agent").await.unwrap();

        store
            .append_run("s1", sample_run("r1", None, RunnerType::Solo))
            .await
            .unwrap();
        store
            .append_run("s1", sample_run("r2", None, RunnerType::Solo))
            .await
            .unwrap();

        let session = store.get("s1").await.unwrap().unwrap();
        assert_eq!(session.runs.len(), 2);
        assert_eq!(session.runs[0].run_id, "r1");
        assert_eq!(session.runs[1].run_id, "r2");
    }

    #[tokio::test]
    async fn append_to_unknown_session_errors() {
        let store = MemorySessionStore::new();
        let result = store
            .append_run("ghost", sample_run("r1", None, RunnerType::Solo))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn state_round_trips() {
        let store = MemorySessionStore::new();
        store.get_or_create("s1", Some("owner"), "agent").await.unwrap();
        store
            .set_state("s1", "phase", serde_json::json!("research"))
            .await
            .unwrap();
        let session = store.get("s1").await.unwrap().unwrap();
        assert_eq!(session.state["phase"], "research");
        assert_eq!(session.owner_id.as_deref(), Some("owner"));
    }

    #[tokio::test]
    async fn concurrent_appends_serialize() {
        let store = std::sync::Arc::new(MemorySessionStore::new());
        store.get_or_create("s1", None, "agent").await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append_run("s1", sample_run(&format!("r{i}"), None, RunnerType::Solo))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(store.get("s1").await.unwrap().unwrap().runs.len(), 16);
    }
}
