//! File session backend: one JSONL file per session.
//!
//! The file is strictly append-only. The first line is the session header;
//! every subsequent line is a `run` or `state` event replayed on load.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{RunRecord, Session, SessionStore};

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Line {
    Session {
        session_id: String,
        owner_id: Option<String>,
        name: String,
        created_at: DateTime<Utc>,
    },
    Run(RunRecord),
    State { key: String, value: Value },
}

pub struct FileSessionStore {
    base_dir: PathBuf,
    // Serializes writes across sessions; file appends are short.
    write_lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)
            .with_context(|| format!("cannot create session dir {base_dir:?}"))?;
        Ok(Self {
            base_dir,
            write_lock: Mutex::new(()),
        })
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        // Session ids come from clients; keep the filename safe.
        let safe: String = session_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.base_dir.join(format!("{safe}.jsonl"))
    }

    async fn append_line(&self, path: &Path, line: &Line) -> Result<()> {
        let json = serde_json::to_string(line)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("cannot open {path:?}"))?;
        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<Session>> {
        let path = self.session_path(session_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context(format!("cannot read {path:?}")),
        };
        Self::replay(&content).map(Some)
    }

    fn replay(content: &str) -> Result<Session> {
        let mut lines = content.lines().filter(|l| !l.trim().is_empty());
        let header: Line = serde_json::from_str(
            lines.next().ok_or_else(|| anyhow!("empty session file"))?,
        )?;
        let Line::Session {
            session_id,
            owner_id,
            name,
            created_at,
        } = header
        else {
            return Err(anyhow!("session file does not start with a header line"));
        };

        let mut session = Session {
            session_id,
            owner_id,
            name,
            runs: Vec::new(),
            state: HashMap::new(),
            created_at,
            updated_at: created_at,
        };

        for line in lines {
            match serde_json::from_str::<Line>(line)? {
                Line::Run(run) => {
                    session.updated_at = run.ended_at;
                    session.runs.push(run);
                }
                Line::State { key, value } => {
                    session.state.insert(key, value);
                }
                Line::Session { .. } => return Err(anyhow!("duplicate session header")),
            }
        }
        Ok(session)
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get_or_create(
        &self,
        session_id: &str,
        owner_id: Option<&str>,
        name: &str,
    ) -> Result<Session> {
        let _guard = self.write_lock.lock().await;
        if let Some(session) = self.load(session_id).await? {
            return Ok(session);
        }

        let session = Session::new(session_id, owner_id, name);
        self.append_line(
            &self.session_path(session_id),
            &Line::Session {
                session_id: session.session_id.clone(),
                owner_id: session.owner_id.clone(),
                name: session.name.clone(),
                created_at: session.created_at,
            },
        )
        .await?;
        Ok(session)
    }

    async fn append_run(&self, session_id: &str, run: RunRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.session_path(session_id);
        if !path.exists() {
            return Err(anyhow!("unknown session: {session_id}"));
        }
        self.append_line(&path, &Line::Run(run)).await
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        self.load(session_id).await
    }

    async fn set_state(&self, session_id: &str, key: &str, value: Value) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.session_path(session_id);
        if !path.exists() {
            return Err(anyhow!("unknown session: {session_id}"));
        }
        self.append_line(
            &path,
            &Line::State {
                key: key.to_string(),
                value,
            },
        )
        .await
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let mut sessions = Vec::new();
        let mut reader = tokio::fs::read_dir(&self.base_dir).await?;
        while let Ok(Some(entry)) = reader.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            if let Ok(content) = tokio::fs::read_to_string(&path).await {
                if let Ok(session) = Self::replay(&content) {
                    sessions.push(session);
                }
            }
        }
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{sample_run, RunnerType};

    #[tokio::test]
    async fn runs_survive_reload() {
        let temp = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(temp.path()).unwrap();

        store.get_or_create("s1", Some("me"), "agent").await.unwrap();
        store
            .append_run("s1", sample_run("r1", None, RunnerType::Solo))
            .await
            .unwrap();
        store
            .set_state("s1", "k", serde_json::json!(1))
            .await
            .unwrap();

        // A fresh store over the same directory replays everything.
        let reopened = FileSessionStore::new(temp.path()).unwrap();
        let session = reopened.get("s1").await.unwrap().unwrap();
        assert_eq!(session.runs.len(), 1);
        assert_eq!(session.runs[0].run_id, "r1");
        assert_eq!(session.state["k"], 1);
        assert_eq!(session.owner_id.as_deref(), Some("me"));
    }

    #[tokio::test]
    async fn file_is_append_only_jsonl() {
        let temp = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(temp.path()).unwrap();
        store.get_or_create("s1", None, "agent").await.unwrap();
        store
            .append_run("s1", sample_run("r1", None, RunnerType::Solo))
            .await
            .unwrap();
        store
            .append_run("s1", sample_run("r2", None, RunnerType::Solo))
            .await
            .unwrap();

        let content = std::fs::read_to_string(temp.path().join("s1.jsonl")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("\"type\":\"session\""));
        assert!(lines[1].contains("\"r1\""));
        assert!(lines[2].contains("\"r2\""));
    }

    #[tokio::test]
    async fn unsafe_session_ids_are_sanitized() {
        let temp = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(temp.path()).unwrap();
        store
            .get_or_create("../escape/attempt", None, "agent")
            .await
            .unwrap();
        // The file stays inside the base dir.
        let entries: Vec<_> = std::fs::read_dir(temp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn list_sessions_orders_by_recency() {
        let temp = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(temp.path()).unwrap();
        store.get_or_create("a", None, "agent").await.unwrap();
        store.get_or_create("b", None, "agent").await.unwrap();
        store
            .append_run("a", sample_run("r1", None, RunnerType::Solo))
            .await
            .unwrap();

        let sessions = store.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 2);
    }
}
