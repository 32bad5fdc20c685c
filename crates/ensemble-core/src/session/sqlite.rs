//! SQLite session backend.
//!
//! Sessions and runs live in two tables; runs are insert-only. The
//! connection sits behind a mutex and is never held across an await.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde_json::Value;

use super::{RunRecord, RunnerType, Session, SessionStore};

pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
}

impl SqliteSessionStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("cannot open session db {path:?}"))?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                owner_id   TEXT,
                name       TEXT NOT NULL,
                state      TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS runs (
                run_id        TEXT PRIMARY KEY,
                session_id    TEXT NOT NULL REFERENCES sessions(session_id),
                parent_run_id TEXT,
                runner_type   TEXT NOT NULL,
                runner_name   TEXT NOT NULL,
                task          TEXT NOT NULL,
                response      TEXT NOT NULL,
                success       INTEGER NOT NULL,
                steps         INTEGER NOT NULL,
                started_at    TEXT NOT NULL,
                ended_at      TEXT NOT NULL,
                metadata      TEXT NOT NULL DEFAULT '{}'
            );
            CREATE INDEX IF NOT EXISTS idx_runs_session ON runs(session_id, started_at);",
        )?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load_session(conn: &Connection, session_id: &str) -> Result<Option<Session>> {
        let mut stmt = conn.prepare(
            "SELECT session_id, owner_id, name, state, created_at, updated_at
             FROM sessions WHERE session_id = ?1",
        )?;
        let mut rows = stmt.query([session_id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let state: String = row.get(3)?;
        let created_at: String = row.get(4)?;
        let updated_at: String = row.get(5)?;
        let mut session = Session {
            session_id: row.get(0)?,
            owner_id: row.get(1)?,
            name: row.get(2)?,
            runs: Vec::new(),
            state: serde_json::from_str(&state).unwrap_or_default(),
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
        };

        let mut stmt = conn.prepare(
            "SELECT run_id, parent_run_id, runner_type, runner_name, task, response,
                    success, steps, started_at, ended_at, metadata
             FROM runs WHERE session_id = ?1 ORDER BY started_at, run_id",
        )?;
        let runs = stmt.query_map([session_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, bool>(6)?,
                row.get::<_, i64>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
                row.get::<_, String>(10)?,
            ))
        })?;

        for row in runs {
            let (run_id, parent, runner_type, runner_name, task, response, success, steps, started, ended, metadata) =
                row?;
            session.runs.push(RunRecord {
                run_id,
                parent_run_id: parent,
                runner_type: RunnerType::parse(&runner_type)
                    .ok_or_else(|| anyhow!("bad runner_type: {runner_type}"))?,
                runner_name,
                task,
                response,
                success,
                steps: steps as usize,
                started_at: parse_ts(&started)?,
                ended_at: parse_ts(&ended)?,
                metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
            });
        }

        Ok(Some(session))
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("bad timestamp: {s}"))?
        .with_timezone(&Utc))
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get_or_create(
        &self,
        session_id: &str,
        owner_id: Option<&str>,
        name: &str,
    ) -> Result<Session> {
        let conn = self.lock();
        if let Some(session) = Self::load_session(&conn, session_id)? {
            return Ok(session);
        }
        let session = Session::new(session_id, owner_id, name);
        conn.execute(
            "INSERT INTO sessions (session_id, owner_id, name, state, created_at, updated_at)
             VALUES (?1, ?2, ?3, '{}', ?4, ?5)",
            params![
                session.session_id,
                session.owner_id,
                session.name,
                session.created_at.to_rfc3339(),
                session.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(session)
    }

    async fn append_run(&self, session_id: &str, run: RunRecord) -> Result<()> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE sessions SET updated_at = ?2 WHERE session_id = ?1",
            params![session_id, Utc::now().to_rfc3339()],
        )?;
        if updated == 0 {
            return Err(anyhow!("unknown session: {session_id}"));
        }
        conn.execute(
            "INSERT INTO runs (run_id, session_id, parent_run_id, runner_type, runner_name,
                               task, response, success, steps, started_at, ended_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                run.run_id,
                session_id,
                run.parent_run_id,
                run.runner_type.as_str(),
                run.runner_name,
                run.task,
                run.response,
                run.success,
                run.steps as i64,
                run.started_at.to_rfc3339(),
                run.ended_at.to_rfc3339(),
                run.metadata.to_string(),
            ],
        )?;
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let conn = self.lock();
        Self::load_session(&conn, session_id)
    }

    async fn set_state(&self, session_id: &str, key: &str, value: Value) -> Result<()> {
        let conn = self.lock();
        let Some(session) = Self::load_session(&conn, session_id)? else {
            return Err(anyhow!("unknown session: {session_id}"));
        };
        let mut state = session.state;
        state.insert(key.to_string(), value);
        conn.execute(
            "UPDATE sessions SET state = ?2, updated_at = ?3 WHERE session_id = ?1",
            params![
                session_id,
                serde_json::to_string(&state)?,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let ids: Vec<String> = {
            let conn = self.lock();
            let mut stmt =
                conn.prepare("SELECT session_id FROM sessions ORDER BY updated_at DESC")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut sessions = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(session) = self.get(&id).await? {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{sample_run, RunnerType};

    #[tokio::test]
    async fn round_trips_runs_and_linkage() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        store.get_or_create("s1", Some("me"), "team").await.unwrap();

        store
            .append_run("s1", sample_run("r1", None, RunnerType::Leader))
            .await
            .unwrap();
        store
            .append_run("s1", sample_run("m1", Some("r1"), RunnerType::Member))
            .await
            .unwrap();

        let session = store.get("s1").await.unwrap().unwrap();
        assert_eq!(session.runs.len(), 2);
        assert_eq!(session.runs[1].parent_run_id.as_deref(), Some("r1"));
        assert_eq!(session.runs[1].runner_type, RunnerType::Member);
    }

    #[tokio::test]
    async fn state_merges_keys() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        store.get_or_create("s1", None, "agent").await.unwrap();
        store.set_state("s1", "a", serde_json::json!(1)).await.unwrap();
        store.set_state("s1", "b", serde_json::json!(2)).await.unwrap();

        let session = store.get("s1").await.unwrap().unwrap();
        assert_eq!(session.state.len(), 2);
    }

    #[tokio::test]
    async fn append_to_unknown_session_errors() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        assert!(store
            .append_run("ghost", sample_run("r1", None, RunnerType::Solo))
            .await
            .is_err());
    }
}
