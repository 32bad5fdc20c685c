//! Workflow trace log.
//!
//! Higher-level event stream for multi-agent runs, one JSONL file per
//! trace. Events carry run linkage (`run_id`, `parent_run_id`) so fork/join
//! topology can be reconstructed afterwards.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEventType {
    WorkflowStart,
    AgentStart,
    Delegation,
    TaskStart,
    MessagePass,
    TaskEnd,
    AgentEnd,
    WorkflowEnd,
}

#[derive(Serialize)]
struct TraceEvent<'a> {
    trace_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    run_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_run_id: Option<&'a str>,
    event_type: TraceEventType,
    ts: String,
    payload: Value,
}

pub struct TraceLogger {
    trace_id: String,
    path: PathBuf,
    file: Mutex<File>,
}

impl TraceLogger {
    /// Start a trace under `dir`. `trace_type` names the workflow kind
    /// (team, graph, solo) and lands in the file name.
    pub fn start(dir: &Path, trace_type: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create trace dir {dir:?}"))?;
        let trace_id = Uuid::new_v4().to_string()[..8].to_string();
        let path = dir.join(format!(
            "trace_{trace_type}_{}_{trace_id}.jsonl",
            Utc::now().format("%Y%m%d_%H%M%S")
        ));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("cannot open trace file {path:?}"))?;

        let logger = Self {
            trace_id,
            path,
            file: Mutex::new(file),
        };
        logger.event(TraceEventType::WorkflowStart, None, None, serde_json::json!({
            "trace_type": trace_type,
        }));
        Ok(logger)
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn event(
        &self,
        event_type: TraceEventType,
        run_id: Option<&str>,
        parent_run_id: Option<&str>,
        payload: Value,
    ) {
        let event = TraceEvent {
            trace_id: &self.trace_id,
            run_id,
            parent_run_id,
            event_type,
            ts: Utc::now().to_rfc3339(),
            payload,
        };
        let Ok(json) = serde_json::to_string(&event) else {
            return;
        };
        let mut file = match self.file.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(file, "{json}") {
            warn!("failed to write trace {:?}: {e}", self.path);
        }
    }

    /// Close the trace with a workflow_end event.
    pub fn end(&self, success: bool, result_preview: &str) {
        let preview: String = result_preview.chars().take(200).collect();
        self.event(
            TraceEventType::WorkflowEnd,
            None,
            None,
            serde_json::json!({"success": success, "result_preview": preview}),
        );
    }
}
