//! Per-run JSONL log.
//!
//! One file per run, named by its start timestamp, holding a sequence of
//! `{seq, ts, type, payload}` records. Provider secrets never reach the
//! payload: key material is scrubbed before writing.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use super::exporter::RunExporter;

/// One log record.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub seq: u64,
    pub ts: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub payload: Value,
}

enum Sink {
    File { path: PathBuf, file: Mutex<File> },
    Exporter(Arc<dyn RunExporter>),
    Null,
}

pub struct RunLogger {
    seq: AtomicU64,
    sink: Sink,
}

impl RunLogger {
    /// File-backed logger under `dir`, named by the run start timestamp.
    pub fn to_dir(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create log dir {dir:?}"))?;
        let name = format!("run_{}.jsonl", Utc::now().format("%Y%m%d_%H%M%S%.3f"));
        let path = dir.join(name);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("cannot open run log {path:?}"))?;
        Ok(Self {
            seq: AtomicU64::new(0),
            sink: Sink::File {
                path,
                file: Mutex::new(file),
            },
        })
    }

    /// Exporter-backed logger; suppresses the file sink entirely.
    pub fn with_exporter(exporter: Arc<dyn RunExporter>) -> Self {
        Self {
            seq: AtomicU64::new(0),
            sink: Sink::Exporter(exporter),
        }
    }

    /// Logger that drops everything (logging disabled for the run).
    pub fn disabled() -> Self {
        Self {
            seq: AtomicU64::new(0),
            sink: Sink::Null,
        }
    }

    /// Path of the file sink, if any.
    pub fn path(&self) -> Option<&Path> {
        match &self.sink {
            Sink::File { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Append a record. `record_type` is one of step / request / response /
    /// tool_execution / completion.
    pub fn log(&self, record_type: &str, payload: Value) {
        let record = LogRecord {
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            ts: Utc::now().to_rfc3339(),
            record_type: record_type.to_string(),
            payload: scrub_secrets(payload),
        };

        match &self.sink {
            Sink::File { file, path } => {
                let Ok(json) = serde_json::to_string(&record) else {
                    return;
                };
                let mut file = match file.lock() {
                    Ok(file) => file,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if let Err(e) = writeln!(file, "{json}") {
                    warn!("failed to write run log {path:?}: {e}");
                }
            }
            Sink::Exporter(exporter) => exporter.export(&record),
            Sink::Null => {}
        }
    }
}

const SECRET_KEYS: &[&str] = &["api_key", "authorization", "x-api-key", "token"];

/// Recursively drop obviously secret-bearing keys from a payload.
fn scrub_secrets(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(key, _)| {
                    let lower = key.to_ascii_lowercase();
                    !SECRET_KEYS.iter().any(|s| lower.contains(s))
                })
                .map(|(key, value)| (key, scrub_secrets(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(scrub_secrets).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn records_are_sequenced_jsonl() {
        let temp = tempfile::tempdir().unwrap();
        let logger = RunLogger::to_dir(temp.path()).unwrap();
        logger.log("step", json!({"step": 1}));
        logger.log("response", json!({"content": "hi"}));

        let content = std::fs::read_to_string(logger.path().unwrap()).unwrap();
        let records: Vec<Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["seq"], 0);
        assert_eq!(records[1]["seq"], 1);
        assert_eq!(records[0]["type"], "step");
    }

    #[test]
    fn secrets_are_scrubbed() {
        let scrubbed = scrub_secrets(json!({
            "model": "m",
            "api_key": "sk-secret",
            "headers": {"Authorization": "Bearer x", "accept": "json"}
        }));
        assert!(scrubbed.get("api_key").is_none());
        assert!(scrubbed["headers"].get("Authorization").is_none());
        assert_eq!(scrubbed["headers"]["accept"], "json");
    }

    #[test]
    fn exporter_suppresses_file_sink() {
        static COUNT: AtomicUsize = AtomicUsize::new(0);
        let exporter = Arc::new(CallbackExporterFn);
        let logger = RunLogger::with_exporter(exporter);
        logger.log("step", json!({}));
        logger.log("completion", json!({}));
        assert!(logger.path().is_none());
        assert_eq!(COUNT.load(Ordering::SeqCst), 2);

        struct CallbackExporterFn;
        impl RunExporter for CallbackExporterFn {
            fn export(&self, _record: &LogRecord) {
                COUNT.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}
