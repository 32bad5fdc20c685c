//! Observability exporter seam.
//!
//! When an exporter is installed on a run, the JSONL file sink is suppressed
//! and every record goes through the exporter's callback instead (this is
//! the Langfuse integration point).

use super::run_logger::LogRecord;

pub trait RunExporter: Send + Sync {
    fn export(&self, record: &LogRecord);
}

/// Exporter backed by a plain callback.
pub struct CallbackExporter<F>(pub F);

impl<F> RunExporter for CallbackExporter<F>
where
    F: Fn(&LogRecord) + Send + Sync,
{
    fn export(&self, record: &LogRecord) {
        (self.0)(record)
    }
}
