//! Request/response DTOs for the run endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use ensemble_core::agent::PendingInput;

/// Body for `POST /api/run` and `POST /api/run/stream`.
///
/// A request carrying the `session_id` of a paused run continues that run;
/// otherwise it starts a fresh one.
#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Display name recorded on the session.
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub max_steps: Option<usize>,
    #[serde(default)]
    pub instructions: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub success: bool,
    pub message: String,
    pub steps: usize,
    pub logs: Vec<Value>,
    pub run_id: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "is_false")]
    pub requires_input: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_request: Option<PendingInput>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub name: String,
    pub run_count: usize,
    pub created_at: String,
    pub updated_at: String,
}
