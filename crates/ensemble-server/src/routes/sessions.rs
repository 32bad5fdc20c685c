//! Session inspection endpoints.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use crate::error::AppError;
use crate::types::SessionSummary;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_sessions))
        .route("/:id", get(get_session))
}

async fn list_sessions(State(state): State<AppState>) -> Result<Json<Vec<SessionSummary>>, AppError> {
    let sessions = state.store.list_sessions().await?;
    let summaries = sessions
        .into_iter()
        .map(|s| SessionSummary {
            session_id: s.session_id,
            name: s.name,
            run_count: s.runs.len(),
            created_at: s.created_at.to_rfc3339(),
            updated_at: s.updated_at.to_rfc3339(),
        })
        .collect();
    Ok(Json(summaries))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ensemble_core::session::Session>, AppError> {
    let session = state
        .store
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))?;
    Ok(Json(session))
}
