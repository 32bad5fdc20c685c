//! API routes.

mod run;
mod sessions;

use axum::Router;

use crate::AppState;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/run", run::router())
        .nest("/sessions", sessions::router())
}
