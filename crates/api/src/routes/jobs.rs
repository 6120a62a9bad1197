//! Route definitions for the `/jobs` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/api/v1/jobs`.
///
/// ```text
/// POST   /                -> create_job
/// GET    /{id}            -> get_job
/// POST   /{id}/poll       -> poll_job
/// POST   /{id}/cancel     -> cancel_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(jobs::create_job))
        .route("/{id}", get(jobs::get_job))
        .route("/{id}/poll", post(jobs::poll_job))
        .route("/{id}/cancel", post(jobs::cancel_job))
}
