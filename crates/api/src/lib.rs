//! HTTP surface: job creation, status, cancel, and the poll-callback
//! entry point.

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Assemble the full application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::health::router())
        .nest("/api/v1/jobs", routes::jobs::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
