//! HTTP route handlers

pub mod geotag;
pub mod health;
pub mod linking;

use axum::Router;

use crate::state::AppState;

/// Every route, without middleware layers
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest("/api/v1/health", health::router())
        .nest("/api/v1/linking", linking::router())
        .nest("/api/v1/geotag", geotag::router())
        .with_state(state)
}
