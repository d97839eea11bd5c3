//! Health check endpoints

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub service: &'static str,
    /// Linking annotations currently held by the global cache
    pub cached_linking: usize,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        service: "reunions-linking",
        cached_linking: state.cache().snapshot().annotations().len(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health_check))
}
