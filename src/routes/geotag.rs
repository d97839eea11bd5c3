//! Place search and geotag preview endpoints

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::geotag::{normalize, GeotagSource, NormalizedGeotag, SearchFilter, SearchResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    /// Provider name or kind; `all` when absent
    pub source: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub total: usize,
    pub results: Vec<SearchResult>,
}

async fn search(State(state): State<AppState>, Query(params): Query<SearchQuery>) -> Result<Json<SearchResponse>> {
    let filter = SearchFilter::parse(params.source.as_deref())
        .ok_or_else(|| AppError::BadRequest(format!("Unknown source: {}", params.source.unwrap_or_default())))?;
    let query = params.q.unwrap_or_default();

    let results = state.geotag().search(&query, filter).await?;
    Ok(Json(SearchResponse {
        total: results.len(),
        query,
        results,
    }))
}

/// Bodies a save would write for this provider record
async fn preview(Json(source): Json<GeotagSource>) -> Result<Json<NormalizedGeotag>> {
    Ok(Json(normalize(&source)?))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/search", get(search))
        .route("/normalize", post(preview))
}
