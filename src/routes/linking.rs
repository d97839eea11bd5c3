//! Linking relationship endpoints
//!
//! - Canvas views with their relationships and icon states
//! - Global cache status, refetch and invalidation
//! - Membership validation, save, delete and cascade pruning

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::annotations::{icon_states, IconState, LinkingAnnotation, LinkingDetails};
use crate::cache::{CacheSnapshot, LoadProgress, GLOBAL_CACHE_KEY};
use crate::error::{AppError, Result};
use crate::loader::CanvasView;
use crate::save::{
    CascadeReport, Confirmation, DeleteSummary, DuplicateReport, OrphanReport, RemovablePurpose, SaveRequest,
    SaveSummary,
};
use crate::state::AppState;
use crate::validation::{validate_against_cache, ValidationResult};

// ============================================================================
// Canvas view
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CanvasQuery {
    /// Comma-separated annotation ids drawn on the canvas but not loaded here
    pub extra: Option<String>,
    #[serde(default)]
    pub reload: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasLinkingResponse {
    pub canvas_id: String,
    pub annotation_ids: Vec<String>,
    pub linking: Vec<LinkingAnnotation>,
    pub icon_states: HashMap<String, IconState>,
    pub complete: bool,
    pub pages_loaded: u32,
    pub cache_has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

fn needs_load(view: &CanvasView, canvas_id: &str, reload: bool) -> bool {
    reload || view.canvas_id.as_deref() != Some(canvas_id) || (!view.is_loading && !view.complete)
}

fn split_ids(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

/// Load a canvas and resolve every relationship touching it
async fn canvas_linking(
    State(state): State<AppState>,
    Path(canvas_id): Path<String>,
    Query(query): Query<CanvasQuery>,
) -> Result<Json<CanvasLinkingResponse>> {
    let loader = state.canvases().loader(&canvas_id);
    let current = loader.view();
    let view = if needs_load(&current, &canvas_id, query.reload) {
        loader.load(&canvas_id).await
    } else {
        current
    };

    let snapshot = state.cache().get().await;
    let annotation_ids = view.annotation_ids();
    let mut known = split_ids(query.extra.as_deref());
    known.extend(annotation_ids.iter().cloned());

    // The canvas copy is the fresher one
    let mut linking = view.linking.clone();
    for cached in state.cache().annotations_for_canvas(&canvas_id, &known) {
        if !linking.iter().any(|l| l.id == cached.id) {
            linking.push(cached);
        }
    }

    Ok(Json(CanvasLinkingResponse {
        icon_states: icon_states(&linking),
        canvas_id,
        annotation_ids,
        linking,
        complete: view.complete,
        pages_loaded: view.pages_loaded,
        cache_has_more: snapshot.has_more(),
        last_error: view.last_error.clone(),
    }))
}

/// Relationship details for one member annotation
async fn annotation_details(
    State(state): State<AppState>,
    Path(annotation_id): Path<String>,
) -> Result<Json<LinkingDetails>> {
    let from_canvas = state
        .canvases()
        .holding_any(std::slice::from_ref(&annotation_id))
        .into_iter()
        .find_map(|loader| loader.linking_for_target(&annotation_id));

    let linking = match from_canvas {
        Some(linking) => linking,
        None => {
            state.cache().get().await;
            state
                .cache()
                .find_for_target(&annotation_id)
                .ok_or_else(|| AppError::NotFound(format!("No relationship for annotation {}", annotation_id)))?
        }
    };

    Ok(Json(LinkingDetails::resolve(&linking, &annotation_id)))
}

// ============================================================================
// Global cache
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStatusResponse {
    pub key: &'static str,
    pub loaded: usize,
    pub total: usize,
    pub has_more: bool,
    pub is_loading: bool,
    pub is_loading_more: bool,
    pub refresh_count: u64,
    pub load_progress: Option<LoadProgress>,
    pub fetched_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl From<&CacheSnapshot> for GlobalStatusResponse {
    fn from(snapshot: &CacheSnapshot) -> Self {
        let entry = snapshot.entry.as_deref();
        Self {
            key: GLOBAL_CACHE_KEY,
            loaded: snapshot.annotations().len(),
            total: entry.map(|e| e.total_count).unwrap_or(0),
            has_more: snapshot.has_more(),
            is_loading: snapshot.is_loading,
            is_loading_more: snapshot.is_loading_more,
            refresh_count: snapshot.refresh_count,
            load_progress: entry.map(|e| e.load_progress),
            fetched_at: entry.map(|e| e.fetched_at),
            last_error: snapshot.last_error.clone(),
        }
    }
}

async fn global_status(State(state): State<AppState>) -> Json<GlobalStatusResponse> {
    let snapshot = state.cache().get().await;
    Json(GlobalStatusResponse::from(&snapshot))
}

async fn global_refetch(State(state): State<AppState>) -> Json<GlobalStatusResponse> {
    let snapshot = state.cache().refetch().await;
    Json(GlobalStatusResponse::from(&snapshot))
}

async fn global_invalidate(State(state): State<AppState>) -> StatusCode {
    state.cache().invalidate();
    StatusCode::NO_CONTENT
}

// ============================================================================
// Validation and save
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    pub candidates: Vec<String>,
    pub exclude_linking_id: Option<String>,
    pub canvas_id: Option<String>,
}

async fn validate(State(state): State<AppState>, Json(req): Json<ValidateRequest>) -> Json<ValidationResult> {
    state.cache().get().await;
    let known = req
        .canvas_id
        .as_deref()
        .and_then(|c| state.canvases().existing(c))
        .map(|loader| loader.view().linking.clone())
        .unwrap_or_default();

    Json(validate_against_cache(
        state.cache(),
        &req.candidates,
        req.exclude_linking_id.as_deref(),
        &known,
    ))
}

async fn save(State(state): State<AppState>, Json(req): Json<SaveRequest>) -> Result<Json<SaveSummary>> {
    let mut touched = req.linked_ids.clone();
    touched.push(req.anchor_id.clone());
    let loaders = state.affected_loaders(&touched, req.canvas_id.as_deref());

    let summary = state.orchestrator().save(&req, &loaders).await?;
    Ok(Json(summary))
}

// ============================================================================
// Deletion
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub confirmation: Confirmation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<DeleteSummary>,
}

/// Members of a relationship as last seen by any view
fn known_members(state: &AppState, linking_id: &str) -> Vec<String> {
    state
        .cache()
        .find_by_id(linking_id)
        .map(|l| l.target)
        .unwrap_or_default()
}

/// First call arms, a second call for the same id within the window deletes
async fn delete_linking(
    State(state): State<AppState>,
    Path(linking_id): Path<String>,
) -> Result<(StatusCode, Json<DeleteResponse>)> {
    let confirmation = state.confirmations().request(&linking_id);
    if matches!(confirmation, Confirmation::Armed { .. }) {
        tracing::debug!(linking_id = %linking_id, "Delete armed, awaiting confirmation");
        return Ok((
            StatusCode::ACCEPTED,
            Json(DeleteResponse {
                confirmation,
                result: None,
            }),
        ));
    }

    let loaders = state.affected_loaders(&known_members(&state, &linking_id), None);
    let summary = state.orchestrator().delete_relationship(&linking_id, &loaders).await?;
    Ok((
        StatusCode::OK,
        Json(DeleteResponse {
            confirmation,
            result: Some(summary),
        }),
    ))
}

async fn delete_purpose(
    State(state): State<AppState>,
    Path((linking_id, purpose)): Path<(String, String)>,
) -> Result<Json<DeleteSummary>> {
    let purpose = RemovablePurpose::parse(&purpose)?;
    let loaders = state.affected_loaders(&known_members(&state, &linking_id), None);
    let summary = state.orchestrator().remove_purpose(&linking_id, purpose, &loaders).await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeRequest {
    pub deleted_ids: Vec<String>,
}

async fn cascade(State(state): State<AppState>, Json(req): Json<CascadeRequest>) -> Result<Json<CascadeReport>> {
    if req.deleted_ids.is_empty() {
        return Err(AppError::BadRequest("deletedIds must not be empty".to_string()));
    }
    let loaders = state.affected_loaders(&req.deleted_ids, None);
    let report = state.orchestrator().cascade_prune(&req.deleted_ids, &loaders).await?;
    Ok(Json(report))
}

// ============================================================================
// Cleanup
// ============================================================================

fn default_dry_run() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupRequest {
    /// Analyze only; set to false to apply
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
}

async fn cleanup_duplicates(
    State(state): State<AppState>,
    Json(req): Json<CleanupRequest>,
) -> Result<Json<DuplicateReport>> {
    let loaders = state.canvases().all();
    let report = state.orchestrator().consolidate_duplicates(req.dry_run, &loaders).await?;
    Ok(Json(report))
}

async fn cleanup_orphans(
    State(state): State<AppState>,
    Json(req): Json<CleanupRequest>,
) -> Result<Json<OrphanReport>> {
    let loaders = state.canvases().all();
    let report = state.orchestrator().repair_orphans(req.dry_run, &loaders).await?;
    Ok(Json(report))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/canvas/:canvas_id", get(canvas_linking))
        .route("/annotation/:annotation_id", get(annotation_details))
        .route("/global", get(global_status))
        .route("/global/refetch", post(global_refetch))
        .route("/global/invalidate", post(global_invalidate))
        .route("/validate", post(validate))
        .route("/save", post(save))
        .route("/cascade", post(cascade))
        .route("/cleanup/duplicates", post(cleanup_duplicates))
        .route("/cleanup/orphans", post(cleanup_orphans))
        .route("/:linking_id", delete(delete_linking))
        .route("/:linking_id/body/:purpose", delete(delete_purpose))
}
