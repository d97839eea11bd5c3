//! HTTP surface, driven through the router without a listener

mod common;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{app_state, content, linking};
use reunions_linking::cache::ManualClock;
use reunions_linking::routes;
use reunions_linking::store::MemoryStore;

fn app_over(store: MemoryStore) -> (Router, Arc<MemoryStore>) {
    let store = Arc::new(store);
    let state = app_state(store.clone(), Arc::new(ManualClock::default()));
    (routes::app(state), store)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let (app, _) = app_over(MemoryStore::new());
    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "reunions-linking");
}

#[tokio::test]
async fn test_canvas_view_lists_relationships_and_icons() {
    let store = MemoryStore::new().with_page_size(1);
    store.insert_content(content("a0", "canvas-1"));
    store.insert_content(content("a1", "canvas-1"));
    store.insert_content(content("z9", "canvas-2"));
    store.insert_linking(linking("L1", &["a0", "a1"]));
    store.insert_linking(linking("L2", &["z9", "x1"]));
    let (app, _) = app_over(store);

    let (status, body) = send(&app, Method::GET, "/api/v1/linking/canvas/canvas-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["complete"], true);
    assert_eq!(body["pagesLoaded"], 2);
    assert_eq!(body["annotationIds"], json!(["a0", "a1"]));
    assert_eq!(body["linking"].as_array().unwrap().len(), 1);
    assert_eq!(body["linking"][0]["id"], "L1");
    assert_eq!(body["iconStates"]["a0"]["isLinked"], true);
    assert!(body["iconStates"].get("z9").is_none());
}

#[tokio::test]
async fn test_save_then_validate_then_details() {
    let (app, store) = app_over(MemoryStore::new());

    let (status, saved) = send(
        &app,
        Method::POST,
        "/api/v1/linking/save",
        Some(json!({ "anchorId": "a", "linkedIds": ["b"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saved["operation"], "created");
    assert_eq!(saved["target"], json!(["a", "b"]));
    assert_eq!(store.linking().len(), 1);

    let (status, validation) = send(
        &app,
        Method::POST,
        "/api/v1/linking/validate",
        Some(json!({ "candidates": ["b", "c"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(validation["isValid"], false);
    assert_eq!(validation["conflicts"][0]["annotationId"], "b");
    assert_eq!(validation["conflicts"][0]["existingLinkingId"], saved["linkingId"]);

    let (status, details) = send(&app, Method::GET, "/api/v1/linking/annotation/b", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(details["linkedAnnotations"], json!(["a"]));

    let (status, _) = send(&app, Method::GET, "/api/v1/linking/annotation/nobody", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_save_is_unprocessable() {
    let (app, store) = app_over(MemoryStore::new());
    let (status, body) = send(&app, Method::POST, "/api/v1/linking/save", Some(json!({ "anchorId": "a" }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_error");
    assert!(store.linking().is_empty());
}

#[tokio::test]
async fn test_save_over_concurrent_edit_conflicts() {
    let store = MemoryStore::new();
    store.insert_linking(linking("L1", &["a", "b"]));
    store.compete_after_next_get(linking("L1", &["a", "b", "x"]));
    let (app, store) = app_over(store);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/linking/save",
        Some(json!({ "anchorId": "a", "linkedIds": ["c"], "existingLinkingId": "L1" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "concurrent_modification");
    assert_eq!(store.linking_by_id("L1").unwrap().target, vec!["a", "b", "x"]);
}

#[tokio::test]
async fn test_delete_needs_confirmation() {
    let store = MemoryStore::new();
    store.insert_linking(linking("L1", &["a", "b"]));
    let (app, store) = app_over(store);

    let (status, first) = send(&app, Method::DELETE, "/api/v1/linking/L1", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(first["confirmation"]["status"], "armed");
    assert!(store.linking_by_id("L1").is_some());

    let (status, second) = send(&app, Method::DELETE, "/api/v1/linking/L1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["confirmation"]["status"], "confirmed");
    assert_eq!(second["result"]["deleted"], true);
    assert!(store.linking_by_id("L1").is_none());
}

#[tokio::test]
async fn test_remove_purpose_routes() {
    let store = MemoryStore::new();
    store.insert_linking(linking("L1", &["a", "b"]));
    let (app, _) = app_over(store);

    let (status, _) = send(&app, Method::DELETE, "/api/v1/linking/L1/body/colour", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, Method::DELETE, "/api/v1/linking/L1/body/point", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_cascade_prunes_deleted_members() {
    let store = MemoryStore::new();
    store.insert_linking(linking("L1", &["a", "b", "c"]));
    store.insert_linking(linking("L2", &["a", "d"]));
    let (app, store) = app_over(store);

    let (status, report) = send(
        &app,
        Method::POST,
        "/api/v1/linking/cascade",
        Some(json!({ "deletedIds": ["a"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["affectedLinking"], 2);
    assert_eq!(report["updated"], 1);
    assert_eq!(report["deleted"], 1);
    assert_eq!(store.linking_by_id("L1").unwrap().target, vec!["b", "c"]);

    let (status, _) = send(&app, Method::POST, "/api/v1/linking/cascade", Some(json!({ "deletedIds": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cleanup_analyzes_then_applies() {
    let store = MemoryStore::new();
    store.insert_content(content("a", "canvas-1"));
    store.insert_content(content("b", "canvas-1"));
    store.insert_linking(linking("L1", &["a", "b"]));
    store.insert_linking(linking("L2", &["b", "a"]));
    store.insert_linking(linking("L3", &["a", "b", "gone"]));
    let (app, store) = app_over(store);

    let (status, report) = send(&app, Method::POST, "/api/v1/linking/cleanup/duplicates", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["dryRun"], true);
    assert_eq!(report["duplicates"], 1);
    assert_eq!(report["groups"][0]["removed"], json!(["L2"]));
    assert_eq!(store.linking().len(), 3);

    let (status, report) = send(
        &app,
        Method::POST,
        "/api/v1/linking/cleanup/duplicates",
        Some(json!({ "dryRun": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["deleted"], 1);
    assert!(store.linking_by_id("L2").is_none());

    let (status, report) = send(
        &app,
        Method::POST,
        "/api/v1/linking/cleanup/orphans",
        Some(json!({ "dryRun": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["withOrphans"], 1);
    assert_eq!(report["details"][0]["orphanedTargets"], json!(["gone"]));
    assert_eq!(report["repaired"], 1);
    assert_eq!(store.linking_by_id("L3").unwrap().target, vec!["a", "b"]);
}

#[tokio::test]
async fn test_global_status_and_invalidate() {
    let store = MemoryStore::new();
    store.insert_linking(linking("L1", &["a", "b"]));
    let (app, _) = app_over(store);

    let (status, body) = send(&app, Method::GET, "/api/v1/linking/global", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["loaded"], 1);
    assert_eq!(body["hasMore"], false);
    assert_eq!(body["refreshCount"], 0);

    let (status, _) = send(&app, Method::POST, "/api/v1/linking/global/invalidate", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, Method::POST, "/api/v1/linking/global/refetch", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["loaded"], 1);
    assert!(body["refreshCount"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn test_geotag_search_and_preview() {
    let (app, _) = app_over(MemoryStore::new());

    let (status, body) = send(&app, Method::GET, "/api/v1/geotag/search?q=batavia&source=nominatim", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["results"][0]["displayName"], "Batavia");

    let (status, body) = send(&app, Method::GET, "/api/v1/geotag/search?q=batavia&source=gavoc", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);

    let (status, _) = send(&app, Method::GET, "/api/v1/geotag/search?q=batavia&source=atlas", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/geotag/normalize",
        Some(json!({ "kind": "gazetteer", "display_name": "Batavia", "lat": "-6.13", "lon": "106.8" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["label"], "Batavia");
    assert_eq!(body["coordinates"], json!([106.8, -6.13]));
}
