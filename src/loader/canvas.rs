//! Canvas-scoped loader
//!
//! Loads the content annotations drawn on one canvas page by page, then the
//! linking annotations that reference any of them. Every commit is published
//! through a `watch` channel so consumers see partial pages as they land.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::annotations::{icon_states, ContentAnnotation, IconState, LinkingAnnotation};
use crate::store::RelationshipStore;

/// Upper bound on pages per load
const MAX_PAGES: u32 = 1000;

/// Published state of a canvas load
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasView {
    pub canvas_id: Option<String>,
    pub annotations: Vec<ContentAnnotation>,
    pub linking: Vec<LinkingAnnotation>,
    /// ETag or `modified` stamp per annotation id
    pub versions: HashMap<String, String>,
    pub pages_loaded: u32,
    pub is_loading: bool,
    /// Every page was retrieved
    pub complete: bool,
    pub last_error: Option<String>,
    pub generation: u64,
}

impl CanvasView {
    pub fn annotation_ids(&self) -> Vec<String> {
        self.annotations.iter().map(|a| a.id.clone()).collect()
    }

    pub fn icon_states(&self) -> HashMap<String, IconState> {
        icon_states(&self.linking)
    }
}

/// Loader for one canvas at a time
pub struct CanvasLoader {
    store: Arc<dyn RelationshipStore>,
    generation: AtomicU64,
    view: watch::Sender<Arc<CanvasView>>,
}

impl CanvasLoader {
    pub fn new(store: Arc<dyn RelationshipStore>) -> Self {
        let (view, _) = watch::channel(Arc::new(CanvasView::default()));
        Self {
            store,
            generation: AtomicU64::new(0),
            view,
        }
    }

    pub fn view(&self) -> Arc<CanvasView> {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<CanvasView>> {
        self.view.subscribe()
    }

    /// Apply `update` only if `generation` is still the current load
    fn commit(&self, generation: u64, update: impl FnOnce(&mut CanvasView)) -> bool {
        self.view.send_if_modified(|current| {
            if current.generation != generation {
                return false;
            }
            update(Arc::make_mut(current));
            true
        })
    }

    /// Load a canvas from scratch, replacing the current view
    pub async fn load(&self, canvas_id: &str) -> Arc<CanvasView> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.view.send_replace(Arc::new(CanvasView {
            canvas_id: Some(canvas_id.to_string()),
            is_loading: true,
            generation,
            ..CanvasView::default()
        }));
        tracing::debug!(canvas_id = %canvas_id, generation, "Loading canvas annotations");

        let mut page = 0;
        loop {
            match self.store.list_content_page(canvas_id, page).await {
                Ok(result) => {
                    let count = result.items.len();
                    let committed = self.commit(generation, |view| {
                        for item in result.items {
                            if let Some(version) = item.version {
                                view.versions.insert(item.value.id.clone(), version);
                            }
                            view.annotations.push(item.value);
                        }
                        view.pages_loaded += 1;
                        view.complete = !result.has_more;
                    });
                    if !committed {
                        tracing::debug!(canvas_id = %canvas_id, page, "Discarded page for a superseded load");
                        return self.view();
                    }
                    tracing::debug!(canvas_id = %canvas_id, page, count, "Committed annotation page");

                    if !result.has_more {
                        break;
                    }
                    page += 1;
                    if page >= MAX_PAGES {
                        tracing::warn!(canvas_id = %canvas_id, page, "Page limit reached, stopping pagination");
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(canvas_id = %canvas_id, page, error = %e, "Page fetch failed, keeping loaded pages");
                    self.commit(generation, |view| view.last_error = Some(e.to_string()));
                    break;
                }
            }
        }

        let ids = self.view().annotation_ids();
        if !ids.is_empty() {
            match self.store.list_linking_for_targets(&ids).await {
                Ok(linking) => {
                    let count = linking.len();
                    if self.commit(generation, |view| view.linking = linking) {
                        tracing::debug!(canvas_id = %canvas_id, count, "Committed linking annotations");
                    }
                }
                Err(e) => {
                    tracing::warn!(canvas_id = %canvas_id, error = %e, "Linking lookup failed");
                    self.commit(generation, |view| view.last_error = Some(e.to_string()));
                }
            }
        }

        self.commit(generation, |view| view.is_loading = false);
        let view = self.view();
        tracing::info!(
            canvas_id = %canvas_id,
            annotations = view.annotations.len(),
            linking = view.linking.len(),
            complete = view.complete,
            "Canvas loaded"
        );
        view
    }

    /// Clear the view; in-flight loads stop committing
    pub fn invalidate(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let canvas_id = self.view.borrow().canvas_id.clone();
        self.view.send_replace(Arc::new(CanvasView {
            canvas_id,
            generation,
            ..CanvasView::default()
        }));
    }

    /// Reload the current canvas, if any
    pub async fn refetch(&self) -> Arc<CanvasView> {
        let canvas_id = self.view.borrow().canvas_id.clone();
        match canvas_id {
            Some(canvas_id) => self.load(&canvas_id).await,
            None => self.view(),
        }
    }

    pub fn linking_for_target(&self, annotation_id: &str) -> Option<LinkingAnnotation> {
        self.view
            .borrow()
            .linking
            .iter()
            .find(|l| l.contains_target(annotation_id))
            .cloned()
    }

    /// Other members of the annotation's relationship, in reading order
    pub fn linked_annotations(&self, annotation_id: &str) -> Vec<String> {
        self.linking_for_target(annotation_id)
            .map(|l| l.target.into_iter().filter(|id| id != annotation_id).collect())
            .unwrap_or_default()
    }

    pub fn is_linked(&self, annotation_id: &str) -> bool {
        self.linking_for_target(annotation_id).is_some()
    }

    pub fn version_of(&self, annotation_id: &str) -> Option<String> {
        self.view.borrow().versions.get(annotation_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreOp};
    use serde_json::json;

    fn content(id: &str, canvas: &str) -> ContentAnnotation {
        serde_json::from_value(json!({
            "id": id,
            "motivation": "textspotting",
            "modified": "2024-05-01T10:00:00Z",
            "target": { "source": canvas, "selector": { "type": "SvgSelector", "value": "<svg/>" } }
        }))
        .unwrap()
    }

    fn store_with_pages(count: usize, page_size: usize) -> Arc<MemoryStore> {
        let store = MemoryStore::new().with_page_size(page_size);
        for i in 0..count {
            store.insert_content(content(&format!("a{}", i), "canvas-1"));
        }
        store.insert_content(content("elsewhere", "canvas-2"));
        store.insert_linking(LinkingAnnotation::new("L1", vec!["a0".into(), "a3".into()]));
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_loads_every_page_then_linking() {
        let store = store_with_pages(5, 2);
        let loader = CanvasLoader::new(store.clone());

        let view = loader.load("canvas-1").await;
        assert_eq!(view.annotations.len(), 5);
        assert_eq!(view.pages_loaded, 3);
        assert!(view.complete);
        assert!(!view.is_loading);
        assert_eq!(view.linking.len(), 1);
        assert_eq!(store.calls(StoreOp::ContentPage), 3);

        assert!(loader.is_linked("a3"));
        assert_eq!(loader.linked_annotations("a3"), vec!["a0"]);
        assert_eq!(loader.version_of("a1").as_deref(), Some("2024-05-01T10:00:00Z"));
    }

    #[tokio::test]
    async fn test_page_failure_keeps_committed_pages() {
        let store = store_with_pages(5, 2);
        store.fail_times(StoreOp::ContentPage, Some(1), 1);
        let loader = CanvasLoader::new(store.clone());

        let view = loader.load("canvas-1").await;
        assert_eq!(view.annotations.len(), 2);
        assert!(!view.complete);
        assert!(view.last_error.is_some());
        assert_eq!(store.calls(StoreOp::ContentPage), 2);
        // Linking lookup still runs over what was loaded
        assert_eq!(view.linking.len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_discards_in_flight_load() {
        let store = MemoryStore::new()
            .with_page_size(1)
            .with_latency(std::time::Duration::from_millis(20));
        store.insert_content(content("a0", "canvas-1"));
        store.insert_content(content("a1", "canvas-1"));
        let loader = Arc::new(CanvasLoader::new(Arc::new(store)));

        let background = {
            let loader = loader.clone();
            tokio::spawn(async move { loader.load("canvas-1").await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        loader.invalidate();
        background.await.unwrap();

        let view = loader.view();
        assert!(view.annotations.is_empty());
        assert_eq!(view.canvas_id.as_deref(), Some("canvas-1"));
    }

    #[tokio::test]
    async fn test_subscribers_observe_each_page() {
        let store = store_with_pages(4, 2);
        let loader = CanvasLoader::new(store);
        let mut updates = loader.subscribe();

        let watcher = tokio::spawn(async move {
            let mut sizes = Vec::new();
            while updates.changed().await.is_ok() {
                let view = updates.borrow_and_update().clone();
                sizes.push(view.annotations.len());
                if !view.is_loading && view.generation > 0 {
                    break;
                }
            }
            sizes
        });

        loader.load("canvas-1").await;
        let sizes = watcher.await.unwrap();
        assert_eq!(sizes.last(), Some(&4));
        assert!(sizes.iter().all(|&n| n <= 4));
    }

    #[tokio::test]
    async fn test_refetch_reloads_current_canvas() {
        let store = store_with_pages(2, 10);
        let loader = CanvasLoader::new(store.clone());
        loader.load("canvas-1").await;

        store.insert_linking(LinkingAnnotation::new("L2", vec!["a1".into(), "b".into()]));
        let view = loader.refetch().await;
        assert_eq!(view.linking.len(), 2);
    }
}
