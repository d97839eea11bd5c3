//! Bounded set of per-canvas loaders

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use super::canvas::CanvasLoader;
use crate::store::RelationshipStore;

/// Default number of canvases kept loaded
pub const DEFAULT_MAX_CANVASES: usize = 32;

/// One loader per canvas, least recently used evicted first
pub struct CanvasRegistry {
    store: Arc<dyn RelationshipStore>,
    loaders: Mutex<LruCache<String, Arc<CanvasLoader>>>,
}

impl CanvasRegistry {
    pub fn new(store: Arc<dyn RelationshipStore>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            loaders: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Loader for a canvas, created empty on first use
    pub fn loader(&self, canvas_id: &str) -> Arc<CanvasLoader> {
        let mut loaders = self.loaders.lock();
        if let Some(loader) = loaders.get(canvas_id) {
            return loader.clone();
        }
        let loader = Arc::new(CanvasLoader::new(self.store.clone()));
        loaders.put(canvas_id.to_string(), loader.clone());
        loader
    }

    /// Loader for a canvas only if one exists
    pub fn existing(&self, canvas_id: &str) -> Option<Arc<CanvasLoader>> {
        self.loaders.lock().get(canvas_id).cloned()
    }

    /// Loaders whose view holds any of the given annotation ids
    pub fn holding_any(&self, annotation_ids: &[String]) -> Vec<Arc<CanvasLoader>> {
        self.loaders
            .lock()
            .iter()
            .filter(|(_, loader)| {
                let view = loader.view();
                view.annotations.iter().any(|a| annotation_ids.contains(&a.id))
                    || view.linking.iter().any(|l| l.target.iter().any(|t| annotation_ids.contains(t)))
            })
            .map(|(_, loader)| loader.clone())
            .collect()
    }

    /// Every loaded canvas
    pub fn all(&self) -> Vec<Arc<CanvasLoader>> {
        self.loaders.lock().iter().map(|(_, loader)| loader.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.loaders.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.lock().is_empty()
    }
}
