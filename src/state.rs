//! Application state management

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Clock, GlobalLinkingCache, SystemClock};
use crate::config::{Config, StoreBackend};
use crate::geotag::{
    GavocProvider, GeotagProvider, GeotagSearch, GlobaliseProvider, NeruProvider, NominatimProvider,
};
use crate::loader::{CanvasLoader, CanvasRegistry};
use crate::save::{DeleteConfirmation, SaveOrchestrator};
use crate::store::{AnnoRepoStore, MemoryStore, RelationshipStore, StoreError};

/// Error type for state initialization
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to initialize store client: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to initialize provider client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    store: Arc<dyn RelationshipStore>,
    cache: Arc<GlobalLinkingCache>,
    canvases: CanvasRegistry,
    orchestrator: SaveOrchestrator,
    confirmations: DeleteConfirmation,
    geotag: GeotagSearch,
}

impl AppState {
    /// Wire the services over an existing store, clock and search
    pub fn new(config: Config, store: Arc<dyn RelationshipStore>, clock: Arc<dyn Clock>, geotag: GeotagSearch) -> Self {
        let cache = Arc::new(GlobalLinkingCache::new(store.clone(), clock.clone(), config.cache_config()));
        let canvases = CanvasRegistry::new(store.clone(), config.cache.max_canvases);
        let orchestrator = SaveOrchestrator::new(store.clone(), cache.clone(), clock.clone(), config.reconcile_config())
            .with_default_creator(config.default_creator());
        let confirmations = DeleteConfirmation::new(clock);

        Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                cache,
                canvases,
                orchestrator,
                confirmations,
                geotag,
            }),
        }
    }

    /// Build the configured store and the four geotag providers
    pub fn from_config(config: Config) -> Result<Self, StateError> {
        let store: Arc<dyn RelationshipStore> = match config.store.backend {
            StoreBackend::AnnoRepo => Arc::new(AnnoRepoStore::new(config.annorepo())?),
            StoreBackend::Memory => {
                tracing::warn!("Using the in-memory relationship store; nothing is persisted");
                Arc::new(MemoryStore::new())
            }
        };

        let timeout = Duration::from_secs(config.providers.timeout_secs);
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let providers: Vec<Arc<dyn GeotagProvider>> = vec![
            Arc::new(NeruProvider::new(client.clone(), &config.providers.neru_dataset_url)),
            Arc::new(GlobaliseProvider::new(client.clone(), &config.providers.globalise_url)),
            Arc::new(GavocProvider::new(client.clone(), &config.providers.gavoc_url)),
            Arc::new(NominatimProvider::new(client, &config.providers.nominatim_url)),
        ];
        let geotag = GeotagSearch::new(providers, timeout);

        Ok(Self::new(config, store, Arc::new(SystemClock), geotag))
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn RelationshipStore> {
        &self.inner.store
    }

    pub fn cache(&self) -> &Arc<GlobalLinkingCache> {
        &self.inner.cache
    }

    pub fn canvases(&self) -> &CanvasRegistry {
        &self.inner.canvases
    }

    pub fn orchestrator(&self) -> &SaveOrchestrator {
        &self.inner.orchestrator
    }

    pub fn confirmations(&self) -> &DeleteConfirmation {
        &self.inner.confirmations
    }

    pub fn geotag(&self) -> &GeotagSearch {
        &self.inner.geotag
    }

    /// Canvas views affected by a change to these annotations, plus the
    /// named canvas when it is loaded
    pub fn affected_loaders(&self, annotation_ids: &[String], canvas_id: Option<&str>) -> Vec<Arc<CanvasLoader>> {
        let mut loaders = self.inner.canvases.holding_any(annotation_ids);
        if let Some(loader) = canvas_id.and_then(|c| self.inner.canvases.existing(c)) {
            if !loaders.iter().any(|l| Arc::ptr_eq(l, &loader)) {
                loaders.push(loader);
            }
        }
        loaders
    }
}
