//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use reunions_linking::annotations::{ContentAnnotation, Creator, LinkingAnnotation};
use reunions_linking::cache::{CacheConfig, GlobalLinkingCache, ManualClock};
use reunions_linking::config::Config;
use reunions_linking::geotag::{
    to_search_result, GeotagError, GeotagProvider, GeotagSearch, GeotagSource, NominatimPlace, ProviderKind,
    SearchResult,
};
use reunions_linking::save::{ReconcileConfig, SaveOrchestrator};
use reunions_linking::state::AppState;
use reunions_linking::store::MemoryStore;

pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

pub fn content(id: &str, canvas: &str) -> ContentAnnotation {
    serde_json::from_value(json!({
        "id": id,
        "motivation": "textspotting",
        "body": [{ "type": "TextualBody", "value": id, "purpose": "supplementing" }],
        "modified": "2024-05-01T10:00:00Z",
        "target": { "source": canvas, "selector": { "type": "SvgSelector", "value": "<svg/>" } }
    }))
    .unwrap()
}

pub fn linking(id: &str, target: &[&str]) -> LinkingAnnotation {
    LinkingAnnotation::new(id, ids(target))
}

pub fn nominatim(name: &str, lat: &str, lon: &str) -> NominatimPlace {
    NominatimPlace {
        place_id: Some(42),
        display_name: Some(name.to_string()),
        osm_type: Some("node".to_string()),
        osm_id: Some(4242),
        lat: lat.to_string(),
        lon: lon.to_string(),
    }
}

pub fn batavia() -> GeotagSource {
    GeotagSource::Gazetteer(nominatim("Batavia", "-6.13", "106.8"))
}

pub fn quick_reconcile() -> ReconcileConfig {
    ReconcileConfig {
        max_attempts: 5,
        initial_delay_ms: 1,
        backoff_factor: 1.5,
        max_delay_ms: 5,
    }
}

/// Store, clock, cache and orchestrator wired together
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub cache: Arc<GlobalLinkingCache>,
    pub orchestrator: SaveOrchestrator,
}

impl Harness {
    pub fn new(store: MemoryStore) -> Self {
        Self::with_cache_config(
            store,
            CacheConfig {
                ttl_secs: 300,
                batch_delay_ms: 0,
            },
        )
    }

    pub fn with_cache_config(store: MemoryStore, config: CacheConfig) -> Self {
        let store = Arc::new(store);
        let clock = Arc::new(ManualClock::default());
        let cache = Arc::new(GlobalLinkingCache::new(store.clone(), clock.clone(), config));
        let orchestrator = SaveOrchestrator::new(store.clone(), cache.clone(), clock.clone(), quick_reconcile())
            .with_default_creator(Some(Creator::person("https://orcid.org/0000-0000", "Editor")));
        Self {
            store,
            clock,
            cache,
            orchestrator,
        }
    }
}

/// Provider answering every query with the same places
pub struct FixedProvider {
    pub kind: ProviderKind,
    pub places: Vec<GeotagSource>,
}

#[async_trait]
impl GeotagProvider for FixedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn search(&self, _query: &str, limit: usize) -> Result<Vec<SearchResult>, GeotagError> {
        Ok(self.places.iter().take(limit).cloned().map(to_search_result).collect())
    }
}

/// Application state over an in-memory store and a fixed gazetteer
pub fn app_state(store: Arc<MemoryStore>, clock: Arc<ManualClock>) -> AppState {
    let mut config = Config::default();
    config.cache.batch_delay_ms = 0;
    config.reconcile.initial_delay_ms = 1;
    config.reconcile.max_delay_ms = 5;
    config.reconcile.max_attempts = 5;

    let gazetteer = FixedProvider {
        kind: ProviderKind::Gazetteer,
        places: vec![batavia()],
    };
    let geotag = GeotagSearch::new(vec![Arc::new(gazetteer)], Duration::from_secs(1));
    AppState::new(config, store, clock, geotag)
}
