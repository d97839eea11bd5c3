//! Concurrent geotag search
//!
//! Runs the selected providers at once, each bounded by a timeout. A new
//! search aborts whichever search is still in flight. Results are cached in
//! an LRU keyed by query and filter.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, AbortHandle, Abortable};
use lru::LruCache;
use parking_lot::Mutex;

use super::providers::GeotagProvider;
use super::types::{GeotagError, SearchFilter, SearchResult};

/// Hits requested from each provider
pub const RESULTS_PER_PROVIDER: usize = 10;

/// Default per-provider timeout
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 10;

const DEFAULT_CACHE_ENTRIES: usize = 128;

/// Search service over a set of providers
pub struct GeotagSearch {
    providers: Vec<Arc<dyn GeotagProvider>>,
    timeout: Duration,
    cache: Mutex<LruCache<(String, SearchFilter), Vec<SearchResult>>>,
    in_flight: Mutex<Option<AbortHandle>>,
}

impl GeotagSearch {
    pub fn new(providers: Vec<Arc<dyn GeotagProvider>>, timeout: Duration) -> Self {
        Self::with_cache_size(providers, timeout, DEFAULT_CACHE_ENTRIES)
    }

    pub fn with_cache_size(providers: Vec<Arc<dyn GeotagProvider>>, timeout: Duration, entries: usize) -> Self {
        let entries = NonZeroUsize::new(entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            providers,
            timeout,
            cache: Mutex::new(LruCache::new(entries)),
            in_flight: Mutex::new(None),
        }
    }

    /// Search every provider the filter selects.
    ///
    /// Providers that fail or time out contribute nothing. Returns
    /// [`GeotagError::Superseded`] if a newer search started meanwhile.
    pub async fn search(&self, query: &str, filter: SearchFilter) -> Result<Vec<SearchResult>, GeotagError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let key = (query.to_lowercase(), filter);
        let cached = self.cache.lock().get(&key).cloned();
        if let Some(cached) = cached {
            tracing::debug!(query = %query, "Geotag search served from cache");
            return Ok(cached);
        }

        let (handle, registration) = AbortHandle::new_pair();
        let previous = self.in_flight.lock().replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }

        let lookups = self
            .providers
            .iter()
            .filter(|p| filter.includes(p.kind()))
            .map(|p| lookup(p.as_ref(), query, self.timeout));

        let mut results: Vec<SearchResult> = Abortable::new(join_all(lookups), registration)
            .await
            .map_err(|_| GeotagError::Superseded)?
            .into_iter()
            .flatten()
            .collect();
        results.sort_by_key(|r| r.source.priority());

        tracing::debug!(query = %query, results = results.len(), "Geotag search complete");
        self.cache.lock().put(key, results.clone());
        Ok(results)
    }
}

async fn lookup(provider: &dyn GeotagProvider, query: &str, timeout: Duration) -> Vec<SearchResult> {
    match tokio::time::timeout(timeout, provider.search(query, RESULTS_PER_PROVIDER)).await {
        Ok(Ok(results)) => results,
        Ok(Err(e)) => {
            tracing::warn!(provider = ?provider.kind(), error = %e, "Geotag provider failed");
            Vec::new()
        }
        Err(_) => {
            tracing::warn!(provider = ?provider.kind(), timeout_secs = timeout.as_secs(), "Geotag provider timed out");
            Vec::new()
        }
    }
}
