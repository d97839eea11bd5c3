//! Process-wide cache of every linking annotation
//!
//! The first read fetches a quick batch and publishes it immediately. A
//! watcher task then pulls full batches one after another while the store
//! reports more, appending each into the same entry.
//!
//! # Consistency
//!
//! State lives in a `watch` channel and is only mutated through the methods
//! below. Each entry carries a generation; a batch requested for one
//! generation is never merged into another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use super::clock::Clock;
use crate::annotations::{IconState, LinkingAnnotation};
use crate::store::{BulkBatch, LoadMode, RelationshipStore};

/// Key of the single cache entry
pub const GLOBAL_CACHE_KEY: &str = "global-linking-annotations";

/// Cache tuning
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entry lifetime in seconds
    pub ttl_secs: i64,
    /// Pause between progressive batches, in milliseconds
    pub batch_delay_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            batch_delay_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadProgress {
    pub processed: usize,
    pub total: usize,
    pub mode: LoadMode,
}

/// The cached dataset
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub data: Vec<LinkingAnnotation>,
    pub derived: HashMap<String, IconState>,
    pub has_more: bool,
    pub total_count: usize,
    pub load_progress: LoadProgress,
    pub fetched_at: DateTime<Utc>,
    #[serde(skip)]
    next_batch: u32,
    #[serde(skip)]
    generation: u64,
}

impl CacheEntry {
    fn from_quick(batch: BulkBatch, fetched_at: DateTime<Utc>, generation: u64) -> Self {
        Self {
            load_progress: LoadProgress {
                processed: batch.processed_annotations,
                total: batch.total_annotations,
                mode: LoadMode::Quick,
            },
            next_batch: batch.next_batch.unwrap_or(1),
            has_more: batch.has_more,
            total_count: batch.total_annotations,
            data: batch.annotations,
            derived: batch.icon_states,
            fetched_at,
            generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Index of the batch the next progressive load will request
    pub fn next_batch(&self) -> u32 {
        self.next_batch
    }
}

/// What consumers observe
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    pub entry: Option<Arc<CacheEntry>>,
    pub is_loading: bool,
    pub is_loading_more: bool,
    /// Bumped on every invalidation
    pub refresh_count: u64,
    pub last_error: Option<String>,
}

impl CacheSnapshot {
    pub fn annotations(&self) -> &[LinkingAnnotation] {
        self.entry.as_ref().map(|e| e.data.as_slice()).unwrap_or_default()
    }

    pub fn has_more(&self) -> bool {
        self.entry.as_ref().is_some_and(|e| e.has_more)
    }
}

/// Result of one progressive load step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Merged { loaded: usize, total: usize },
    /// Nothing left to load
    Complete,
    /// No entry to extend
    NoEntry,
    /// Another batch is already being fetched
    InFlight,
    /// The entry was replaced while the batch was in flight
    Stale,
    /// The batch failed; `has_more` is frozen
    Stopped,
}

/// Shared global linking cache
pub struct GlobalLinkingCache {
    store: Arc<dyn RelationshipStore>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    state: watch::Sender<CacheSnapshot>,
    /// Single pending-request slot for the initial fetch
    pending: Mutex<()>,
    batch_in_flight: Mutex<()>,
    /// Initial fetches that finished (committed or failed)
    completed_fetches: AtomicU64,
    generations: AtomicU64,
}

impl GlobalLinkingCache {
    pub fn new(store: Arc<dyn RelationshipStore>, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        let (state, _) = watch::channel(CacheSnapshot::default());
        Self {
            store,
            clock,
            config,
            state,
            pending: Mutex::new(()),
            batch_in_flight: Mutex::new(()),
            completed_fetches: AtomicU64::new(0),
            generations: AtomicU64::new(0),
        }
    }

    fn ttl(&self) -> Duration {
        Duration::seconds(self.config.ttl_secs)
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        self.clock.now() - entry.fetched_at < self.ttl()
    }

    /// Current state without triggering any fetch; an expired entry is hidden
    pub fn snapshot(&self) -> CacheSnapshot {
        let mut snapshot = self.state.borrow().clone();
        if snapshot.entry.as_ref().is_some_and(|e| !self.is_fresh(e)) {
            snapshot.entry = None;
        }
        snapshot
    }

    /// Receive every state change
    pub fn subscribe(&self) -> watch::Receiver<CacheSnapshot> {
        self.state.subscribe()
    }

    /// Serve the entry while fresh; otherwise run (or join) the quick fetch
    pub async fn get(&self) -> CacheSnapshot {
        let snapshot = self.snapshot();
        if snapshot.entry.is_some() {
            return snapshot;
        }

        let observed = self.completed_fetches.load(Ordering::SeqCst);
        let _slot = self.pending.lock().await;
        if self.completed_fetches.load(Ordering::SeqCst) != observed {
            tracing::debug!(key = GLOBAL_CACHE_KEY, "Joined in-flight linking fetch");
            return self.snapshot();
        }
        let snapshot = self.snapshot();
        if snapshot.entry.is_some() {
            return snapshot;
        }

        self.fetch_quick().await
    }

    async fn fetch_quick(&self) -> CacheSnapshot {
        let refresh_count = self.state.borrow().refresh_count;
        self.state.send_modify(|s| {
            s.entry = None;
            s.is_loading = true;
            s.last_error = None;
        });

        tracing::debug!(key = GLOBAL_CACHE_KEY, "Fetching quick linking batch");
        match self.store.list_linking_batch(LoadMode::Quick, 0).await {
            Ok(batch) => {
                let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
                let entry = CacheEntry::from_quick(batch, self.clock.now(), generation);
                let (loaded, total, has_more) = (entry.data.len(), entry.total_count, entry.has_more);

                let committed = self.state.send_if_modified(|s| {
                    if s.refresh_count != refresh_count {
                        return false;
                    }
                    s.entry = Some(Arc::new(entry));
                    s.is_loading = false;
                    true
                });
                if committed {
                    self.completed_fetches.fetch_add(1, Ordering::SeqCst);
                    tracing::info!(loaded, total, has_more, "Global linking cache populated");
                } else {
                    tracing::debug!("Discarded quick batch fetched before invalidation");
                }
            }
            Err(e) => {
                self.completed_fetches.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(error = %e, "Global linking fetch failed");
                self.state.send_modify(|s| {
                    s.is_loading = false;
                    s.last_error = Some(e.to_string());
                });
            }
        }
        self.snapshot()
    }

    /// Append a full batch to the entry of the given generation.
    ///
    /// Returns `false` (and changes nothing) when that entry is gone.
    pub fn merge_batch(&self, generation: u64, batch: BulkBatch) -> bool {
        self.state.send_if_modified(|s| {
            let Some(entry) = s.entry.as_mut() else {
                return false;
            };
            if entry.generation != generation {
                return false;
            }
            let entry = Arc::make_mut(entry);
            entry.load_progress = LoadProgress {
                processed: entry.load_progress.processed + batch.processed_annotations,
                total: batch.total_annotations,
                mode: LoadMode::Full,
            };
            entry.next_batch = batch.next_batch.unwrap_or(entry.next_batch + 1);
            entry.has_more = batch.has_more;
            entry.total_count = batch.total_annotations;
            entry.data.extend(batch.annotations);
            entry.derived.extend(batch.icon_states);
            true
        })
    }

    /// Fetch and merge the next full batch, if one is due
    pub async fn load_next_batch(&self) -> BatchOutcome {
        let Ok(_guard) = self.batch_in_flight.try_lock() else {
            return BatchOutcome::InFlight;
        };

        let (generation, batch) = {
            let snapshot = self.snapshot();
            let Some(entry) = snapshot.entry.as_ref() else {
                return BatchOutcome::NoEntry;
            };
            if !entry.has_more {
                return BatchOutcome::Complete;
            }
            (entry.generation, entry.next_batch)
        };

        self.state.send_modify(|s| s.is_loading_more = true);
        let outcome = match self.store.list_linking_batch(LoadMode::Full, batch).await {
            Ok(result) => {
                let count = result.annotations.len();
                if self.merge_batch(generation, result) {
                    let snapshot = self.snapshot();
                    let loaded = snapshot.annotations().len();
                    let total = snapshot.entry.as_ref().map_or(0, |e| e.total_count);
                    tracing::debug!(batch, count, loaded, total, "Merged linking batch");
                    BatchOutcome::Merged { loaded, total }
                } else {
                    tracing::debug!(batch, "Discarded batch for a replaced cache entry");
                    BatchOutcome::Stale
                }
            }
            Err(e) => {
                tracing::warn!(batch, error = %e, "Progressive linking load stopped");
                self.state.send_if_modified(|s| match s.entry.as_mut() {
                    Some(entry) if entry.generation == generation => {
                        Arc::make_mut(entry).has_more = false;
                        s.last_error = Some(e.to_string());
                        true
                    }
                    _ => false,
                });
                BatchOutcome::Stopped
            }
        };
        self.state.send_modify(|s| s.is_loading_more = false);
        outcome
    }

    /// Load batches until the entry is complete, stopped or replaced.
    ///
    /// Returns the number of batches merged by this call.
    pub async fn load_remaining(&self) -> usize {
        let mut merged = 0;
        loop {
            match self.load_next_batch().await {
                BatchOutcome::Merged { .. } => {
                    merged += 1;
                    self.pause_between_batches().await;
                }
                BatchOutcome::InFlight => {
                    // Wait for the other loader's batch, then continue
                    let _ = self.batch_in_flight.lock().await;
                }
                _ => return merged,
            }
        }
    }

    async fn pause_between_batches(&self) {
        if self.config.batch_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.config.batch_delay_ms)).await;
        }
    }

    /// Background task that keeps the entry loading.
    ///
    /// Pulls the next batch while more are reported, and refetches from
    /// scratch after every invalidation.
    pub fn spawn_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let mut updates = self.subscribe();

        tokio::spawn(async move {
            let mut seen_refresh = updates.borrow_and_update().refresh_count;
            loop {
                let snapshot = cache.snapshot();

                if snapshot.refresh_count != seen_refresh {
                    seen_refresh = snapshot.refresh_count;
                    if snapshot.entry.is_none() && !snapshot.is_loading {
                        tracing::debug!(refresh = seen_refresh, "Refetching linking cache after invalidation");
                        cache.get().await;
                        continue;
                    }
                }

                if snapshot.has_more() && !snapshot.is_loading_more {
                    match cache.load_next_batch().await {
                        BatchOutcome::Merged { .. } => {
                            cache.pause_between_batches().await;
                            continue;
                        }
                        BatchOutcome::InFlight => {
                            // Another caller holds the slot but has not flagged it yet
                            let _ = cache.batch_in_flight.lock().await;
                            continue;
                        }
                        _ => {}
                    }
                }

                updates.borrow_and_update();
                if cache.snapshot().has_more() && !cache.snapshot().is_loading_more {
                    continue;
                }
                if updates.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// Drop the entry and bump the refresh counter
    pub fn invalidate(&self) {
        self.state.send_modify(|s| {
            s.entry = None;
            s.is_loading = false;
            s.refresh_count += 1;
            s.last_error = None;
        });
        tracing::info!(key = GLOBAL_CACHE_KEY, "Global linking cache invalidated");
    }

    /// Invalidate, then read
    pub async fn refetch(&self) -> CacheSnapshot {
        self.invalidate();
        self.get().await
    }

    /// Linking annotations on a canvas: any body source equal to the canvas,
    /// or any target in `extra_ids`
    pub fn annotations_for_canvas(&self, canvas_id: &str, extra_ids: &[String]) -> Vec<LinkingAnnotation> {
        self.snapshot()
            .annotations()
            .iter()
            .filter(|l| {
                l.references_canvas(canvas_id) || l.target.iter().any(|t| extra_ids.contains(t))
            })
            .cloned()
            .collect()
    }

    /// Icon states for the members of a canvas' linking annotations
    pub fn derived_for_canvas(&self, canvas_id: &str, extra_ids: &[String]) -> HashMap<String, IconState> {
        let snapshot = self.snapshot();
        let Some(entry) = snapshot.entry.as_ref() else {
            return HashMap::new();
        };
        self.annotations_for_canvas(canvas_id, extra_ids)
            .iter()
            .flat_map(|l| l.target.iter())
            .filter_map(|id| entry.derived.get(id).map(|state| (id.clone(), *state)))
            .collect()
    }

    /// The linking annotation a content annotation belongs to
    pub fn find_for_target(&self, annotation_id: &str) -> Option<LinkingAnnotation> {
        self.snapshot()
            .annotations()
            .iter()
            .find(|l| l.contains_target(annotation_id))
            .cloned()
    }

    pub fn find_by_id(&self, linking_id: &str) -> Option<LinkingAnnotation> {
        self.snapshot()
            .annotations()
            .iter()
            .find(|l| l.id == linking_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::store::{MemoryStore, StoreOp};

    fn seeded_store(count: usize, batch_size: usize) -> Arc<MemoryStore> {
        let store = MemoryStore::new().with_batch_size(batch_size);
        for i in 0..count {
            store.insert_linking(LinkingAnnotation::new(
                format!("L{}", i),
                vec![format!("a{}", i), format!("b{}", i)],
            ));
        }
        Arc::new(store)
    }

    fn cache_over(store: Arc<MemoryStore>, clock: Arc<ManualClock>) -> Arc<GlobalLinkingCache> {
        Arc::new(GlobalLinkingCache::new(
            store,
            clock,
            CacheConfig {
                ttl_secs: 300,
                batch_delay_ms: 0,
            },
        ))
    }

    #[tokio::test]
    async fn test_first_read_is_quick_batch() {
        let store = seeded_store(7, 3);
        let cache = cache_over(store.clone(), Arc::new(ManualClock::default()));

        let snapshot = cache.get().await;
        let entry = snapshot.entry.unwrap();
        assert_eq!(entry.data.len(), 3);
        assert_eq!(entry.total_count, 7);
        assert!(entry.has_more);
        assert_eq!(entry.load_progress.mode, LoadMode::Quick);
        assert_eq!(entry.derived.len(), 6);
        assert_eq!(store.calls(StoreOp::Batch), 1);
    }

    #[tokio::test]
    async fn test_concurrent_reads_share_one_fetch() {
        let store = MemoryStore::new().with_latency(std::time::Duration::from_millis(50));
        store.insert_linking(LinkingAnnotation::new("L1", vec!["a".into(), "b".into()]));
        let store = Arc::new(store);
        let cache = cache_over(store.clone(), Arc::new(ManualClock::default()));

        let (first, second, third) = tokio::join!(cache.get(), cache.get(), cache.get());
        assert_eq!(store.calls(StoreOp::Batch), 1);
        for snapshot in [first, second, third] {
            assert_eq!(snapshot.annotations().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_failed_fetch_releases_slot() {
        let store = seeded_store(2, 10);
        store.fail_next(StoreOp::Batch);
        let cache = cache_over(store.clone(), Arc::new(ManualClock::default()));

        let failed = cache.get().await;
        assert!(failed.entry.is_none());
        assert!(failed.last_error.is_some());
        assert!(!failed.is_loading);

        let recovered = cache.get().await;
        assert_eq!(recovered.annotations().len(), 2);
        assert_eq!(store.calls(StoreOp::Batch), 2);
    }

    #[tokio::test]
    async fn test_batch_failure_freezes_has_more() {
        let store = seeded_store(10, 3);
        store.fail_times(StoreOp::Batch, Some(2), 1);
        let cache = cache_over(store.clone(), Arc::new(ManualClock::default()));

        cache.get().await;
        assert_eq!(cache.load_next_batch().await, BatchOutcome::Merged { loaded: 6, total: 10 });
        assert_eq!(cache.load_next_batch().await, BatchOutcome::Stopped);

        let snapshot = cache.snapshot();
        assert!(!snapshot.has_more());
        assert_eq!(snapshot.annotations().len(), 6);
        assert!(snapshot.last_error.is_some());
        assert_eq!(cache.load_next_batch().await, BatchOutcome::Complete);
    }

    #[tokio::test]
    async fn test_merge_for_replaced_entry_is_rejected() {
        let store = seeded_store(4, 2);
        let cache = cache_over(store.clone(), Arc::new(ManualClock::default()));

        let old_generation = cache.get().await.entry.unwrap().generation();
        let late_batch = store.list_linking_batch(LoadMode::Full, 1).await.unwrap();

        cache.refetch().await;
        assert!(!cache.merge_batch(old_generation, late_batch));
        assert_eq!(cache.snapshot().annotations().len(), 2);
    }

    #[tokio::test]
    async fn test_expired_entry_is_hidden_and_refetched() {
        let store = seeded_store(2, 10);
        let clock = Arc::new(ManualClock::default());
        let cache = cache_over(store.clone(), clock.clone());

        cache.get().await;
        clock.advance(Duration::seconds(301));
        assert!(cache.snapshot().entry.is_none());

        cache.get().await;
        assert_eq!(store.calls(StoreOp::Batch), 2);
    }

    #[tokio::test]
    async fn test_invalidate_bumps_refresh_count() {
        let store = seeded_store(2, 10);
        let cache = cache_over(store, Arc::new(ManualClock::default()));
        let mut updates = cache.subscribe();

        cache.get().await;
        cache.invalidate();

        assert!(updates.has_changed().unwrap());
        let snapshot = updates.borrow_and_update().clone();
        assert_eq!(snapshot.refresh_count, 1);
        assert!(snapshot.entry.is_none());
    }

    #[tokio::test]
    async fn test_watcher_completes_progressive_load() {
        let store = seeded_store(9, 2);
        let cache = cache_over(store, Arc::new(ManualClock::default()));
        let watcher = cache.spawn_watcher();
        let mut updates = cache.subscribe();

        cache.get().await;
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while cache.snapshot().has_more() || cache.snapshot().annotations().len() < 9 {
                let _ = updates.changed().await;
            }
        })
        .await
        .unwrap();

        assert_eq!(cache.snapshot().annotations().len(), 9);
        watcher.abort();
    }

    #[tokio::test]
    async fn test_watcher_waits_for_batch_held_elsewhere() {
        let store = seeded_store(9, 2);
        let cache = cache_over(store, Arc::new(ManualClock::default()));
        cache.get().await;
        assert!(cache.snapshot().has_more());

        let held = cache.batch_in_flight.lock().await;
        let watcher = cache.spawn_watcher();
        // Only resumes if the watcher yields while the slot is taken
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(cache.snapshot().has_more());
        drop(held);

        let mut updates = cache.subscribe();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while cache.snapshot().has_more() {
                let _ = updates.changed().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(cache.snapshot().annotations().len(), 9);
        watcher.abort();
    }

    #[tokio::test]
    async fn test_canvas_filter_matches_body_source_or_extra_ids() {
        let store = MemoryStore::new();
        let on_canvas: LinkingAnnotation = serde_json::from_value(serde_json::json!({
            "id": "L1",
            "target": ["a"],
            "body": [{
                "type": "SpecificResource",
                "purpose": "selecting",
                "source": "canvas-1",
                "selector": { "type": "PointSelector", "x": 1, "y": 2 }
            }]
        }))
        .unwrap();
        store.insert_linking(on_canvas);
        store.insert_linking(LinkingAnnotation::new("L2", vec!["b".into(), "c".into()]));
        store.insert_linking(LinkingAnnotation::new("L3", vec!["d".into(), "e".into()]));
        let cache = cache_over(Arc::new(store), Arc::new(ManualClock::default()));
        cache.get().await;

        let found = cache.annotations_for_canvas("canvas-1", &["c".to_string()]);
        let ids: Vec<&str> = found.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["L1", "L2"]);

        let derived = cache.derived_for_canvas("canvas-1", &["c".to_string()]);
        assert!(derived["a"].has_point);
        assert!(derived["b"].is_linked);
        assert!(!derived.contains_key("d"));
    }
}
