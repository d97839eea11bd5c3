//! In-process relationship store
//!
//! Backs tests and local development. Supports:
//! - configurable page and batch sizes
//! - injected failures per operation (optionally at a given page/batch)
//! - artificial latency
//! - read-after-write lag, to mimic an eventually consistent index
//! - a competing write landing right after a read, for version checks

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::error::StoreError;
use super::traits::RelationshipStore;
use super::types::{BulkBatch, ContentPage, LoadMode, Versioned};
use crate::annotations::{icon_states, ContentAnnotation, LinkingAnnotation};

const DEFAULT_PAGE_SIZE: usize = 100;
const DEFAULT_BATCH_SIZE: usize = 50;

/// Store operations, for failure injection and call counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    ContentPage,
    LinkingLookup,
    Batch,
    Exists,
    Get,
    Create,
    Update,
    Delete,
}

#[derive(Debug)]
struct InjectedFailure {
    op: StoreOp,
    /// Page or batch index; `None` matches any call
    index: Option<u32>,
    remaining: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    content: Vec<ContentAnnotation>,
    linking: Vec<LinkingAnnotation>,
    versions: HashMap<String, u64>,
    failures: Vec<InjectedFailure>,
    calls: HashMap<StoreOp, usize>,
    /// Snapshot served to list reads while the lag lasts
    stale: Option<(Vec<LinkingAnnotation>, usize)>,
    /// Writes applied right after the next `get_linking` of their id
    competing: Vec<LinkingAnnotation>,
    next_id: u64,
}

impl MemoryState {
    fn check(&mut self, op: StoreOp, index: Option<u32>) -> Result<(), StoreError> {
        *self.calls.entry(op).or_insert(0) += 1;

        let position = self.failures.iter().position(|f| {
            f.op == op && f.remaining > 0 && (f.index.is_none() || f.index == index)
        });
        if let Some(position) = position {
            let failure = &mut self.failures[position];
            failure.remaining -= 1;
            if failure.remaining == 0 {
                self.failures.remove(position);
            }
            return Err(StoreError::Status {
                status: 503,
                message: format!("injected {:?} failure", op),
            });
        }
        Ok(())
    }

    fn visible_linking(&mut self) -> Vec<LinkingAnnotation> {
        if let Some((snapshot, remaining)) = self.stale.as_mut() {
            if *remaining > 0 {
                *remaining -= 1;
                return snapshot.clone();
            }
        }
        self.stale = None;
        self.linking.clone()
    }

    fn begin_lag(&mut self, previous: Vec<LinkingAnnotation>, read_lag: usize) {
        if read_lag == 0 {
            return;
        }
        match self.stale.as_mut() {
            Some((_, remaining)) => *remaining = read_lag,
            None => self.stale = Some((previous, read_lag)),
        }
    }

    fn bump_version(&mut self, id: &str) -> u64 {
        let version = self.versions.entry(id.to_string()).or_insert(0);
        *version += 1;
        *version
    }

    fn version_tag(&self, id: &str) -> Option<String> {
        self.versions.get(id).map(|v| format!("\"{}\"", v))
    }

    fn check_version(&self, id: &str, expected: Option<&str>) -> Result<(), StoreError> {
        match expected {
            Some(expected) if self.version_tag(id).as_deref() != Some(expected) => {
                Err(StoreError::PreconditionFailed(format!(
                    "{} is no longer at version {}",
                    id, expected
                )))
            }
            _ => Ok(()),
        }
    }

    fn apply_competing(&mut self, id: &str) {
        let Some(position) = self.competing.iter().position(|l| l.id == id) else {
            return;
        };
        let replacement = self.competing.remove(position);
        if let Some(slot) = self.linking.iter_mut().find(|l| l.id == id) {
            *slot = replacement;
            self.bump_version(id);
        }
    }
}

/// In-memory [`RelationshipStore`]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    page_size: usize,
    batch_size: usize,
    latency: Option<Duration>,
    read_lag: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            page_size: DEFAULT_PAGE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            latency: None,
            read_lag: 0,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// After a write, the next `reads` list calls still see the previous state
    pub fn with_read_lag(mut self, reads: usize) -> Self {
        self.read_lag = reads;
        self
    }

    pub fn insert_content(&self, annotation: ContentAnnotation) {
        self.state.lock().content.push(annotation);
    }

    pub fn insert_linking(&self, annotation: LinkingAnnotation) {
        let mut state = self.state.lock();
        state.bump_version(&annotation.id);
        state.linking.push(annotation);
    }

    /// Authoritative contents, ignoring any read lag
    pub fn linking(&self) -> Vec<LinkingAnnotation> {
        self.state.lock().linking.clone()
    }

    pub fn linking_by_id(&self, id: &str) -> Option<LinkingAnnotation> {
        self.state.lock().linking.iter().find(|l| l.id == id).cloned()
    }

    /// Another client replaces `annotation` right after the next
    /// `get_linking` of its id has been answered
    pub fn compete_after_next_get(&self, annotation: LinkingAnnotation) {
        self.state.lock().competing.push(annotation);
    }

    /// Fail the next call of `op`
    pub fn fail_next(&self, op: StoreOp) {
        self.fail_times(op, None, 1);
    }

    /// Fail `times` calls of `op`, optionally only at one page/batch index
    pub fn fail_times(&self, op: StoreOp, index: Option<u32>, times: usize) {
        self.state.lock().failures.push(InjectedFailure {
            op,
            index,
            remaining: times,
        });
    }

    /// Number of calls made for `op`, failed ones included
    pub fn calls(&self, op: StoreOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl RelationshipStore for MemoryStore {
    async fn list_content_page(&self, canvas_id: &str, page: u32) -> Result<ContentPage, StoreError> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.check(StoreOp::ContentPage, Some(page))?;

        let on_canvas: Vec<&ContentAnnotation> = state
            .content
            .iter()
            .filter(|a| a.canvas_id() == Some(canvas_id))
            .collect();
        let start = page as usize * self.page_size;
        let end = (start + self.page_size).min(on_canvas.len());
        let items = on_canvas
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .map(|a| Versioned::new((*a).clone(), a.version_stamp().map(str::to_owned)))
            .collect();

        Ok(ContentPage {
            items,
            has_more: end < on_canvas.len(),
        })
    }

    async fn list_linking_for_targets(&self, ids: &[String]) -> Result<Vec<LinkingAnnotation>, StoreError> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.check(StoreOp::LinkingLookup, None)?;

        Ok(state
            .visible_linking()
            .into_iter()
            .filter(|l| l.target.iter().any(|t| ids.contains(t)))
            .collect())
    }

    async fn list_linking_batch(&self, mode: LoadMode, batch: u32) -> Result<BulkBatch, StoreError> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.check(StoreOp::Batch, Some(batch))?;

        let visible = state.visible_linking();
        let start = (batch as usize * self.batch_size).min(visible.len());
        let end = (start + self.batch_size).min(visible.len());
        let annotations = visible[start..end].to_vec();
        let has_more = end < visible.len();

        Ok(BulkBatch {
            icon_states: icon_states(&annotations),
            processed_annotations: annotations.len(),
            annotations,
            has_more,
            total_annotations: visible.len(),
            next_batch: has_more.then_some(batch + 1),
            mode,
        })
    }

    async fn content_exists(&self, id: &str) -> Result<bool, StoreError> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.check(StoreOp::Exists, None)?;
        Ok(state.content.iter().any(|a| a.id == id))
    }

    async fn get_linking(&self, id: &str) -> Result<Option<Versioned<LinkingAnnotation>>, StoreError> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.check(StoreOp::Get, None)?;

        let found = state.linking.iter().find(|l| l.id == id).cloned();
        let found = found.map(|annotation| {
            let version = state.version_tag(id);
            Versioned::new(annotation, version)
        });
        state.apply_competing(id);
        Ok(found)
    }

    async fn create_linking(&self, annotation: &LinkingAnnotation) -> Result<LinkingAnnotation, StoreError> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.check(StoreOp::Create, None)?;

        let mut created = annotation.clone();
        if created.id.is_empty() {
            state.next_id += 1;
            created.id = format!("memory:linking/{}", state.next_id);
        }
        if state.linking.iter().any(|l| l.id == created.id) {
            return Err(StoreError::Status {
                status: 409,
                message: format!("annotation {} already exists", created.id),
            });
        }

        let previous = state.linking.clone();
        state.bump_version(&created.id);
        state.linking.push(created.clone());
        state.begin_lag(previous, self.read_lag);
        Ok(created)
    }

    async fn update_linking(
        &self,
        annotation: &LinkingAnnotation,
        expected_version: Option<&str>,
    ) -> Result<LinkingAnnotation, StoreError> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.check(StoreOp::Update, None)?;
        if state.linking.iter().any(|l| l.id == annotation.id) {
            state.check_version(&annotation.id, expected_version)?;
        }

        let previous = state.linking.clone();
        let slot = state
            .linking
            .iter_mut()
            .find(|l| l.id == annotation.id)
            .ok_or_else(|| StoreError::NotFound(annotation.id.clone()))?;
        *slot = annotation.clone();
        state.bump_version(&annotation.id);
        state.begin_lag(previous, self.read_lag);
        Ok(annotation.clone())
    }

    async fn delete_linking(&self, id: &str, expected_version: Option<&str>) -> Result<(), StoreError> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.check(StoreOp::Delete, None)?;

        let position = state
            .linking
            .iter()
            .position(|l| l.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        state.check_version(id, expected_version)?;
        let previous = state.linking.clone();
        state.linking.remove(position);
        state.versions.remove(id);
        state.begin_lag(previous, self.read_lag);
        Ok(())
    }
}
