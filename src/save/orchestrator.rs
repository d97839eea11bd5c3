//! Save orchestration
//!
//! One save walks `Idle → Validating → ResolvingExisting → BuildingPayload →
//! Persisting → Reconciling → Done`, or ends in `Failed` from any step.
//! Caches are only invalidated after the store confirmed the write.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::error::{SaveError, ValidationError};
use super::payload::{build_body, build_linking, build_target, dedupe_ids, PointInput, Stamp, TargetOrder};
use crate::annotations::{Creator, LinkingAnnotation};
use crate::cache::{Clock, GlobalLinkingCache};
use crate::geotag::{normalize, GeotagSource, NormalizedGeotag};
use crate::loader::CanvasLoader;
use crate::store::{RelationshipStore, StoreError, Versioned};
use crate::validation::{validate_against_cache, ValidationResult};

/// Where a save currently is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveState {
    #[default]
    Idle,
    Validating,
    ResolvingExisting,
    BuildingPayload,
    Persisting,
    Reconciling,
    Done,
    Failed,
}

impl SaveState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaveState::Idle => "idle",
            SaveState::Validating => "validating",
            SaveState::ResolvingExisting => "resolving existing relationship",
            SaveState::BuildingPayload => "building payload",
            SaveState::Persisting => "persisting",
            SaveState::Reconciling => "reconciling",
            SaveState::Done => "done",
            SaveState::Failed => "failed",
        }
    }
}

impl fmt::Display for SaveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the user asked to save.
///
/// Borrowed by [`SaveOrchestrator::save`], so a failed save leaves it intact
/// for a retry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveRequest {
    /// Annotation being edited
    #[serde(default)]
    pub anchor_id: String,
    /// Annotations to group with the anchor; empty keeps the current group
    #[serde(default)]
    pub linked_ids: Vec<String>,
    #[serde(default)]
    pub order: TargetOrder,
    #[serde(default)]
    pub geotag: Option<GeotagSource>,
    #[serde(default)]
    pub point: Option<PointInput>,
    /// Relationship being edited, when the caller knows it
    #[serde(default)]
    pub existing_linking_id: Option<String>,
    /// Canvas a point selection is made on
    #[serde(default)]
    pub canvas_id: Option<String>,
    #[serde(default)]
    pub creator: Option<Creator>,
    /// Reject the save when the validator reports conflicts
    #[serde(default)]
    pub strict: bool,
}

impl SaveRequest {
    pub fn new(anchor_id: impl Into<String>) -> Self {
        Self {
            anchor_id: anchor_id.into(),
            ..Self::default()
        }
    }

    pub fn with_links(mut self, ids: &[&str]) -> Self {
        self.linked_ids = ids.iter().map(|id| id.to_string()).collect();
        self
    }

    pub fn with_geotag(mut self, source: GeotagSource) -> Self {
        self.geotag = Some(source);
        self
    }

    pub fn with_point(mut self, canvas_id: &str, x: f64, y: f64) -> Self {
        self.canvas_id = Some(canvas_id.to_string());
        self.point = Some(PointInput { x, y });
        self
    }

    pub fn editing(mut self, linking_id: &str) -> Self {
        self.existing_linking_id = Some(linking_id.to_string());
        self
    }

    fn explicit_linking_id(&self) -> Option<&str> {
        self.existing_linking_id.as_deref().map(str::trim).filter(|id| !id.is_empty())
    }

    fn has_explicit_links(&self) -> bool {
        self.linked_ids.iter().any(|id| !id.trim().is_empty())
    }

    fn has_content(&self) -> bool {
        self.geotag.is_some() || self.point.is_some()
    }
}

/// Reject a request before any network access; returns the normalized tag
pub fn check_request(request: &SaveRequest) -> Result<Option<NormalizedGeotag>, ValidationError> {
    let ids = dedupe_ids(
        std::iter::once(request.anchor_id.as_str()).chain(request.linked_ids.iter().map(String::as_str)),
    );
    let editing = request.explicit_linking_id().is_some();

    if ids.is_empty() && !request.has_content() && !editing {
        return Err(ValidationError::NothingToSave);
    }
    if ids.is_empty() && !editing {
        return Err(ValidationError::EmptyAnchor);
    }
    if ids.len() == 1 && !request.has_content() && (!editing || request.has_explicit_links()) {
        return Err(ValidationError::GroupTooSmall);
    }
    if let Some(point) = &request.point {
        point.check()?;
    }

    Ok(request.geotag.as_ref().map(normalize).transpose()?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveOperation {
    Created,
    Updated,
}

/// Outcome of a completed save
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveSummary {
    pub linking_id: String,
    pub operation: SaveOperation,
    pub target: Vec<String>,
    pub member_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_label: Option<String>,
    pub has_point: bool,
    /// The store was observed to reflect the write before caches reloaded
    pub reconciled: bool,
    /// Advisory membership check made while building the payload
    pub validation: ValidationResult,
    pub message: String,
}

fn summary_message(operation: SaveOperation, member_count: usize, tag_label: Option<&str>, has_point: bool) -> String {
    let mut parts = Vec::new();
    if let Some(label) = tag_label {
        parts.push(format!("location: {}", label));
    }
    if has_point {
        parts.push("point selection".to_string());
    }
    let context = if parts.is_empty() {
        String::new()
    } else {
        format!(" with {}", parts.join(" and "))
    };
    let verb = match operation {
        SaveOperation::Created => "saved",
        SaveOperation::Updated => "updated",
    };
    let plural = if member_count == 1 { "" } else { "s" };
    format!(
        "Successfully {} link between {} annotation{}{}",
        verb, member_count, plural, context
    )
}

/// The store copy carries the members and bodies that were written
fn reflects_write(found: &LinkingAnnotation, saved: &LinkingAnnotation) -> bool {
    found.id == saved.id && found.target == saved.target && found.body == saved.body
}

/// Bounded re-read after a write
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 200,
            backoff_factor: 1.5,
            max_delay_ms: 2000,
        }
    }
}

impl ReconcileConfig {
    /// Pause before re-read number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_delay_ms as f64 * self.backoff_factor.powi(exponent);
        Duration::from_millis(millis.min(self.max_delay_ms as f64) as u64)
    }
}

/// State tracker for one save
struct SaveAction<'a> {
    state: SaveState,
    progress: &'a watch::Sender<SaveState>,
}

impl<'a> SaveAction<'a> {
    fn new(progress: &'a watch::Sender<SaveState>) -> Self {
        progress.send_replace(SaveState::Idle);
        Self {
            state: SaveState::Idle,
            progress,
        }
    }

    fn advance(&mut self, next: SaveState) {
        tracing::debug!(from = %self.state, to = %next, "Save state");
        self.state = next;
        self.progress.send_replace(next);
    }

    fn store_error(&self, source: StoreError) -> SaveError {
        SaveError::Store {
            state: self.state,
            source,
        }
    }
}

/// Builds, persists and reconciles linking saves
pub struct SaveOrchestrator {
    pub(super) store: Arc<dyn RelationshipStore>,
    pub(super) cache: Arc<GlobalLinkingCache>,
    pub(super) clock: Arc<dyn Clock>,
    reconcile: ReconcileConfig,
    default_creator: Option<Creator>,
    progress: watch::Sender<SaveState>,
}

impl SaveOrchestrator {
    pub fn new(
        store: Arc<dyn RelationshipStore>,
        cache: Arc<GlobalLinkingCache>,
        clock: Arc<dyn Clock>,
        reconcile: ReconcileConfig,
    ) -> Self {
        let (progress, _) = watch::channel(SaveState::Idle);
        Self {
            store,
            cache,
            clock,
            reconcile,
            default_creator: None,
            progress,
        }
    }

    /// Creator stamped when a request names none
    pub fn with_default_creator(mut self, creator: Option<Creator>) -> Self {
        self.default_creator = creator;
        self
    }

    /// State of the most recent save
    pub fn subscribe(&self) -> watch::Receiver<SaveState> {
        self.progress.subscribe()
    }

    /// Save a relationship.
    ///
    /// `loaders` are the canvas views to invalidate and reload once the
    /// write is confirmed.
    pub async fn save(&self, request: &SaveRequest, loaders: &[Arc<CanvasLoader>]) -> Result<SaveSummary, SaveError> {
        let mut action = SaveAction::new(&self.progress);
        let result = self.run(request, loaders, &mut action).await;
        match &result {
            Ok(summary) => {
                action.advance(SaveState::Done);
                tracing::info!(
                    linking_id = %summary.linking_id,
                    operation = ?summary.operation,
                    members = summary.member_count,
                    reconciled = summary.reconciled,
                    "Linking save complete"
                );
            }
            Err(e) => {
                tracing::warn!(state = %e.state(), error = %e, "Linking save failed");
                action.advance(SaveState::Failed);
            }
        }
        result
    }

    async fn run(
        &self,
        request: &SaveRequest,
        loaders: &[Arc<CanvasLoader>],
        action: &mut SaveAction<'_>,
    ) -> Result<SaveSummary, SaveError> {
        action.advance(SaveState::Validating);
        let geotag = check_request(request)?;

        action.advance(SaveState::ResolvingExisting);
        let (existing, expected_version) = match self.resolve_existing(request, loaders, action).await? {
            Some(found) => (Some(found.value), found.version),
            None => (None, None),
        };

        action.advance(SaveState::BuildingPayload);
        let target = build_target(&request.anchor_id, &request.linked_ids, request.order, existing.as_ref());
        let known: Vec<LinkingAnnotation> = loaders.iter().flat_map(|l| l.view().linking.clone()).collect();
        let validation = validate_against_cache(&self.cache, &target, existing.as_ref().map(|l| l.id.as_str()), &known);
        if !validation.is_valid {
            let conflicting: Vec<&str> = validation.conflicts.iter().map(|c| c.annotation_id.as_str()).collect();
            if request.strict {
                return Err(ValidationError::Conflicts(conflicting.join(", ")).into());
            }
            tracing::warn!(conflicts = ?conflicting, "Saving despite membership conflicts");
        }

        let point = match request.point {
            Some(point) => {
                let canvas = request
                    .canvas_id
                    .clone()
                    .filter(|c| !c.trim().is_empty())
                    .or_else(|| existing.as_ref().and_then(|l| l.point()).map(|p| p.source.clone()))
                    .ok_or(ValidationError::MissingCanvas)?;
                Some((canvas, point))
            }
            None => None,
        };

        let stamp = Stamp::new(
            request.creator.clone().or_else(|| self.default_creator.clone()),
            self.clock.now(),
        );
        let body = build_body(
            existing.as_ref().map(|l| l.body.as_slice()).unwrap_or_default(),
            geotag.as_ref(),
            point.as_ref().map(|(canvas, p)| (canvas.as_str(), *p)),
            &stamp,
        );
        let payload = build_linking(existing.as_ref(), target, body, &stamp);
        if !payload.is_well_formed() {
            return Err(ValidationError::GroupTooSmall.into());
        }

        action.advance(SaveState::Persisting);
        let (persisted, operation) = match &existing {
            Some(_) => (
                self.store.update_linking(&payload, expected_version.as_deref()).await,
                SaveOperation::Updated,
            ),
            None => (self.store.create_linking(&payload).await, SaveOperation::Created),
        };
        let saved = persisted.map_err(|e| action.store_error(e))?;
        tracing::info!(
            linking_id = %saved.id,
            operation = ?operation,
            members = saved.target.len(),
            "Linking annotation persisted"
        );

        action.advance(SaveState::Reconciling);
        let reconciled = self
            .reconcile(loaders, &saved.target, |found| found.iter().any(|l| reflects_write(l, &saved)))
            .await;

        let tag_label = saved
            .place()
            .map(|p| p.source.label.clone())
            .or_else(|| saved.geotag().map(|g| g.source.properties.title.clone()));
        let has_point = saved.has_point();
        let member_count = saved.target.len();
        Ok(SaveSummary {
            message: summary_message(operation, member_count, tag_label.as_deref(), has_point),
            linking_id: saved.id,
            operation,
            target: saved.target,
            member_count,
            tag_label,
            has_point,
            reconciled,
            validation,
        })
    }

    /// The relationship this save edits, read fresh from the store along
    /// with the version the write must match
    async fn resolve_existing(
        &self,
        request: &SaveRequest,
        loaders: &[Arc<CanvasLoader>],
        action: &SaveAction<'_>,
    ) -> Result<Option<Versioned<LinkingAnnotation>>, SaveError> {
        if let Some(id) = request.explicit_linking_id() {
            let known = self
                .cache
                .find_by_id(id)
                .or_else(|| loaders.iter().find_map(|l| l.view().linking.iter().find(|x| x.id == id).cloned()));
            let id = known.as_ref().map_or(id, |l| l.id.as_str());
            return match self.store.get_linking(id).await {
                Ok(Some(found)) => Ok(Some(found)),
                Ok(None) => Err(SaveError::UnknownRelationship(id.to_string())),
                Err(e) => Err(action.store_error(e)),
            };
        }

        let anchor = request.anchor_id.trim();
        if anchor.is_empty() {
            return Ok(None);
        }

        let known = loaders
            .iter()
            .find_map(|l| l.linking_for_target(anchor))
            .or_else(|| self.cache.find_for_target(anchor));
        let candidate = match known {
            Some(found) => Some(found),
            // The cache may not hold every relationship yet
            None => self
                .store
                .list_linking_for_targets(&[anchor.to_string()])
                .await
                .map_err(|e| action.store_error(e))?
                .into_iter()
                .next(),
        };

        match candidate {
            Some(found) => {
                let fresh = self.store.get_linking(&found.id).await.map_err(|e| action.store_error(e))?;
                if fresh.is_none() {
                    tracing::debug!(linking_id = %found.id, "Cached relationship no longer exists");
                }
                Ok(fresh)
            }
            None => Ok(None),
        }
    }

    /// Invalidate the given views and the global cache, wait (bounded) until
    /// the store reflects the write, then reload everything.
    ///
    /// Returns whether the write was observed.
    pub(super) async fn reconcile<F>(&self, loaders: &[Arc<CanvasLoader>], members: &[String], observed: F) -> bool
    where
        F: Fn(&[LinkingAnnotation]) -> bool,
    {
        for loader in loaders {
            loader.invalidate();
        }
        self.cache.invalidate();

        let mut confirmed = members.is_empty();
        let mut attempt = 0;
        while !confirmed && attempt < self.reconcile.max_attempts {
            attempt += 1;
            match self.store.list_linking_for_targets(members).await {
                Ok(found) if observed(&found) => confirmed = true,
                Ok(_) => tracing::debug!(attempt, "Write not visible yet"),
                Err(e) => tracing::warn!(attempt, error = %e, "Reconcile read failed"),
            }
            if !confirmed && attempt < self.reconcile.max_attempts {
                tokio::time::sleep(self.reconcile.delay(attempt)).await;
            }
        }
        if !confirmed {
            tracing::warn!(attempts = attempt, "Write not observed, reloading anyway");
        }

        let reloads = join_all(loaders.iter().map(|l| l.refetch()));
        tokio::join!(reloads, self.cache.get());
        confirmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::LinkingBody;
    use crate::cache::{CacheConfig, ManualClock};
    use crate::geotag::NominatimPlace;
    use crate::store::{MemoryStore, StoreOp};

    fn quick_reconcile() -> ReconcileConfig {
        ReconcileConfig {
            max_attempts: 5,
            initial_delay_ms: 0,
            backoff_factor: 1.0,
            max_delay_ms: 0,
        }
    }

    fn orchestrator(store: Arc<MemoryStore>) -> (SaveOrchestrator, Arc<GlobalLinkingCache>) {
        let clock = Arc::new(ManualClock::default());
        let cache = Arc::new(GlobalLinkingCache::new(
            store.clone(),
            clock.clone(),
            CacheConfig {
                ttl_secs: 300,
                batch_delay_ms: 0,
            },
        ));
        let orchestrator = SaveOrchestrator::new(store, cache.clone(), clock, quick_reconcile())
            .with_default_creator(Some(Creator::person("https://orcid.org/0000", "Editor")));
        (orchestrator, cache)
    }

    fn batavia() -> GeotagSource {
        GeotagSource::Gazetteer(NominatimPlace {
            place_id: Some(7),
            display_name: Some("Batavia".into()),
            osm_type: None,
            osm_id: None,
            lat: "-6.13".into(),
            lon: "106.8".into(),
        })
    }

    #[test]
    fn test_rejects_empty_and_single_saves() {
        assert!(matches!(
            check_request(&SaveRequest::default()),
            Err(ValidationError::NothingToSave)
        ));
        assert!(matches!(
            check_request(&SaveRequest::new("a")),
            Err(ValidationError::GroupTooSmall)
        ));
        assert!(matches!(
            check_request(&SaveRequest::new("a").with_links(&["a"]).editing("L1")),
            Err(ValidationError::GroupTooSmall)
        ));
        assert!(matches!(
            check_request(&SaveRequest::default().with_point("canvas-1", 1.0, 2.0)),
            Err(ValidationError::EmptyAnchor)
        ));
        assert!(check_request(&SaveRequest::new("a").with_point("canvas-1", 1.0, 2.0)).is_ok());
        assert!(check_request(&SaveRequest::new("a").editing("L1")).is_ok());
    }

    #[test]
    fn test_rejects_malformed_tag() {
        let mut bad = batavia();
        if let GeotagSource::Gazetteer(place) = &mut bad {
            place.lat = "123".into();
        }
        assert!(matches!(
            check_request(&SaveRequest::new("a").with_geotag(bad)),
            Err(ValidationError::MalformedTag(_))
        ));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = ReconcileConfig::default();
        assert_eq!(config.delay(1), Duration::from_millis(200));
        assert_eq!(config.delay(2), Duration::from_millis(300));
        assert_eq!(config.delay(20), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_validation_failure_touches_nothing() {
        let store = Arc::new(MemoryStore::new());
        let (orchestrator, cache) = orchestrator(store.clone());
        let before = cache.snapshot().refresh_count;

        let err = orchestrator.save(&SaveRequest::new("a"), &[]).await.unwrap_err();
        assert_eq!(err.state(), SaveState::Validating);
        assert_eq!(store.calls(StoreOp::LinkingLookup), 0);
        assert_eq!(cache.snapshot().refresh_count, before);
        assert_eq!(*orchestrator.subscribe().borrow(), SaveState::Failed);
    }

    #[tokio::test]
    async fn test_creates_new_group() {
        let store = Arc::new(MemoryStore::new());
        let (orchestrator, cache) = orchestrator(store.clone());

        let summary = orchestrator
            .save(&SaveRequest::new("a").with_links(&["b"]), &[])
            .await
            .unwrap();
        assert_eq!(summary.operation, SaveOperation::Created);
        assert_eq!(summary.target, vec!["a", "b"]);
        assert!(summary.reconciled);
        assert_eq!(summary.message, "Successfully saved link between 2 annotations");

        let stored = store.linking_by_id(&summary.linking_id).unwrap();
        assert!(stored.body.is_empty());
        assert_eq!(stored.creator.unwrap().label, "Editor");
        assert_eq!(cache.snapshot().annotations().len(), 1);
    }

    #[tokio::test]
    async fn test_tag_only_edit_updates_in_place() {
        let store = Arc::new(MemoryStore::new());
        store.insert_linking(LinkingAnnotation::new("L1", vec!["a".into(), "b".into()]));
        let (orchestrator, _) = orchestrator(store.clone());

        let summary = orchestrator
            .save(&SaveRequest::new("b").with_geotag(batavia()), &[])
            .await
            .unwrap();
        assert_eq!(summary.operation, SaveOperation::Updated);
        assert_eq!(summary.linking_id, "L1");
        assert_eq!(summary.tag_label.as_deref(), Some("Batavia"));
        assert_eq!(
            summary.message,
            "Successfully updated link between 2 annotations with location: Batavia"
        );
        assert_eq!(store.calls(StoreOp::Create), 0);

        let stored = store.linking_by_id("L1").unwrap();
        assert_eq!(stored.target, vec!["a", "b"]);
        assert!(matches!(stored.body[0], LinkingBody::Identifying(_)));
        assert!(matches!(stored.body[1], LinkingBody::Geotagging(_)));
    }

    #[tokio::test]
    async fn test_store_failure_leaves_caches_alone() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next(StoreOp::Create);
        let (orchestrator, cache) = orchestrator(store.clone());
        cache.get().await;
        let before = cache.snapshot().refresh_count;

        let request = SaveRequest::new("a").with_links(&["b"]);
        let err = orchestrator.save(&request, &[]).await.unwrap_err();
        assert!(matches!(err, SaveError::Store { state: SaveState::Persisting, .. }));
        assert_eq!(cache.snapshot().refresh_count, before);
        assert_eq!(request.linked_ids, vec!["b"]);

        // Same request succeeds on retry
        assert!(orchestrator.save(&request, &[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_reconcile_waits_for_lagging_reads() {
        let store = Arc::new(MemoryStore::new().with_read_lag(2));
        let (orchestrator, cache) = orchestrator(store.clone());

        let summary = orchestrator
            .save(&SaveRequest::new("a").with_links(&["b"]), &[])
            .await
            .unwrap();
        assert!(summary.reconciled);
        assert_eq!(store.calls(StoreOp::LinkingLookup), 4);
        assert_eq!(cache.snapshot().annotations().len(), 1);
    }

    #[tokio::test]
    async fn test_tag_only_edit_waits_for_new_body() {
        let store = Arc::new(MemoryStore::new().with_read_lag(3));
        store.insert_linking(LinkingAnnotation::new("L1", vec!["a".into(), "b".into()]));
        let (orchestrator, cache) = orchestrator(store.clone());

        let summary = orchestrator
            .save(&SaveRequest::new("b").with_geotag(batavia()), &[])
            .await
            .unwrap();
        assert!(summary.reconciled);
        // One reverse lookup, three stale re-reads, then the fresh one
        assert_eq!(store.calls(StoreOp::LinkingLookup), 5);

        let snapshot = cache.snapshot();
        let cached = snapshot.annotations().iter().find(|l| l.id == "L1").cloned().unwrap();
        assert!(cached.has_geotag());
    }

    #[tokio::test]
    async fn test_point_only_edit_not_observed_is_reported() {
        let store = Arc::new(MemoryStore::new().with_read_lag(50));
        store.insert_linking(LinkingAnnotation::new("L1", vec!["a".into(), "b".into()]));
        let (orchestrator, _) = orchestrator(store.clone());

        let summary = orchestrator
            .save(&SaveRequest::new("a").with_point("canvas-1", 10.0, 20.0), &[])
            .await
            .unwrap();
        assert_eq!(summary.operation, SaveOperation::Updated);
        assert!(!summary.reconciled);
        assert!(store.linking_by_id("L1").unwrap().has_point());
    }

    #[tokio::test]
    async fn test_concurrent_edit_is_not_overwritten() {
        let store = Arc::new(MemoryStore::new());
        store.insert_linking(LinkingAnnotation::new("L1", vec!["a".into(), "b".into()]));
        store.compete_after_next_get(LinkingAnnotation::new("L1", vec!["a".into(), "b".into(), "x".into()]));
        let (orchestrator, cache) = orchestrator(store.clone());
        let before = cache.snapshot().refresh_count;

        let err = orchestrator
            .save(&SaveRequest::new("b").with_geotag(batavia()), &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SaveError::Store {
                state: SaveState::Persisting,
                source: StoreError::PreconditionFailed(_),
            }
        ));
        assert_eq!(cache.snapshot().refresh_count, before);

        let stored = store.linking_by_id("L1").unwrap();
        assert_eq!(stored.target, vec!["a", "b", "x"]);
        assert!(!stored.has_geotag());

        // A retry reads the new version and keeps the other member
        let summary = orchestrator
            .save(&SaveRequest::new("b").with_geotag(batavia()), &[])
            .await
            .unwrap();
        assert_eq!(summary.target, vec!["a", "b", "x"]);
    }

    #[tokio::test]
    async fn test_reconcile_gives_up_without_failing() {
        let store = Arc::new(MemoryStore::new().with_read_lag(50));
        let (orchestrator, _) = orchestrator(store.clone());

        let summary = orchestrator
            .save(&SaveRequest::new("a").with_links(&["b"]), &[])
            .await
            .unwrap();
        assert!(!summary.reconciled);
        assert!(store.linking_by_id(&summary.linking_id).is_some());
    }

    #[tokio::test]
    async fn test_strict_save_rejects_conflicts() {
        let store = Arc::new(MemoryStore::new());
        store.insert_linking(LinkingAnnotation::new("L1", vec!["a".into(), "b".into()]));
        let (orchestrator, cache) = orchestrator(store.clone());
        cache.get().await;

        let mut request = SaveRequest::new("c").with_links(&["a"]);
        request.strict = true;
        let err = orchestrator.save(&request, &[]).await.unwrap_err();
        assert!(matches!(err, SaveError::Validation(ValidationError::Conflicts(_))));
        assert_eq!(store.calls(StoreOp::Create), 0);

        request.strict = false;
        let summary = orchestrator.save(&request, &[]).await.unwrap();
        assert!(!summary.validation.is_valid);
    }

    #[tokio::test]
    async fn test_unknown_explicit_relationship() {
        let store = Arc::new(MemoryStore::new());
        let (orchestrator, _) = orchestrator(store);

        let err = orchestrator
            .save(&SaveRequest::new("a").with_links(&["b"]).editing("missing"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, SaveError::UnknownRelationship(_)));
        assert_eq!(err.state(), SaveState::ResolvingExisting);
    }
}
