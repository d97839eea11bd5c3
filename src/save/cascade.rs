//! Cascade pruning after content annotations are deleted
//!
//! Every relationship referencing a deleted annotation loses that member.
//! It is kept when two members remain, or one member with a location or
//! point; otherwise it is deleted.

use std::sync::Arc;

use chrono::SecondsFormat;
use futures::stream::{self, StreamExt};
use serde::Serialize;

use super::orchestrator::SaveOrchestrator;
use super::payload::dedupe_ids;
use crate::annotations::LinkingAnnotation;
use crate::loader::CanvasLoader;
use crate::store::StoreError;

const PRUNE_CONCURRENCY: usize = 4;

/// What a cascade changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeReport {
    pub affected_linking: usize,
    pub updated: usize,
    pub deleted: usize,
    pub errors: Vec<String>,
}

enum Pruned {
    Updated,
    Deleted,
    Gone,
}

/// Full id match, or the deleted id as the last path segment of the member
fn references(member: &str, deleted: &str) -> bool {
    member == deleted
        || member
            .strip_suffix(deleted)
            .is_some_and(|prefix| prefix.ends_with('/'))
}

fn references_any(member: &str, deleted: &[String]) -> bool {
    deleted.iter().any(|id| references(member, id))
}

impl SaveOrchestrator {
    /// Remove deleted content annotations from every relationship
    pub async fn cascade_prune(
        &self,
        deleted_ids: &[String],
        loaders: &[Arc<CanvasLoader>],
    ) -> Result<CascadeReport, StoreError> {
        let deleted = dedupe_ids(deleted_ids.iter().map(String::as_str));
        if deleted.is_empty() {
            return Ok(CascadeReport::default());
        }

        let mut affected = self.store.list_linking_for_targets(&deleted).await?;
        // Members stored as full IRIs only match by suffix
        for cached in self.cache.snapshot().annotations() {
            let referenced = cached.target.iter().any(|t| references_any(t, &deleted));
            if referenced && !affected.iter().any(|l| l.id == cached.id) {
                affected.push(cached.clone());
            }
        }

        let mut report = CascadeReport {
            affected_linking: affected.len(),
            ..CascadeReport::default()
        };
        if affected.is_empty() {
            return Ok(report);
        }
        tracing::info!(deleted = deleted.len(), affected = affected.len(), "Pruning deleted annotations from relationships");

        let outcomes: Vec<(String, Result<Pruned, StoreError>)> = stream::iter(affected)
            .map(|linking| {
                let deleted = &deleted;
                async move {
                    let id = linking.id.clone();
                    (id, self.prune_one(&linking, deleted).await)
                }
            })
            .buffer_unordered(PRUNE_CONCURRENCY)
            .collect()
            .await;

        for (id, outcome) in outcomes {
            match outcome {
                Ok(Pruned::Updated) => report.updated += 1,
                Ok(Pruned::Deleted) => report.deleted += 1,
                Ok(Pruned::Gone) => {}
                Err(e) => {
                    tracing::warn!(linking_id = %id, error = %e, "Cascade prune failed");
                    report.errors.push(format!("{}: {}", id, e));
                }
            }
        }

        if report.updated + report.deleted > 0 {
            self.reconcile(loaders, &[], |_| true).await;
        }
        tracing::info!(
            updated = report.updated,
            deleted = report.deleted,
            errors = report.errors.len(),
            "Cascade prune complete"
        );
        Ok(report)
    }

    async fn prune_one(&self, linking: &LinkingAnnotation, deleted: &[String]) -> Result<Pruned, StoreError> {
        let Some(current) = self.store.get_linking(&linking.id).await? else {
            return Ok(Pruned::Gone);
        };
        let version = current.version;
        let mut updated = current.value;
        updated.target.retain(|member| !references_any(member, deleted));

        if updated.is_well_formed() {
            updated.modified = Some(self.clock.now().to_rfc3339_opts(SecondsFormat::Millis, true));
            self.store.update_linking(&updated, version.as_deref()).await?;
            tracing::debug!(linking_id = %updated.id, remaining = updated.target.len(), "Pruned relationship");
            Ok(Pruned::Updated)
        } else {
            self.store.delete_linking(&updated.id, version.as_deref()).await?;
            tracing::debug!(linking_id = %updated.id, "Deleted relationship left without members");
            Ok(Pruned::Deleted)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::{LinkingBody, PointSelector, SelectingBody};
    use crate::cache::{CacheConfig, GlobalLinkingCache, ManualClock};
    use crate::save::ReconcileConfig;
    use crate::store::{MemoryStore, StoreOp};
    use serde_json::Map;

    fn orchestrator(store: Arc<MemoryStore>) -> (SaveOrchestrator, Arc<GlobalLinkingCache>) {
        let clock = Arc::new(ManualClock::default());
        let cache = Arc::new(GlobalLinkingCache::new(store.clone(), clock.clone(), CacheConfig::default()));
        let orchestrator = SaveOrchestrator::new(store, cache.clone(), clock, ReconcileConfig::default());
        (orchestrator, cache)
    }

    fn linking(id: &str, target: &[&str]) -> LinkingAnnotation {
        LinkingAnnotation::new(id, target.iter().map(|t| t.to_string()).collect())
    }

    fn pinned(id: &str, target: &[&str]) -> LinkingAnnotation {
        linking(id, target).with_body(vec![LinkingBody::Selecting(SelectingBody {
            body_type: "SpecificResource".into(),
            source: "canvas-1".into(),
            selector: PointSelector::new(1.0, 2.0),
            creator: None,
            created: None,
            extra: Map::new(),
        })])
    }

    #[test]
    fn test_reference_matching() {
        assert!(references("a1", "a1"));
        assert!(references("https://repo.example/w3c/c/a1", "a1"));
        assert!(!references("https://repo.example/w3c/c/ba1", "a1"));
    }

    #[tokio::test]
    async fn test_prunes_updates_and_deletes() {
        let store = Arc::new(MemoryStore::new());
        store.insert_linking(linking("L1", &["a", "b", "c"]));
        store.insert_linking(linking("L2", &["a", "d"]));
        store.insert_linking(pinned("L3", &["a", "e"]));
        store.insert_linking(linking("L4", &["f", "g"]));
        let (orchestrator, _) = orchestrator(store.clone());

        let report = orchestrator.cascade_prune(&["a".to_string()], &[]).await.unwrap();
        assert_eq!(report.affected_linking, 3);
        assert_eq!(report.updated, 2);
        assert_eq!(report.deleted, 1);
        assert!(report.errors.is_empty());

        assert_eq!(store.linking_by_id("L1").unwrap().target, vec!["b", "c"]);
        assert!(store.linking_by_id("L2").is_none());
        assert_eq!(store.linking_by_id("L3").unwrap().target, vec!["e"]);
        assert_eq!(store.linking_by_id("L4").unwrap().target, vec!["f", "g"]);
    }

    #[tokio::test]
    async fn test_suffix_members_found_through_cache() {
        let store = Arc::new(MemoryStore::new());
        store.insert_linking(linking("L1", &["https://repo.example/w3c/c/a", "b", "c"]));
        let (orchestrator, cache) = orchestrator(store.clone());
        cache.get().await;

        let report = orchestrator.cascade_prune(&["a".to_string()], &[]).await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(store.linking_by_id("L1").unwrap().target, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_failures_are_collected() {
        let store = Arc::new(MemoryStore::new());
        store.insert_linking(linking("L1", &["a", "b", "c"]));
        store.fail_next(StoreOp::Update);
        let (orchestrator, _) = orchestrator(store.clone());

        let report = orchestrator.cascade_prune(&["a".to_string()], &[]).await.unwrap();
        assert_eq!(report.updated, 0);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("L1: "));
    }

    #[tokio::test]
    async fn test_nothing_to_prune() {
        let store = Arc::new(MemoryStore::new());
        let (orchestrator, _) = orchestrator(store.clone());
        let report = orchestrator.cascade_prune(&[], &[]).await.unwrap();
        assert_eq!(report, CascadeReport::default());
        assert_eq!(store.calls(StoreOp::LinkingLookup), 0);
    }
}
