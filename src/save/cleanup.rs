//! Repair passes over the whole relationship listing
//!
//! Membership validation is advisory, so two editors can leave separate
//! relationships over the same members. Duplicate consolidation keeps the
//! most complete one per member set and folds in body purposes it lacks.
//! Orphan repair drops members whose content annotation is gone, the same
//! way a cascade would have.
//!
//! Both passes analyze only when `dry_run` is set.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat};
use futures::stream::{self, StreamExt};
use serde::Serialize;

use super::orchestrator::SaveOrchestrator;
use crate::annotations::{LinkingAnnotation, LinkingBody};
use crate::loader::CanvasLoader;
use crate::store::{LoadMode, StoreError};

const EXISTENCE_CONCURRENCY: usize = 8;

/// Relationships sharing one member set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    /// Sorted member ids
    pub targets: Vec<String>,
    pub kept: String,
    pub removed: Vec<String>,
    /// Body purposes the kept relationship takes over from the removed ones
    pub merged_purposes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateReport {
    pub dry_run: bool,
    /// Relationships listed
    pub total: usize,
    pub groups: Vec<DuplicateGroup>,
    /// Relationships that lose to another over the same members
    pub duplicates: usize,
    /// Relationships left after consolidation
    pub kept: usize,
    pub deleted: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanAction {
    /// Drop the missing members and keep the relationship
    Repair,
    /// Too little would remain
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanedLinking {
    pub linking_id: String,
    pub orphaned_targets: Vec<String>,
    pub remaining_targets: Vec<String>,
    pub action: OrphanAction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanReport {
    pub dry_run: bool,
    pub total: usize,
    pub with_orphans: usize,
    pub orphaned_targets: usize,
    pub details: Vec<OrphanedLinking>,
    pub repaired: usize,
    pub deleted: usize,
    pub errors: Vec<String>,
}

/// Most recent edit dominates, then body entries, distinct purposes and members
fn completeness(linking: &LinkingAnnotation) -> f64 {
    let stamp = linking
        .modified
        .as_deref()
        .or(linking.created.as_deref())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.timestamp_millis() as f64 / 1_000_000.0)
        .unwrap_or(0.0);
    let purposes: HashSet<&str> = linking.body.iter().filter_map(|b| b.purpose()).collect();
    stamp + linking.body.len() as f64 * 10.0 + purposes.len() as f64 * 5.0 + linking.target.len() as f64
}

fn sorted_targets(linking: &LinkingAnnotation) -> Vec<String> {
    let mut targets = linking.target.clone();
    targets.sort();
    targets.dedup();
    targets
}

/// Relationships grouped by member set, in listing order
fn group_by_members(all: &[LinkingAnnotation]) -> Vec<(Vec<String>, Vec<&LinkingAnnotation>)> {
    let mut index: HashMap<Vec<String>, usize> = HashMap::new();
    let mut groups: Vec<(Vec<String>, Vec<&LinkingAnnotation>)> = Vec::new();
    for linking in all {
        let key = sorted_targets(linking);
        match index.get(&key) {
            Some(&i) => groups[i].1.push(linking),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, vec![linking]));
            }
        }
    }
    groups
}

/// Earliest listed wins a tie
fn best_of<'a>(candidates: &[&'a LinkingAnnotation]) -> Option<&'a LinkingAnnotation> {
    let mut best: Option<&LinkingAnnotation> = None;
    for &candidate in candidates {
        if best.map_or(true, |b| completeness(candidate) > completeness(b)) {
            best = Some(candidate);
        }
    }
    best
}

/// Bodies of `others` whose purpose `kept` does not carry yet, first seen wins
fn missing_bodies(kept: &LinkingAnnotation, others: &[&LinkingAnnotation]) -> Vec<LinkingBody> {
    let mut present: HashSet<String> = kept
        .body
        .iter()
        .filter_map(|b| b.purpose().map(str::to_owned))
        .collect();
    let mut added = Vec::new();
    for other in others {
        let offered: Vec<&LinkingBody> = other
            .body
            .iter()
            .filter(|b| b.purpose().is_some_and(|p| !present.contains(p)))
            .collect();
        for body in offered {
            added.push(body.clone());
        }
        present.extend(other.body.iter().filter_map(|b| b.purpose().map(str::to_owned)));
    }
    added
}

impl SaveOrchestrator {
    /// Every linking annotation, walked batch by batch from the store
    async fn list_all_linking(&self) -> Result<Vec<LinkingAnnotation>, StoreError> {
        let mut all: Vec<LinkingAnnotation> = Vec::new();
        let mut seen = HashSet::new();
        let mut batch = 0;
        loop {
            let page = self.store.list_linking_batch(LoadMode::Full, batch).await?;
            all.extend(page.annotations.into_iter().filter(|l| seen.insert(l.id.clone())));
            match page.next_batch {
                Some(next) if page.has_more && next > batch => batch = next,
                _ => return Ok(all),
            }
        }
    }

    /// Keep one relationship per member set and delete the rest
    pub async fn consolidate_duplicates(
        &self,
        dry_run: bool,
        loaders: &[Arc<CanvasLoader>],
    ) -> Result<DuplicateReport, StoreError> {
        let all = self.list_all_linking().await?;
        let grouped = group_by_members(&all);

        let mut report = DuplicateReport {
            dry_run,
            total: all.len(),
            kept: grouped.len(),
            ..DuplicateReport::default()
        };

        let mut plans = Vec::new();
        for (targets, members) in grouped.iter().filter(|(_, m)| m.len() > 1) {
            let Some(kept) = best_of(members) else { continue };
            let others: Vec<&LinkingAnnotation> = members.iter().copied().filter(|l| l.id != kept.id).collect();
            let merged = missing_bodies(kept, &others);

            let mut merged_purposes: Vec<String> = merged.iter().filter_map(|b| b.purpose().map(str::to_owned)).collect();
            merged_purposes.dedup();
            report.duplicates += others.len();
            report.groups.push(DuplicateGroup {
                targets: targets.clone(),
                kept: kept.id.clone(),
                removed: others.iter().map(|l| l.id.clone()).collect(),
                merged_purposes,
            });
            plans.push((kept, others, merged));
        }
        tracing::info!(
            total = report.total,
            groups = report.groups.len(),
            duplicates = report.duplicates,
            dry_run,
            "Duplicate relationships analyzed"
        );
        if dry_run || plans.is_empty() {
            return Ok(report);
        }

        for (kept, others, merged) in plans {
            if !merged.is_empty() {
                if let Err(e) = self.merge_into(&kept.id, merged).await {
                    tracing::warn!(linking_id = %kept.id, error = %e, "Could not merge duplicate bodies");
                    report.errors.push(format!("{}: {}", kept.id, e));
                    // Keep the duplicates rather than lose their bodies
                    continue;
                }
            }
            for other in others {
                match self.delete_current(&other.id).await {
                    Ok(true) => report.deleted += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(linking_id = %other.id, error = %e, "Could not delete duplicate");
                        report.errors.push(format!("{}: {}", other.id, e));
                    }
                }
            }
        }

        if report.deleted > 0 {
            self.reconcile(loaders, &[], |_| true).await;
        }
        tracing::info!(deleted = report.deleted, errors = report.errors.len(), "Duplicate consolidation complete");
        Ok(report)
    }

    /// Append bodies to the current version of a relationship
    async fn merge_into(&self, linking_id: &str, bodies: Vec<LinkingBody>) -> Result<(), StoreError> {
        let current = self
            .store
            .get_linking(linking_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(linking_id.to_string()))?;
        let mut updated = current.value;
        updated.body.extend(bodies);
        updated.modified = Some(self.clock.now().to_rfc3339_opts(SecondsFormat::Millis, true));
        self.store.update_linking(&updated, current.version.as_deref()).await?;
        Ok(())
    }

    /// Delete a relationship at its current version; false when already gone
    async fn delete_current(&self, linking_id: &str) -> Result<bool, StoreError> {
        let Some(current) = self.store.get_linking(linking_id).await? else {
            return Ok(false);
        };
        self.store.delete_linking(linking_id, current.version.as_deref()).await?;
        Ok(true)
    }

    /// Find members whose content annotation no longer exists and, unless
    /// `dry_run`, prune them
    pub async fn repair_orphans(
        &self,
        dry_run: bool,
        loaders: &[Arc<CanvasLoader>],
    ) -> Result<OrphanReport, StoreError> {
        let all = self.list_all_linking().await?;
        let mut report = OrphanReport {
            dry_run,
            total: all.len(),
            ..OrphanReport::default()
        };

        let unique: Vec<String> = {
            let mut seen = HashSet::new();
            all.iter()
                .flat_map(|l| l.target.iter())
                .filter(|t| seen.insert(t.as_str()))
                .cloned()
                .collect()
        };
        let checks: Vec<(String, Result<bool, StoreError>)> = stream::iter(unique)
            .map(|id| async move {
                let exists = self.store.content_exists(&id).await;
                (id, exists)
            })
            .buffer_unordered(EXISTENCE_CONCURRENCY)
            .collect()
            .await;

        let mut missing = HashSet::new();
        for (id, outcome) in checks {
            match outcome {
                Ok(true) => {}
                Ok(false) => {
                    missing.insert(id);
                }
                // Unknown counts as present
                Err(e) => report.errors.push(format!("{}: {}", id, e)),
            }
        }

        for linking in &all {
            let orphaned: Vec<String> = linking.target.iter().filter(|t| missing.contains(*t)).cloned().collect();
            if orphaned.is_empty() {
                continue;
            }
            let mut pruned = linking.clone();
            pruned.target.retain(|t| !missing.contains(t));
            report.orphaned_targets += orphaned.len();
            report.details.push(OrphanedLinking {
                linking_id: linking.id.clone(),
                action: if pruned.is_well_formed() {
                    OrphanAction::Repair
                } else {
                    OrphanAction::Delete
                },
                remaining_targets: pruned.target,
                orphaned_targets: orphaned,
            });
        }
        report.with_orphans = report.details.len();
        tracing::info!(
            total = report.total,
            with_orphans = report.with_orphans,
            orphaned_targets = report.orphaned_targets,
            dry_run,
            "Orphaned members analyzed"
        );
        if dry_run || report.details.is_empty() {
            return Ok(report);
        }

        for detail in report.details.clone() {
            match self.prune_missing(&detail.linking_id, &missing).await {
                Ok(Some(OrphanAction::Repair)) => report.repaired += 1,
                Ok(Some(OrphanAction::Delete)) => report.deleted += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(linking_id = %detail.linking_id, error = %e, "Orphan repair failed");
                    report.errors.push(format!("{}: {}", detail.linking_id, e));
                }
            }
        }

        if report.repaired + report.deleted > 0 {
            self.reconcile(loaders, &[], |_| true).await;
        }
        tracing::info!(
            repaired = report.repaired,
            deleted = report.deleted,
            errors = report.errors.len(),
            "Orphan repair complete"
        );
        Ok(report)
    }

    /// Drop missing members from the current version of a relationship
    async fn prune_missing(&self, linking_id: &str, missing: &HashSet<String>) -> Result<Option<OrphanAction>, StoreError> {
        let Some(current) = self.store.get_linking(linking_id).await? else {
            return Ok(None);
        };
        let version = current.version;
        let mut updated = current.value;
        updated.target.retain(|t| !missing.contains(t));

        if updated.is_well_formed() {
            updated.modified = Some(self.clock.now().to_rfc3339_opts(SecondsFormat::Millis, true));
            self.store.update_linking(&updated, version.as_deref()).await?;
            Ok(Some(OrphanAction::Repair))
        } else {
            self.store.delete_linking(&updated.id, version.as_deref()).await?;
            Ok(Some(OrphanAction::Delete))
        }
    }
}
