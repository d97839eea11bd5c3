//! Relationship deletion
//!
//! Whole relationships are deleted behind a two-step confirmation. Single
//! purposes are removed by read-modify-write that keeps the target and every
//! other body entry.

use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::error::DeleteError;
use super::orchestrator::SaveOrchestrator;
use super::payload::{without_purposes, LOCATION_PURPOSES, POINT_PURPOSES};
use crate::annotations::{LinkingAnnotation, PURPOSE_GEOTAGGING, PURPOSE_SELECTING};
use crate::cache::Clock;
use crate::loader::CanvasLoader;
use crate::store::Versioned;

/// Seconds a first delete request stays armed
pub const CONFIRM_WINDOW_SECS: i64 = 3;

/// Answer to a whole-relationship delete request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Confirmation {
    /// Repeat the request before `expires_at` to delete
    Armed {
        #[serde(rename = "expiresAt")]
        expires_at: DateTime<Utc>,
    },
    Confirmed,
}

/// Two-step confirmation with a single pending slot
pub struct DeleteConfirmation {
    clock: Arc<dyn Clock>,
    window: Duration,
    pending: Mutex<Option<(String, DateTime<Utc>)>>,
}

impl DeleteConfirmation {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_window(clock, Duration::seconds(CONFIRM_WINDOW_SECS))
    }

    pub fn with_window(clock: Arc<dyn Clock>, window: Duration) -> Self {
        Self {
            clock,
            window,
            pending: Mutex::new(None),
        }
    }

    /// Arm on the first request; confirm a repeat inside the window.
    ///
    /// A request for another id, or one after the window closed, re-arms.
    pub fn request(&self, linking_id: &str) -> Confirmation {
        let now = self.clock.now();
        let mut pending = self.pending.lock();
        match pending.take() {
            Some((armed, expires_at)) if armed == linking_id && now < expires_at => Confirmation::Confirmed,
            _ => {
                let expires_at = now + self.window;
                *pending = Some((linking_id.to_string(), expires_at));
                Confirmation::Armed { expires_at }
            }
        }
    }

    pub fn is_armed(&self, linking_id: &str) -> bool {
        let now = self.clock.now();
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|(armed, expires_at)| armed == linking_id && now < *expires_at)
    }

    pub fn disarm(&self) {
        self.pending.lock().take();
    }
}

/// Body purposes that can be removed on their own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovablePurpose {
    /// The location pair (`identifying` + `geotagging`)
    Geotagging,
    /// The point (`selecting`)
    Selecting,
}

impl RemovablePurpose {
    pub fn parse(value: &str) -> Result<Self, DeleteError> {
        match value.trim().to_lowercase().as_str() {
            "geotagging" | "identifying" | "location" => Ok(RemovablePurpose::Geotagging),
            "selecting" | "point" => Ok(RemovablePurpose::Selecting),
            other => Err(DeleteError::UnsupportedPurpose(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RemovablePurpose::Geotagging => PURPOSE_GEOTAGGING,
            RemovablePurpose::Selecting => PURPOSE_SELECTING,
        }
    }

    fn purposes(&self) -> &'static [&'static str] {
        match self {
            RemovablePurpose::Geotagging => &LOCATION_PURPOSES,
            RemovablePurpose::Selecting => &POINT_PURPOSES,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            RemovablePurpose::Geotagging => "location",
            RemovablePurpose::Selecting => "point selection",
        }
    }
}

/// Outcome of a deletion
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSummary {
    pub linking_id: String,
    /// The whole relationship is gone
    pub deleted: bool,
    /// Members of the relationship after the change (empty when deleted)
    pub target: Vec<String>,
    pub reconciled: bool,
    pub message: String,
}

impl SaveOrchestrator {
    async fn fetch_linking(&self, linking_id: &str) -> Result<Versioned<LinkingAnnotation>, DeleteError> {
        self.store
            .get_linking(linking_id)
            .await?
            .ok_or_else(|| DeleteError::NotFound(linking_id.to_string()))
    }

    /// Delete a whole relationship, grouping and bodies alike
    pub async fn delete_relationship(
        &self,
        linking_id: &str,
        loaders: &[Arc<CanvasLoader>],
    ) -> Result<DeleteSummary, DeleteError> {
        let Versioned { value: existing, version } = self.fetch_linking(linking_id).await?;
        self.store.delete_linking(&existing.id, version.as_deref()).await?;
        tracing::info!(linking_id = %existing.id, members = existing.target.len(), "Linking annotation deleted");

        let reconciled = self
            .reconcile(loaders, &existing.target, |found| !found.iter().any(|l| l.id == existing.id))
            .await;
        Ok(DeleteSummary {
            message: format!(
                "Deleted link between {} annotation{}",
                existing.target.len(),
                if existing.target.len() == 1 { "" } else { "s" }
            ),
            linking_id: existing.id,
            deleted: true,
            target: Vec::new(),
            reconciled,
        })
    }

    /// Remove one purpose from a relationship.
    ///
    /// When what remains is a single member with neither location nor
    /// point, the relationship is deleted instead.
    pub async fn remove_purpose(
        &self,
        linking_id: &str,
        purpose: RemovablePurpose,
        loaders: &[Arc<CanvasLoader>],
    ) -> Result<DeleteSummary, DeleteError> {
        let Versioned { value: existing, version } = self.fetch_linking(linking_id).await?;
        if !purpose.purposes().iter().any(|p| existing.has_purpose(p)) {
            return Err(DeleteError::MissingPurpose {
                id: existing.id,
                purpose: purpose.as_str().to_string(),
            });
        }

        let mut updated = existing.clone();
        updated.body = without_purposes(existing.body.clone(), purpose.purposes());
        updated.modified = Some(self.clock.now().to_rfc3339_opts(SecondsFormat::Millis, true));

        if !updated.is_well_formed() {
            self.store.delete_linking(&existing.id, version.as_deref()).await?;
            tracing::info!(
                linking_id = %existing.id,
                purpose = purpose.as_str(),
                "Removed last content of a single-member relationship, deleted it"
            );
            let reconciled = self
                .reconcile(loaders, &existing.target, |found| !found.iter().any(|l| l.id == existing.id))
                .await;
            return Ok(DeleteSummary {
                message: format!("Removed {} and the now empty link", purpose.label()),
                linking_id: existing.id,
                deleted: true,
                target: Vec::new(),
                reconciled,
            });
        }

        let saved = self.store.update_linking(&updated, version.as_deref()).await?;
        tracing::info!(linking_id = %saved.id, purpose = purpose.as_str(), "Removed body purpose");

        let removed = purpose.purposes();
        let reconciled = self
            .reconcile(loaders, &saved.target, |found| {
                found
                    .iter()
                    .any(|l| l.id == saved.id && !removed.iter().any(|p| l.has_purpose(p)))
            })
            .await;
        Ok(DeleteSummary {
            message: format!("Successfully removed {} from this annotation", purpose.label()),
            linking_id: saved.id,
            deleted: false,
            target: saved.target,
            reconciled,
        })
    }
}
