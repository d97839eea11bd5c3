//! Relationship store trait

use async_trait::async_trait;

use super::error::StoreError;
use super::types::{BulkBatch, ContentPage, LoadMode, Versioned};
use crate::annotations::LinkingAnnotation;

/// Thin CRUD and listing interface to the remote annotation store.
///
/// The store has no transactions. Every call is independent and the caller
/// is responsible for reconciling its own view afterwards.
#[async_trait]
pub trait RelationshipStore: Send + Sync {
    /// Content annotations drawn on a canvas, page by page starting at 0
    async fn list_content_page(&self, canvas_id: &str, page: u32) -> Result<ContentPage, StoreError>;

    /// Linking annotations whose target contains any of the given ids,
    /// deduplicated by id
    async fn list_linking_for_targets(&self, ids: &[String]) -> Result<Vec<LinkingAnnotation>, StoreError>;

    /// One batch of the global linking listing
    async fn list_linking_batch(&self, mode: LoadMode, batch: u32) -> Result<BulkBatch, StoreError>;

    /// Whether a content annotation still exists
    async fn content_exists(&self, id: &str) -> Result<bool, StoreError>;

    /// Fetch a linking annotation with its current version tag
    async fn get_linking(&self, id: &str) -> Result<Option<Versioned<LinkingAnnotation>>, StoreError>;

    /// Create a linking annotation, returning it as stored (the store may assign the id)
    async fn create_linking(&self, annotation: &LinkingAnnotation) -> Result<LinkingAnnotation, StoreError>;

    /// Replace a linking annotation by id.
    ///
    /// With `expected_version` (as returned by [`get_linking`](Self::get_linking))
    /// the write fails with [`StoreError::PreconditionFailed`] when the
    /// annotation changed since that read.
    async fn update_linking(
        &self,
        annotation: &LinkingAnnotation,
        expected_version: Option<&str>,
    ) -> Result<LinkingAnnotation, StoreError>;

    /// Delete a linking annotation by id, guarded like [`update_linking`](Self::update_linking)
    async fn delete_linking(&self, id: &str, expected_version: Option<&str>) -> Result<(), StoreError>;
}
