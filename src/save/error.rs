//! Save and delete error types

use thiserror::Error;

use super::orchestrator::SaveState;
use crate::geotag::GeotagError;
use crate::store::StoreError;

/// Rejections raised before anything is persisted
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Nothing to save: no annotations, location or point selected")]
    NothingToSave,

    #[error("A relationship needs at least one annotation")]
    EmptyAnchor,

    #[error("A single annotation can only be saved with a location or a point")]
    GroupTooSmall,

    #[error("Invalid location: {0}")]
    MalformedTag(#[from] GeotagError),

    #[error("Invalid point: {0}")]
    MalformedPoint(String),

    #[error("A point selection needs a canvas")]
    MissingCanvas,

    /// Only raised for strict saves
    #[error("Annotations already belong to other relationships: {0}")]
    Conflicts(String),
}

/// Why a save did not complete
#[derive(Debug, Error)]
pub enum SaveError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Linking annotation not found: {0}")]
    UnknownRelationship(String),

    /// A store call failed; nothing in the caches was touched
    #[error("Save failed while {state}: {source}")]
    Store {
        state: SaveState,
        #[source]
        source: StoreError,
    },
}

impl SaveError {
    /// State the save was in when it failed
    pub fn state(&self) -> SaveState {
        match self {
            SaveError::Validation(_) => SaveState::Validating,
            SaveError::UnknownRelationship(_) => SaveState::ResolvingExisting,
            SaveError::Store { state, .. } => *state,
        }
    }
}

/// Why a deletion did not complete
#[derive(Debug, Error)]
pub enum DeleteError {
    #[error("Linking annotation not found: {0}")]
    NotFound(String),

    #[error("Unsupported body purpose: {0}")]
    UnsupportedPurpose(String),

    #[error("Linking annotation {id} has no {purpose} body")]
    MissingPurpose { id: String, purpose: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}
