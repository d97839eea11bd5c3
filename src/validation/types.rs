//! Validation result types

use serde::{Deserialize, Serialize};

use crate::annotations::ContentKind;

/// Why a candidate cannot join a new relationship as-is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Already a member of another relationship
    Linking,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipConflict {
    pub annotation_id: String,
    pub existing_linking_id: String,
    pub conflict_type: ConflictType,
}

/// An existing relationship that can be folded into the new one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeCandidate {
    pub annotation_id: String,
    pub existing_linking_id: String,
    pub existing_content: Vec<ContentKind>,
    pub reason: String,
}

/// Advisory outcome of a membership check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub conflicts: Vec<MembershipConflict>,
    pub warnings: Vec<String>,
    pub mergeable: Vec<MergeCandidate>,
}
