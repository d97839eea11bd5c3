//! Conflict and merge validation
//!
//! Reports, before a write, which candidate annotations already belong to
//! another relationship and which of those relationships could simply be
//! merged. The result is advisory.

mod types;
mod validator;

pub use types::{ConflictType, MembershipConflict, MergeCandidate, ValidationResult};
pub use validator::{validate_against_cache, LinkingValidator};
