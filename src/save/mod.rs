//! Save and mutation orchestration
//!
//! - `SaveOrchestrator`: validate, resolve, build, persist, reconcile
//! - Payload rules that keep group membership and unrelated bodies intact
//! - Whole and per-purpose deletion with two-step confirmation
//! - Cascade pruning after content annotations are deleted
//! - Duplicate consolidation and orphaned member repair

mod cascade;
mod cleanup;
mod deletion;
mod error;
mod orchestrator;
mod payload;

pub use cascade::CascadeReport;
pub use cleanup::{DuplicateGroup, DuplicateReport, OrphanAction, OrphanReport, OrphanedLinking};
pub use deletion::{Confirmation, DeleteConfirmation, DeleteSummary, RemovablePurpose, CONFIRM_WINDOW_SECS};
pub use error::{DeleteError, SaveError, ValidationError};
pub use orchestrator::{
    check_request, ReconcileConfig, SaveOperation, SaveOrchestrator, SaveRequest, SaveState, SaveSummary,
};
pub use payload::{build_body, build_linking, build_target, PointInput, Stamp, TargetOrder};
