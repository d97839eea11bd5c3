//! Linking annotation data model
//!
//! - Content annotations (owned by the store, passed through)
//! - Linking annotations with purpose-tagged bodies
//! - Derived icon state per content annotation
//! - Display details for one relationship

mod details;
mod types;

pub use details::*;
pub use types::*;
