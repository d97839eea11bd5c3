//! Relationship store client
//!
//! - `RelationshipStore` trait over the remote annotation store
//! - `AnnoRepoStore`: W3C Web Annotation server over HTTP
//! - `MemoryStore`: in-process store with failure injection

mod annorepo;
mod error;
mod memory;
mod traits;
mod types;

pub use annorepo::{AnnoRepoStore, AnnoRepoConfig};
pub use error::StoreError;
pub use memory::{MemoryStore, StoreOp};
pub use traits::RelationshipStore;
pub use types::{BulkBatch, ContentPage, LoadMode, Versioned};
