//! Global relationship cache
//!
//! - Single process-wide entry holding every linking annotation
//! - Quick first batch, then progressive full batches
//! - Single-flight initial fetch, TTL expiry, explicit invalidation
//! - Injectable clock

mod clock;
mod global;

pub use clock::{Clock, ManualClock, SystemClock};
pub use global::{
    BatchOutcome, CacheConfig, CacheEntry, CacheSnapshot, GlobalLinkingCache, LoadProgress,
    GLOBAL_CACHE_KEY,
};
