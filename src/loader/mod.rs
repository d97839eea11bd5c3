//! Canvas-scoped loading
//!
//! - Paginated content annotations for one canvas
//! - Linking annotations for the loaded ids
//! - Generation-stamped commits published over `watch`
//! - LRU registry of loaders keyed by canvas

mod canvas;
mod registry;

pub use canvas::{CanvasLoader, CanvasView};
pub use registry::{CanvasRegistry, DEFAULT_MAX_CANVASES};
