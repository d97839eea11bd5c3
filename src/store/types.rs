//! Store request and response types

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::annotations::{ContentAnnotation, IconState, LinkingAnnotation};

/// A value paired with the version tag the store reported for it
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    /// ETag or `modified` stamp
    pub version: Option<String>,
}

impl<T> Versioned<T> {
    pub fn new(value: T, version: Option<String>) -> Self {
        Self { value, version }
    }
}

/// One page of content annotations for a canvas
#[derive(Debug, Clone, Default)]
pub struct ContentPage {
    pub items: Vec<Versioned<ContentAnnotation>>,
    pub has_more: bool,
}

/// Bulk listing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// First batch only, returned as fast as possible
    #[default]
    Quick,
    /// Subsequent batches
    Full,
}

impl LoadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadMode::Quick => "quick",
            LoadMode::Full => "full",
        }
    }
}

/// One batch of the global linking listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkBatch {
    pub annotations: Vec<LinkingAnnotation>,
    pub icon_states: HashMap<String, IconState>,
    pub has_more: bool,
    pub total_annotations: usize,
    /// Annotations in this batch
    pub processed_annotations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_batch: Option<u32>,
    pub mode: LoadMode,
}
