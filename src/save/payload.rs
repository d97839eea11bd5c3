//! Payload construction
//!
//! Pure functions deciding the target and body of the linking annotation a
//! save writes. Target order is the reading order and is never derived from
//! body order.

use std::collections::HashSet;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use uuid::Uuid;

use super::error::ValidationError;
use crate::annotations::{
    Creator, GeotaggingBody, IdentifyingBody, LinkingAnnotation, LinkingBody, PointSelector,
    SelectingBody, PURPOSE_GEOTAGGING, PURPOSE_IDENTIFYING, PURPOSE_SELECTING,
};
use crate::geotag::NormalizedGeotag;

const SPECIFIC_RESOURCE: &str = "SpecificResource";

/// Purposes replaced together when a location is saved
pub const LOCATION_PURPOSES: [&str; 2] = [PURPOSE_IDENTIFYING, PURPOSE_GEOTAGGING];

/// Purposes replaced when a point is saved
pub const POINT_PURPOSES: [&str; 1] = [PURPOSE_SELECTING];

/// How the caller's ids are ordered in the target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetOrder {
    /// The anchor leads, then the linked ids as given
    #[default]
    AnchorFirst,
    /// The linked ids already are the reading order
    AsSupplied,
}

/// A point picked on a canvas, in image pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointInput {
    pub x: f64,
    pub y: f64,
}

impl PointInput {
    pub fn check(&self) -> Result<(), ValidationError> {
        if !self.x.is_finite() || !self.y.is_finite() {
            return Err(ValidationError::MalformedPoint(format!(
                "({}, {}) is not a finite position",
                self.x, self.y
            )));
        }
        if self.x < 0.0 || self.y < 0.0 {
            return Err(ValidationError::MalformedPoint(format!(
                "({}, {}) lies outside the canvas",
                self.x, self.y
            )));
        }
        Ok(())
    }
}

/// Authorship stamped on new entries
#[derive(Debug, Clone)]
pub struct Stamp {
    pub creator: Option<Creator>,
    pub now: String,
}

impl Stamp {
    pub fn new(creator: Option<Creator>, at: DateTime<Utc>) -> Self {
        Self {
            creator,
            now: at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Drop blanks and repeats, keeping first occurrences
pub fn dedupe_ids<'a>(ids: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| !id.trim().is_empty() && seen.insert(*id))
        .map(str::to_owned)
        .collect()
}

/// Target of the saved relationship.
///
/// With no linked ids the existing target is carried over unchanged, so a
/// tag or point edit never shrinks a group.
pub fn build_target(
    anchor: &str,
    linked: &[String],
    order: TargetOrder,
    existing: Option<&LinkingAnnotation>,
) -> Vec<String> {
    if linked.iter().all(|id| id.trim().is_empty()) {
        return match existing {
            Some(existing) => existing.target.clone(),
            None => dedupe_ids([anchor]),
        };
    }

    match order {
        TargetOrder::AnchorFirst => {
            dedupe_ids(std::iter::once(anchor).chain(linked.iter().map(String::as_str)))
        }
        TargetOrder::AsSupplied => {
            let mut target = dedupe_ids(linked.iter().map(String::as_str));
            if !anchor.trim().is_empty() && !target.iter().any(|id| id == anchor) {
                target.insert(0, anchor.to_string());
            }
            target
        }
    }
}

/// Replace every entry with one of `purposes` by `replacement`, in place of
/// the first one removed. Appends when none matched.
fn splice(body: Vec<LinkingBody>, purposes: &[&str], replacement: Vec<LinkingBody>) -> Vec<LinkingBody> {
    let matches = |b: &LinkingBody| b.purpose().is_some_and(|p| purposes.contains(&p));
    let position = body.iter().position(matches);
    let mut kept = without_purposes(body, purposes);
    let at = position.unwrap_or(kept.len()).min(kept.len());
    kept.splice(at..at, replacement);
    kept
}

/// Body with every entry of the given purposes removed
pub fn without_purposes(body: Vec<LinkingBody>, purposes: &[&str]) -> Vec<LinkingBody> {
    body.into_iter()
        .filter(|b| !b.purpose().is_some_and(|p| purposes.contains(&p)))
        .collect()
}

/// Body of the saved relationship.
///
/// Only the location pair and the point are replaced; every other entry
/// passes through. An existing entry identical to its replacement is kept
/// as is, so re-saving leaves the body unchanged.
pub fn build_body(
    existing: &[LinkingBody],
    geotag: Option<&NormalizedGeotag>,
    point: Option<(&str, PointInput)>,
    stamp: &Stamp,
) -> Vec<LinkingBody> {
    let mut body = existing.to_vec();

    if let Some(geotag) = geotag {
        let identifying = existing
            .iter()
            .find(|b| matches!(b, LinkingBody::Identifying(i) if i.source == geotag.place))
            .cloned()
            .unwrap_or_else(|| {
                LinkingBody::Identifying(IdentifyingBody {
                    body_type: SPECIFIC_RESOURCE.to_string(),
                    source: geotag.place.clone(),
                    creator: stamp.creator.clone(),
                    created: Some(stamp.now.clone()),
                    extra: Map::new(),
                })
            });
        let geotagging = existing
            .iter()
            .find(|b| matches!(b, LinkingBody::Geotagging(g) if g.source == geotag.feature))
            .cloned()
            .unwrap_or_else(|| {
                LinkingBody::Geotagging(GeotaggingBody {
                    body_type: SPECIFIC_RESOURCE.to_string(),
                    source: geotag.feature.clone(),
                    creator: stamp.creator.clone(),
                    created: Some(stamp.now.clone()),
                    extra: Map::new(),
                })
            });
        body = splice(body, &LOCATION_PURPOSES, vec![identifying, geotagging]);
    }

    if let Some((canvas, point)) = point {
        let selector = PointSelector::new(point.x, point.y);
        let selecting = existing
            .iter()
            .find(|b| matches!(b, LinkingBody::Selecting(s) if s.source == canvas && s.selector == selector))
            .cloned()
            .unwrap_or_else(|| {
                LinkingBody::Selecting(SelectingBody {
                    body_type: SPECIFIC_RESOURCE.to_string(),
                    source: canvas.to_string(),
                    selector,
                    creator: stamp.creator.clone(),
                    created: Some(stamp.now.clone()),
                    extra: Map::new(),
                })
            });
        body = splice(body, &POINT_PURPOSES, vec![selecting]);
    }

    body
}

/// The annotation to persist: an update of `existing`, or a new one with a
/// client-minted `urn:uuid` id
pub fn build_linking(
    existing: Option<&LinkingAnnotation>,
    target: Vec<String>,
    body: Vec<LinkingBody>,
    stamp: &Stamp,
) -> LinkingAnnotation {
    match existing {
        Some(existing) => {
            let mut updated = existing.clone();
            updated.target = target;
            updated.body = body;
            if updated.creator.is_none() {
                updated.creator = stamp.creator.clone();
            }
            if updated.created.is_none() {
                updated.created = Some(stamp.now.clone());
            }
            updated.modified = Some(stamp.now.clone());
            updated
        }
        None => {
            let mut created =
                LinkingAnnotation::new(format!("urn:uuid:{}", Uuid::new_v4()), target).with_body(body);
            created.creator = stamp.creator.clone();
            created.created = Some(stamp.now.clone());
            created
        }
    }
}
