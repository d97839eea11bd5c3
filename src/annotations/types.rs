//! Annotation types following the W3C Web Annotation data model
//!
//! Content annotations are owned by the store and passed through mostly
//! untouched. Linking annotations are the relationship entity managed by this
//! crate: an ordered group of content annotation ids plus at most one place
//! tag and one point.
//!
//! Reference: <https://www.w3.org/TR/annotation-model/>

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// JSON-LD context written on every linking annotation
pub const ANNOTATION_CONTEXT: &str = "http://www.w3.org/ns/anno.jsonld";

/// Motivation shared by all linking annotations
pub const LINKING_MOTIVATION: &str = "linking";

pub const PURPOSE_IDENTIFYING: &str = "identifying";
pub const PURPOSE_GEOTAGGING: &str = "geotagging";
pub const PURPOSE_SELECTING: &str = "selecting";

fn default_annotation_type() -> String {
    "Annotation".to_string()
}

fn default_linking_motivation() -> String {
    LINKING_MOTIVATION.to_string()
}

fn default_specific_resource() -> String {
    "SpecificResource".to_string()
}

/// Accept either a single value or an array and always yield a vector.
///
/// AnnoRepo returns `target` and `body` in both shapes depending on how the
/// annotation was first written.
pub(crate) fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        Null(()),
        One(T),
    }

    Ok(match OneOrMany::<T>::deserialize(deserializer)? {
        OneOrMany::Many(items) => items,
        OneOrMany::Null(()) => Vec::new(),
        OneOrMany::One(item) => vec![item],
    })
}

// ============================================================================
// Content annotations
// ============================================================================

/// A text or icon region on a canvas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentAnnotation {
    pub id: String,
    #[serde(rename = "type", default = "default_annotation_type")]
    pub annotation_type: String,
    /// `textspotting`, `iconography`, ...
    #[serde(default)]
    pub motivation: String,
    /// Typed bodies, passed through verbatim
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub body: Vec<Value>,
    pub target: ContentTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
}

impl ContentAnnotation {
    /// The canvas this annotation is drawn on
    pub fn canvas_id(&self) -> Option<&str> {
        self.target.source_id()
    }

    /// Version stamp used when no ETag is available
    pub fn version_stamp(&self) -> Option<&str> {
        self.modified.as_deref().or(self.created.as_deref())
    }

    /// First textual body value, if any
    pub fn text(&self) -> Option<&str> {
        self.body
            .iter()
            .find_map(|body| body.get("value").and_then(Value::as_str))
    }
}

/// The target of a content annotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentTarget {
    /// Bare canvas IRI
    Iri(String),
    /// Canvas plus selector
    Specific(SpecificTarget),
}

impl ContentTarget {
    pub fn source_id(&self) -> Option<&str> {
        match self {
            ContentTarget::Iri(iri) => Some(iri),
            ContentTarget::Specific(target) => target.source.id(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecificTarget {
    pub source: SourceRef,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Value>,
}

/// A canvas reference, either an IRI or an embedded object with an `id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceRef {
    Iri(String),
    Object(Map<String, Value>),
}

impl SourceRef {
    pub fn id(&self) -> Option<&str> {
        match self {
            SourceRef::Iri(iri) => Some(iri),
            SourceRef::Object(map) => map.get("id").and_then(Value::as_str),
        }
    }
}

// ============================================================================
// Linking annotations
// ============================================================================

/// Who wrote a linking annotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creator {
    pub id: String,
    #[serde(rename = "type", default = "default_creator_type")]
    pub creator_type: String,
    pub label: String,
}

fn default_creator_type() -> String {
    "Person".to_string()
}

impl Creator {
    pub fn person(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            creator_type: default_creator_type(),
            label: label.into(),
        }
    }
}

/// A relationship between content annotations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkingAnnotation {
    #[serde(rename = "@context", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub id: String,
    #[serde(rename = "type", default = "default_annotation_type")]
    pub annotation_type: String,
    #[serde(default = "default_linking_motivation")]
    pub motivation: String,
    /// Member ids in canonical reading order
    #[serde(deserialize_with = "one_or_many")]
    pub target: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub body: Vec<LinkingBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<Creator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
}

impl LinkingAnnotation {
    /// An empty linking annotation with the given id and members
    pub fn new(id: impl Into<String>, target: Vec<String>) -> Self {
        Self {
            context: Some(ANNOTATION_CONTEXT.to_string()),
            id: id.into(),
            annotation_type: default_annotation_type(),
            motivation: default_linking_motivation(),
            target,
            body: Vec::new(),
            creator: None,
            created: None,
            modified: None,
        }
    }

    pub fn with_body(mut self, body: Vec<LinkingBody>) -> Self {
        self.body = body;
        self
    }

    pub fn contains_target(&self, id: &str) -> bool {
        self.target.iter().any(|t| t == id)
    }

    pub fn has_purpose(&self, purpose: &str) -> bool {
        self.body.iter().any(|b| b.purpose() == Some(purpose))
    }

    pub fn has_geotag(&self) -> bool {
        self.has_purpose(PURPOSE_GEOTAGGING)
    }

    pub fn has_point(&self) -> bool {
        self.has_purpose(PURPOSE_SELECTING)
    }

    /// Single-member relationships are only meaningful with a tag or a point
    pub fn is_well_formed(&self) -> bool {
        match self.target.len() {
            0 => false,
            1 => self.has_geotag() || self.has_point(),
            _ => true,
        }
    }

    pub fn geotag(&self) -> Option<&GeotaggingBody> {
        self.body.iter().find_map(|b| match b {
            LinkingBody::Geotagging(body) => Some(body),
            _ => None,
        })
    }

    pub fn place(&self) -> Option<&IdentifyingBody> {
        self.body.iter().find_map(|b| match b {
            LinkingBody::Identifying(body) => Some(body),
            _ => None,
        })
    }

    pub fn point(&self) -> Option<&SelectingBody> {
        self.body.iter().find_map(|b| match b {
            LinkingBody::Selecting(body) => Some(body),
            _ => None,
        })
    }

    /// Whether any body entry points at the given canvas
    pub fn references_canvas(&self, canvas_id: &str) -> bool {
        self.body.iter().any(|b| b.source_iri() == Some(canvas_id))
    }

    /// Kinds of content this relationship carries
    pub fn content_kinds(&self) -> Vec<ContentKind> {
        let mut kinds = Vec::new();
        if self.target.len() > 1 {
            kinds.push(ContentKind::Linking);
        }
        if self.has_geotag() {
            kinds.push(ContentKind::Geotagging);
        }
        if self.has_point() {
            kinds.push(ContentKind::PointSelection);
        }
        kinds
    }

    /// Icon state for every member of this relationship
    pub fn icon_states(&self) -> HashMap<String, IconState> {
        let state = IconState {
            has_geotag: self.has_geotag(),
            has_point: self.has_point(),
            is_linked: true,
        };
        self.target.iter().map(|id| (id.clone(), state)).collect()
    }
}

/// Kinds of content a linking annotation may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Linking,
    Geotagging,
    PointSelection,
}

/// Derived per-content-annotation display state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IconState {
    pub has_geotag: bool,
    pub has_point: bool,
    pub is_linked: bool,
}

impl IconState {
    /// Key-wise OR of two states for the same id
    pub fn merge(self, other: IconState) -> IconState {
        IconState {
            has_geotag: self.has_geotag || other.has_geotag,
            has_point: self.has_point || other.has_point,
            is_linked: self.is_linked || other.is_linked,
        }
    }
}

/// Icon states for a set of linking annotations
pub fn icon_states<'a>(
    annotations: impl IntoIterator<Item = &'a LinkingAnnotation>,
) -> HashMap<String, IconState> {
    let mut states: HashMap<String, IconState> = HashMap::new();
    for annotation in annotations {
        for (id, state) in annotation.icon_states() {
            states
                .entry(id)
                .and_modify(|existing| *existing = existing.merge(state))
                .or_insert(state);
        }
    }
    states
}

// ============================================================================
// Linking bodies
// ============================================================================

/// One body entry of a linking annotation, discriminated by `purpose`.
///
/// Entries with an unknown purpose, or a known purpose in a shape we do not
/// model, are kept as raw JSON and written back unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkingBody {
    Identifying(IdentifyingBody),
    Geotagging(GeotaggingBody),
    Selecting(SelectingBody),
    Other(Value),
}

impl LinkingBody {
    pub fn purpose(&self) -> Option<&str> {
        match self {
            LinkingBody::Identifying(_) => Some(PURPOSE_IDENTIFYING),
            LinkingBody::Geotagging(_) => Some(PURPOSE_GEOTAGGING),
            LinkingBody::Selecting(_) => Some(PURPOSE_SELECTING),
            LinkingBody::Other(value) => value.get("purpose").and_then(Value::as_str),
        }
    }

    /// `source` when it is a plain IRI (point selections carry the canvas here)
    pub fn source_iri(&self) -> Option<&str> {
        match self {
            LinkingBody::Selecting(body) => Some(&body.source),
            LinkingBody::Other(value) => value.get("source").and_then(Value::as_str),
            _ => None,
        }
    }
}

fn decode_or_raw<T: DeserializeOwned>(value: Value, wrap: fn(T) -> LinkingBody) -> LinkingBody {
    let mut fields = value.clone();
    if let Some(map) = fields.as_object_mut() {
        map.remove("purpose");
    }
    match serde_json::from_value::<T>(fields) {
        Ok(body) => wrap(body),
        Err(_) => LinkingBody::Other(value),
    }
}

impl<'de> Deserialize<'de> for LinkingBody {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let purpose = value.get("purpose").and_then(Value::as_str).map(str::to_owned);
        Ok(match purpose.as_deref() {
            Some(PURPOSE_IDENTIFYING) => decode_or_raw(value, LinkingBody::Identifying),
            Some(PURPOSE_GEOTAGGING) => decode_or_raw(value, LinkingBody::Geotagging),
            Some(PURPOSE_SELECTING) => decode_or_raw(value, LinkingBody::Selecting),
            _ => LinkingBody::Other(value),
        })
    }
}

impl Serialize for LinkingBody {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        #[derive(Serialize)]
        struct Tagged<'a, T: Serialize> {
            purpose: &'static str,
            #[serde(flatten)]
            body: &'a T,
        }

        match self {
            LinkingBody::Identifying(body) => Tagged {
                purpose: PURPOSE_IDENTIFYING,
                body,
            }
            .serialize(serializer),
            LinkingBody::Geotagging(body) => Tagged {
                purpose: PURPOSE_GEOTAGGING,
                body,
            }
            .serialize(serializer),
            LinkingBody::Selecting(body) => Tagged {
                purpose: PURPOSE_SELECTING,
                body,
            }
            .serialize(serializer),
            LinkingBody::Other(value) => value.serialize(serializer),
        }
    }
}

/// `identifying` body: the place a relationship refers to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifyingBody {
    #[serde(rename = "type", default = "default_specific_resource")]
    pub body_type: String,
    pub source: Place,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<Creator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A named place, optionally carrying thesaurus fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Place {
    pub id: String,
    #[serde(rename = "type", default = "default_place_type")]
    pub place_type: String,
    pub label: String,
    /// WKT point, `POINT(lon lat)`
    #[serde(default, rename = "defined_by", skip_serializing_if = "Option::is_none")]
    pub defined_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_term: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternative_terms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_place_type() -> String {
    "Place".to_string()
}

impl Place {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            place_type: default_place_type(),
            label: label.into(),
            defined_by: None,
            preferred_term: None,
            category: None,
            alternative_terms: Vec::new(),
            uri: None,
            extra: Map::new(),
        }
    }
}

/// `geotagging` body: a GeoJSON point feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeotaggingBody {
    #[serde(rename = "type", default = "default_specific_resource")]
    pub body_type: String,
    pub source: PlaceFeature,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<Creator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceFeature {
    pub id: String,
    #[serde(rename = "type", default = "default_feature_type")]
    pub feature_type: String,
    pub properties: FeatureProperties,
    pub geometry: PointGeometry,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_feature_type() -> String {
    "Feature".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureProperties {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// GeoJSON point; coordinates are `[lon, lat]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointGeometry {
    #[serde(rename = "type", default = "point_type", skip_deserializing)]
    pub geometry_type: PointType,
    pub coordinates: [f64; 2],
}

/// Marker for the GeoJSON `"Point"` type tag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointType {
    #[default]
    Point,
}

fn point_type() -> PointType {
    PointType::Point
}

impl PointGeometry {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self {
            geometry_type: PointType::Point,
            coordinates: [lon, lat],
        }
    }

    pub fn lon(&self) -> f64 {
        self.coordinates[0]
    }

    pub fn lat(&self) -> f64 {
        self.coordinates[1]
    }
}

/// `selecting` body: a point pinned on a canvas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectingBody {
    #[serde(rename = "type", default = "default_specific_resource")]
    pub body_type: String,
    /// Canvas IRI
    pub source: String,
    pub selector: PointSelector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<Creator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointSelector {
    #[serde(rename = "type", default = "point_selector_type", skip_deserializing)]
    pub selector_type: PointSelectorType,
    #[serde(serialize_with = "serialize_pixel")]
    pub x: f64,
    #[serde(serialize_with = "serialize_pixel")]
    pub y: f64,
}

/// Whole pixel values are written as integers
fn serialize_pixel<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointSelectorType {
    #[default]
    PointSelector,
}

fn point_selector_type() -> PointSelectorType {
    PointSelectorType::PointSelector
}

impl PointSelector {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            selector_type: PointSelectorType::PointSelector,
            x,
            y,
        }
    }
}
