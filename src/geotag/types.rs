//! Geotag provider types
//!
//! Raw search hits as each provider returns them, the tagged union the rest
//! of the crate works with, and the normalized place reference.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::annotations::{Place, PlaceFeature};

/// Errors raised while searching or normalizing geotags
#[derive(Debug, Error)]
pub enum GeotagError {
    /// The provider could not be reached or answered with an error
    #[error("Provider error: {0}")]
    Provider(String),

    /// The source has no usable point
    #[error("Missing coordinates: {0}")]
    MissingCoordinates(String),

    /// Coordinates outside WGS84 bounds or not finite
    #[error("Invalid coordinates: lon {lon}, lat {lat}")]
    InvalidCoordinates { lon: f64, lat: f64 },

    /// A newer search started before this one finished
    #[error("Search superseded by a newer query")]
    Superseded,
}

impl From<reqwest::Error> for GeotagError {
    fn from(err: reqwest::Error) -> Self {
        GeotagError::Provider(err.to_string())
    }
}

/// Which provider a hit came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProviderKind {
    /// OpenStreetMap Nominatim
    Gazetteer,
    /// NeRu place dataset
    NamedEntity,
    /// GAVOC historical atlas thesaurus
    Thesaurus,
    /// GLOBALISE place features
    External,
}

impl ProviderKind {
    /// Result ordering: curated project data first, OSM last
    pub fn priority(&self) -> u8 {
        match self {
            ProviderKind::NamedEntity => 0,
            ProviderKind::External => 1,
            ProviderKind::Thesaurus => 2,
            ProviderKind::Gazetteer => 3,
        }
    }

    /// Accepts the kind names and the provider names (`nominatim`, `neru`, ...)
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "gazetteer" | "nominatim" => Some(ProviderKind::Gazetteer),
            "namedentity" | "named_entity" | "neru" => Some(ProviderKind::NamedEntity),
            "thesaurus" | "gavoc" => Some(ProviderKind::Thesaurus),
            "external" | "globalise" => Some(ProviderKind::External),
            _ => None,
        }
    }
}

/// Which providers a search should consult
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SearchFilter {
    #[default]
    All,
    Only(ProviderKind),
}

impl SearchFilter {
    pub fn parse(value: Option<&str>) -> Option<Self> {
        match value.map(str::trim) {
            None | Some("") | Some("all") | Some("both") => Some(SearchFilter::All),
            Some(other) => ProviderKind::parse(other).map(SearchFilter::Only),
        }
    }

    pub fn includes(&self, kind: ProviderKind) -> bool {
        match self {
            SearchFilter::All => true,
            SearchFilter::Only(only) => *only == kind,
        }
    }
}

// ============================================================================
// Raw provider records
// ============================================================================

/// Nominatim search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NominatimPlace {
    #[serde(default)]
    pub place_id: Option<u64>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub osm_type: Option<String>,
    #[serde(default)]
    pub osm_id: Option<u64>,
    /// Decimal degrees as a string
    pub lat: String,
    pub lon: String,
}

/// NeRu place (Linked Art shaped)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeruPlace {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "_label", default)]
    pub label: Option<String>,
    #[serde(default)]
    pub glob_id: Option<String>,
    #[serde(default)]
    pub classified_as: Vec<Value>,
    #[serde(default)]
    pub identified_by: Vec<NeruName>,
    /// WKT, `POINT (lon lat)`
    #[serde(default)]
    pub defined_by: Option<String>,
    #[serde(default)]
    pub coord_certainty: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeruName {
    #[serde(rename = "type", default)]
    pub name_type: String,
    #[serde(default)]
    pub content: String,
}

impl NeruPlace {
    /// Alternative names (`identified_by` entries of type `Name`)
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.identified_by
            .iter()
            .filter(|n| n.name_type == "Name")
            .map(|n| n.content.as_str())
    }

    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.label
            .as_deref()
            .is_some_and(|l| l.to_lowercase().contains(&query))
            || self.names().any(|n| n.to_lowercase().contains(&query))
    }
}

/// GAVOC thesaurus concept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GavocConcept {
    #[serde(default)]
    pub id: Option<String>,
    pub preferred_term: String,
    #[serde(default)]
    pub alternative_terms: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub coordinates: Option<GavocCoordinates>,
    #[serde(default)]
    pub uri: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GavocCoordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// GLOBALISE place feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobaliseFeature {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub geometry: Option<GlobaliseGeometry>,
    #[serde(default)]
    pub properties: GlobaliseProperties,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlobaliseGeometry {
    /// `[lon, lat]`
    pub coordinates: [f64; 2],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobaliseProperties {
    #[serde(default)]
    pub preferred_title: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub alternative_names: Vec<String>,
    #[serde(rename = "type", default)]
    pub place_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

// ============================================================================
// Tagged union
// ============================================================================

/// A place picked from one of the providers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum GeotagSource {
    Gazetteer(NominatimPlace),
    NamedEntity(NeruPlace),
    Thesaurus(GavocConcept),
    External(GlobaliseFeature),
}

impl GeotagSource {
    pub fn kind(&self) -> ProviderKind {
        match self {
            GeotagSource::Gazetteer(_) => ProviderKind::Gazetteer,
            GeotagSource::NamedEntity(_) => ProviderKind::NamedEntity,
            GeotagSource::Thesaurus(_) => ProviderKind::Thesaurus,
            GeotagSource::External(_) => ProviderKind::External,
        }
    }
}

/// A provider hit as shown in a result list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: String,
    pub display_name: String,
    /// `[lon, lat]`, when the provider had a point
    pub coordinates: Option<[f64; 2]>,
    pub source: ProviderKind,
    pub original: GeotagSource,
}

/// A provider record reduced to the two bodies a linking annotation stores
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedGeotag {
    pub label: String,
    /// `[lon, lat]`
    pub coordinates: [f64; 2],
    pub place: Place,
    pub feature: PlaceFeature,
}
