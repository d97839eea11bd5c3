//! Geotag providers and normalization
//!
//! - `GeotagSource`: a place picked from Nominatim, the NeRu dataset, GAVOC or GLOBALISE
//! - `normalize`: pure reduction to the identifying place and geotagging feature
//! - `GeotagProvider`: one reqwest implementation per upstream
//! - `GeotagSearch`: concurrent, cancellable, cached search

mod normalize;
mod providers;
mod search;
mod types;

pub use normalize::{normalize, parse_wkt_point, to_search_result, wkt_point};
pub use providers::{GavocProvider, GeotagProvider, GlobaliseProvider, NeruProvider, NominatimProvider};
pub use search::{GeotagSearch, DEFAULT_PROVIDER_TIMEOUT_SECS, RESULTS_PER_PROVIDER};
pub use types::{
    GavocConcept, GavocCoordinates, GeotagError, GeotagSource, GlobaliseFeature, GlobaliseGeometry,
    GlobaliseProperties, NeruName, NeruPlace, NominatimPlace, NormalizedGeotag, ProviderKind,
    SearchFilter, SearchResult,
};
