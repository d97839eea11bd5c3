//! Provider record normalization
//!
//! Turns any [`GeotagSource`] into the `identifying` place and `geotagging`
//! feature a linking annotation stores. Pure: no I/O, no clock.

use serde_json::{Map, Value};

use super::types::{GeotagError, GeotagSource, NormalizedGeotag, SearchResult};
use crate::annotations::{FeatureProperties, Place, PlaceFeature, PointGeometry};

pub const NOMINATIM_DETAILS_URL: &str = "https://nominatim.openstreetmap.org/details.php?place_id=";
pub const GAVOC_CONCEPT_BASE: &str = "https://data.globalise.huygens.knaw.nl/gavoc/";
pub const NERU_PLACE_BASE: &str = "https://id.necessaryreunions.org/place/";

/// Fields pulled out of a provider record before building the bodies
struct Extracted {
    id: Option<String>,
    titles: Vec<Option<String>>,
    description: Option<String>,
    point: Option<(f64, f64)>,
    place: Place,
    feature_extra: Map<String, Value>,
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

/// Parse `POINT (lon lat)` / `POINT(lon lat)`
pub fn parse_wkt_point(wkt: &str) -> Option<(f64, f64)> {
    let inner = wkt
        .trim()
        .strip_prefix("POINT")?
        .trim()
        .strip_prefix('(')?
        .strip_suffix(')')?;
    let mut parts = inner.split_whitespace();
    let lon = parts.next()?.parse().ok()?;
    let lat = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((lon, lat))
}

pub fn wkt_point(lon: f64, lat: f64) -> String {
    format!("POINT({} {})", lon, lat)
}

fn check_point(lon: f64, lat: f64) -> Result<(), GeotagError> {
    let valid = lon.is_finite()
        && lat.is_finite()
        && (-180.0..=180.0).contains(&lon)
        && (-90.0..=90.0).contains(&lat);
    if valid {
        Ok(())
    } else {
        Err(GeotagError::InvalidCoordinates { lon, lat })
    }
}

fn extract(source: &GeotagSource) -> Extracted {
    match source {
        GeotagSource::Gazetteer(place) => {
            let point = match (place.lon.trim().parse::<f64>(), place.lat.trim().parse::<f64>()) {
                (Ok(lon), Ok(lat)) => Some((lon, lat)),
                _ => None,
            };
            Extracted {
                id: place.place_id.map(|id| format!("{}{}", NOMINATIM_DETAILS_URL, id)),
                titles: vec![place.display_name.clone()],
                description: place.display_name.clone(),
                point,
                place: Place::new("", ""),
                feature_extra: Map::new(),
            }
        }
        GeotagSource::NamedEntity(place) => {
            let mut extra = Map::new();
            if let Some(glob_id) = &place.glob_id {
                extra.insert("glob_id".into(), Value::String(glob_id.clone()));
            }
            if let Some(certainty) = &place.coord_certainty {
                extra.insert("coord_certainty".into(), certainty.clone());
            }

            let mut entity = Place::new("", "");
            entity.extra = extra.clone();
            if !place.classified_as.is_empty() {
                entity
                    .extra
                    .insert("classified_as".into(), Value::Array(place.classified_as.clone()));
            }
            if !place.identified_by.is_empty() {
                if let Ok(names) = serde_json::to_value(&place.identified_by) {
                    entity.extra.insert("identified_by".into(), names);
                }
            }

            Extracted {
                id: non_blank(&place.id)
                    .or_else(|| place.glob_id.as_ref().map(|g| format!("{}{}", NERU_PLACE_BASE, g))),
                titles: vec![
                    place.label.clone(),
                    place.names().next().map(str::to_owned),
                    place.glob_id.clone(),
                ],
                description: None,
                point: place.defined_by.as_deref().and_then(parse_wkt_point),
                place: entity,
                feature_extra: extra,
            }
        }
        GeotagSource::Thesaurus(concept) => {
            let mut entity = Place::new("", "");
            entity.preferred_term = Some(concept.preferred_term.clone());
            entity.category = concept.category.clone();
            entity.alternative_terms = concept.alternative_terms.clone();
            entity.uri = concept.uri.clone();

            let title = non_blank(&Some(concept.preferred_term.clone()));
            Extracted {
                id: non_blank(&concept.uri)
                    .or_else(|| concept.id.as_ref().map(|id| format!("{}{}", GAVOC_CONCEPT_BASE, id))),
                description: match (&title, non_blank(&concept.category)) {
                    (Some(title), Some(category)) => Some(format!("{} ({})", title, category)),
                    _ => None,
                },
                titles: vec![title],
                point: concept.coordinates.map(|c| (c.longitude, c.latitude)),
                place: entity,
                feature_extra: Map::new(),
            }
        }
        GeotagSource::External(feature) => Extracted {
            id: feature.id.clone(),
            titles: vec![
                feature.properties.preferred_title.clone(),
                feature.properties.title.clone(),
                feature.label.clone(),
            ],
            description: feature.properties.description.clone(),
            point: feature.geometry.map(|g| (g.coordinates[0], g.coordinates[1])),
            place: Place::new("", ""),
            feature_extra: Map::new(),
        },
    }
}

/// Normalize a provider record into the place/feature pair.
///
/// Title falls back from the provider's own title to its generic label or
/// description, and finally to the id. A missing id is synthesized as a
/// `geo:` URI from the point.
pub fn normalize(source: &GeotagSource) -> Result<NormalizedGeotag, GeotagError> {
    let extracted = extract(source);

    let (lon, lat) = extracted
        .point
        .ok_or_else(|| GeotagError::MissingCoordinates(format!("{:?} source has no point", source.kind())))?;
    check_point(lon, lat)?;

    let id = non_blank(&extracted.id).unwrap_or_else(|| format!("geo:{},{}", lat, lon));
    let description = non_blank(&extracted.description);
    let label = extracted
        .titles
        .iter()
        .find_map(non_blank)
        .or_else(|| description.clone())
        .unwrap_or_else(|| id.clone());

    let mut place = extracted.place;
    place.id = id.clone();
    place.label = label.clone();
    place.defined_by = Some(wkt_point(lon, lat));

    let feature = PlaceFeature {
        id,
        feature_type: "Feature".to_string(),
        properties: FeatureProperties {
            title: label.clone(),
            description: Some(description.unwrap_or_else(|| label.clone())),
            extra: extracted.feature_extra,
        },
        geometry: PointGeometry::new(lon, lat),
        extra: Map::new(),
    };

    Ok(NormalizedGeotag {
        label,
        coordinates: [lon, lat],
        place,
        feature,
    })
}

/// Summarize a provider record for a result list
pub fn to_search_result(source: GeotagSource) -> SearchResult {
    let extracted = extract(&source);
    let coordinates = extracted.point.map(|(lon, lat)| [lon, lat]);

    let display_name = match &source {
        GeotagSource::Thesaurus(concept) if !concept.alternative_terms.is_empty() => {
            let alternatives: Vec<&str> = concept
                .alternative_terms
                .iter()
                .take(3)
                .map(String::as_str)
                .collect();
            format!("{} ({})", concept.preferred_term, alternatives.join(", "))
        }
        _ => extracted
            .titles
            .iter()
            .find_map(non_blank)
            .unwrap_or_else(|| "Unknown Location".to_string()),
    };

    let id = non_blank(&extracted.id).unwrap_or_else(|| match coordinates {
        Some([lon, lat]) => format!("geo:{},{}", lat, lon),
        None => display_name.clone(),
    });

    SearchResult {
        id,
        display_name,
        coordinates,
        source: source.kind(),
        original: source,
    }
}
