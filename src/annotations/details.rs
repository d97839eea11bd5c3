//! Display details for the relationship an annotation belongs to

use serde::Serialize;

use super::types::LinkingAnnotation;

/// Resolved view of one relationship from the point of view of a member
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkingDetails {
    pub linking_id: String,
    /// Every member in reading order
    pub reading_order: Vec<String>,
    /// Members other than the one asked about, in reading order
    pub linked_annotations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geotag: Option<GeotagSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point: Option<PointSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeotagSummary {
    pub label: String,
    /// `[lon, lat]`
    pub coordinates: [f64; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointSummary {
    pub canvas: String,
    pub x: f64,
    pub y: f64,
}

impl LinkingDetails {
    pub fn resolve(annotation: &LinkingAnnotation, annotation_id: &str) -> Self {
        let geotag = annotation.geotag().map(|body| {
            let label = annotation
                .place()
                .map(|place| place.source.label.clone())
                .unwrap_or_else(|| body.source.properties.title.clone());
            GeotagSummary {
                label,
                coordinates: body.source.geometry.coordinates,
            }
        });

        let point = annotation.point().map(|body| PointSummary {
            canvas: body.source.clone(),
            x: body.selector.x,
            y: body.selector.y,
        });

        Self {
            linking_id: annotation.id.clone(),
            reading_order: annotation.target.clone(),
            linked_annotations: annotation
                .target
                .iter()
                .filter(|id| id.as_str() != annotation_id)
                .cloned()
                .collect(),
            geotag,
            point,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_details_exclude_requesting_member() {
        let annotation: LinkingAnnotation = serde_json::from_value(json!({
            "id": "L1",
            "target": ["a", "b", "c"],
            "body": [
                {
                    "type": "SpecificResource",
                    "purpose": "identifying",
                    "source": { "id": "p1", "type": "Place", "label": "Batavia", "defined_by": "POINT(106.8 -6.1)" }
                },
                {
                    "type": "SpecificResource",
                    "purpose": "geotagging",
                    "source": {
                        "id": "p1",
                        "type": "Feature",
                        "properties": { "title": "Batavia (city)" },
                        "geometry": { "type": "Point", "coordinates": [106.8, -6.1] }
                    }
                }
            ]
        }))
        .unwrap();

        let details = LinkingDetails::resolve(&annotation, "b");
        assert_eq!(details.linked_annotations, vec!["a", "c"]);
        assert_eq!(details.reading_order, vec!["a", "b", "c"]);
        let geotag = details.geotag.unwrap();
        assert_eq!(geotag.label, "Batavia");
        assert_eq!(geotag.coordinates, [106.8, -6.1]);
        assert!(details.point.is_none());
    }
}
