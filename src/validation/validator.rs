//! Membership validator

use std::collections::HashSet;

use super::types::{ConflictType, MembershipConflict, MergeCandidate, ValidationResult};
use crate::annotations::LinkingAnnotation;
use crate::cache::GlobalLinkingCache;

/// Checks candidate ids against a set of known linking annotations
pub struct LinkingValidator<'a> {
    linking: Vec<&'a LinkingAnnotation>,
}

impl<'a> LinkingValidator<'a> {
    /// Build over one or more sources; duplicates by id keep the first seen
    pub fn new(sources: impl IntoIterator<Item = &'a LinkingAnnotation>) -> Self {
        let mut seen = HashSet::new();
        let linking = sources
            .into_iter()
            .filter(|l| seen.insert(l.id.as_str()))
            .collect();
        Self { linking }
    }

    /// Report conflicts and merge opportunities for `candidates`.
    ///
    /// The relationship identified by `exclude` (the one being edited) is
    /// never reported.
    pub fn validate(&self, candidates: &[String], exclude: Option<&str>) -> ValidationResult {
        let mut seen = HashSet::new();
        let candidates: Vec<&str> = candidates
            .iter()
            .map(String::as_str)
            .filter(|id| !id.is_empty() && seen.insert(*id))
            .collect();

        let mut conflicts = Vec::new();
        let mut mergeable = Vec::new();

        for candidate in &candidates {
            for linking in &self.linking {
                if !linking.contains_target(candidate) || is_excluded(&linking.id, exclude) {
                    continue;
                }

                let shares_members = linking.target.iter().any(|t| t != candidate);
                let carries_content = linking.has_geotag() || linking.has_point();

                if !shares_members && carries_content {
                    mergeable.push(MergeCandidate {
                        annotation_id: candidate.to_string(),
                        existing_linking_id: linking.id.clone(),
                        existing_content: linking.content_kinds(),
                        reason: merge_reason(linking, candidates.len()),
                    });
                } else {
                    conflicts.push(MembershipConflict {
                        annotation_id: candidate.to_string(),
                        existing_linking_id: linking.id.clone(),
                        conflict_type: ConflictType::Linking,
                    });
                }
            }
        }

        let mut warnings = Vec::new();
        if !mergeable.is_empty() {
            let count = mergeable
                .iter()
                .map(|m| m.existing_linking_id.as_str())
                .collect::<HashSet<_>>()
                .len();
            warnings.push(format!(
                "Found {} existing linking annotation(s) that can be merged with this one.",
                count
            ));
        }

        ValidationResult {
            is_valid: conflicts.is_empty(),
            conflicts,
            warnings,
            mergeable,
        }
    }
}

/// Exact id, or the id as the last path segment of a full IRI
fn is_excluded(linking_id: &str, exclude: Option<&str>) -> bool {
    match exclude {
        Some(excluded) if !excluded.is_empty() => {
            linking_id == excluded
                || linking_id
                    .strip_suffix(excluded)
                    .is_some_and(|prefix| prefix.ends_with('/'))
        }
        _ => false,
    }
}

fn merge_reason(linking: &LinkingAnnotation, candidate_count: usize) -> String {
    let mut additions = Vec::new();
    if candidate_count > 1 {
        additions.push("would add linking");
    }
    if !linking.has_geotag() {
        additions.push("could add geotagging");
    }
    if !linking.has_point() {
        additions.push("could add point selection");
    }

    if additions.is_empty() {
        "Can merge: existing content folds into this relationship".to_string()
    } else {
        format!("Can merge: {}", additions.join(", "))
    }
}

/// Validate against the global cache, plus any linking annotations the
/// caller already holds (a canvas view, for instance)
pub fn validate_against_cache(
    cache: &GlobalLinkingCache,
    candidates: &[String],
    exclude: Option<&str>,
    also_known: &[LinkingAnnotation],
) -> ValidationResult {
    let snapshot = cache.snapshot();
    let validator = LinkingValidator::new(snapshot.annotations().iter().chain(also_known.iter()));
    let mut result = validator.validate(candidates, exclude);

    if let Some(entry) = snapshot.entry.as_ref().filter(|e| e.has_more) {
        result.warnings.push(format!(
            "Validated against a partially loaded relationship cache ({} of {}).",
            entry.data.len(),
            entry.total_count
        ));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::{LinkingBody, PointSelector, SelectingBody};
    use serde_json::Map;

    fn linking(id: &str, target: &[&str]) -> LinkingAnnotation {
        LinkingAnnotation::new(id, target.iter().map(|t| t.to_string()).collect())
    }

    fn pinned(id: &str, member: &str) -> LinkingAnnotation {
        linking(id, &[member]).with_body(vec![LinkingBody::Selecting(SelectingBody {
            body_type: "SpecificResource".into(),
            source: "canvas-1".into(),
            selector: PointSelector::new(5.0, 6.0),
            creator: None,
            created: None,
            extra: Map::new(),
        })])
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_unrelated_candidates_are_valid() {
        let existing = vec![linking("L1", &["a", "b"])];
        let result = LinkingValidator::new(&existing).validate(&ids(&["c", "d"]), None);
        assert!(result.is_valid);
        assert!(result.conflicts.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_member_of_other_group_conflicts() {
        let existing = vec![linking("L1", &["a", "b"])];
        let result = LinkingValidator::new(&existing).validate(&ids(&["a", "c"]), None);
        assert!(!result.is_valid);
        assert_eq!(
            result.conflicts,
            vec![MembershipConflict {
                annotation_id: "a".into(),
                existing_linking_id: "L1".into(),
                conflict_type: ConflictType::Linking,
            }]
        );
    }

    #[test]
    fn test_excluded_relationship_is_ignored() {
        let existing = vec![linking("https://repo.example/w3c/c/L1", &["a", "b"])];
        let validator = LinkingValidator::new(&existing);

        assert!(validator.validate(&ids(&["a", "c"]), Some("L1")).is_valid);
        assert!(validator.validate(&ids(&["a", "c"]), Some("https://repo.example/w3c/c/L1")).is_valid);
        assert!(!validator.validate(&ids(&["a", "c"]), Some("1")).is_valid);
    }

    #[test]
    fn test_lone_point_is_mergeable() {
        let existing = vec![pinned("L2", "a")];
        let result = LinkingValidator::new(&existing).validate(&ids(&["a", "b"]), None);

        assert!(result.is_valid);
        assert_eq!(result.mergeable.len(), 1);
        let merge = &result.mergeable[0];
        assert_eq!(merge.existing_linking_id, "L2");
        assert_eq!(merge.existing_content, vec![crate::annotations::ContentKind::PointSelection]);
        assert_eq!(merge.reason, "Can merge: would add linking, could add geotagging");
        assert_eq!(
            result.warnings,
            vec!["Found 1 existing linking annotation(s) that can be merged with this one.".to_string()]
        );
    }

    #[test]
    fn test_single_member_without_content_conflicts() {
        let existing = vec![linking("L3", &["a"])];
        let result = LinkingValidator::new(&existing).validate(&ids(&["a", "b"]), None);
        assert_eq!(result.conflicts.len(), 1);
        assert!(result.mergeable.is_empty());
    }

    #[test]
    fn test_duplicates_across_sources_reported_once() {
        let cached = vec![linking("L1", &["a", "b"])];
        let loaded = vec![linking("L1", &["a", "b"])];
        let validator = LinkingValidator::new(cached.iter().chain(loaded.iter()));
        let result = validator.validate(&ids(&["a", "a", "c"]), None);
        assert_eq!(result.conflicts.len(), 1);
    }
}
