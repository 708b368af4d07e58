//! Tag reconciliation between two operations' catalogs.
//!
//! Tags are matched by normalized name (trimmed, lowercased), not by id.
//! The diff is directional: it answers which source tags survive a move to
//! the destination. Destination-only tags never appear in the result.

use std::collections::{BTreeMap, HashSet};

use crate::models::{Tag, TagDifference, TagPair};

/// Reconciliation identity of a tag name.
pub fn normalize_tag_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Index tags by normalized name; a later duplicate replaces an earlier one.
fn index_by_name(tags: &[Tag]) -> BTreeMap<String, &Tag> {
    let mut index = BTreeMap::new();
    for tag in tags {
        index.insert(normalize_tag_name(&tag.name), tag);
    }
    index
}

/// Match `source` tags against `destination` tags by normalized name.
///
/// Output is ordered by normalized name.
pub fn diff(source: &[Tag], destination: &[Tag]) -> TagDifference {
    let destination = index_by_name(destination);
    let mut difference = TagDifference::default();

    for (name, source_tag) in index_by_name(source) {
        match destination.get(&name) {
            Some(destination_tag) => difference.included.push(TagPair {
                source: source_tag.clone(),
                destination: (*destination_tag).clone(),
            }),
            None => difference.excluded.push(source_tag.clone()),
        }
    }
    difference
}

/// [`diff`] restricted to the source tags attached to one evidence item.
///
/// Pairs keep their destination tag, which is the id to re-attach under.
pub fn diff_for_evidence(
    source: &[Tag],
    destination: &[Tag],
    evidence_tag_ids: &[i64],
) -> TagDifference {
    let attached: HashSet<i64> = evidence_tag_ids.iter().copied().collect();
    let full = diff(source, destination);

    TagDifference {
        included: full
            .included
            .into_iter()
            .filter(|pair| attached.contains(&pair.source.id))
            .collect(),
        excluded: full
            .excluded
            .into_iter()
            .filter(|tag| attached.contains(&tag.id))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(id: i64, operation_id: i64, name: &str) -> Tag {
        Tag {
            id,
            operation_id,
            name: name.to_string(),
            color_name: "blue".to_string(),
        }
    }

    #[test]
    fn test_normalize_tag_name() {
        assert_eq!(normalize_tag_name("  Home "), "home");
        assert_eq!(normalize_tag_name("WEB"), "web");
        assert_eq!(normalize_tag_name(""), "");
    }

    #[test]
    fn test_diff_is_directional() {
        let src = vec![tag(1, 1, "A"), tag(2, 1, "B")];
        let dst = vec![tag(10, 2, "B"), tag(11, 2, "C")];

        let d = diff(&src, &dst);
        assert_eq!(d.included.len(), 1);
        assert_eq!(d.included[0].source.id, 2);
        assert_eq!(d.included[0].destination.id, 10);
        assert_eq!(d.excluded, vec![tag(1, 1, "A")]);

        let mentions_c = d.included.iter().any(|p| p.destination.name == "C")
            || d.excluded.iter().any(|t| t.name == "C");
        assert!(!mentions_c);
    }

    #[test]
    fn test_diff_normalizes_case_and_whitespace() {
        let src = vec![tag(1, 1, "Home")];
        let dst = vec![tag(10, 2, " home ")];

        let d = diff(&src, &dst);
        assert_eq!(d.included.len(), 1);
        assert!(d.excluded.is_empty());
    }

    #[test]
    fn test_diff_last_write_wins_on_duplicates() {
        let src = vec![tag(1, 1, "web"), tag(2, 1, "WEB")];
        let dst = vec![tag(10, 2, "Web"), tag(11, 2, "web ")];

        let d = diff(&src, &dst);
        assert_eq!(d.included.len(), 1);
        assert_eq!(d.included[0].source.id, 2);
        assert_eq!(d.included[0].destination.id, 11);
    }

    #[test]
    fn test_diff_ordered_by_name() {
        let src = vec![tag(1, 1, "zeta"), tag(2, 1, "alpha"), tag(3, 1, "Mid")];
        let d = diff(&src, &[]);
        let names: Vec<&str> = d.excluded.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "Mid", "zeta"]);
    }

    #[test]
    fn test_diff_empty_inputs() {
        assert_eq!(diff(&[], &[]), TagDifference::default());
        assert_eq!(diff(&[], &[tag(1, 2, "x")]), TagDifference::default());
    }

    #[test]
    fn test_diff_for_evidence_intersects_attached_tags() {
        let src = vec![tag(1, 1, "A"), tag(2, 1, "B"), tag(3, 1, "C"), tag(4, 1, "D")];
        let dst = vec![tag(10, 2, "B"), tag(11, 2, "C")];

        // Evidence carries B and D only.
        let d = diff_for_evidence(&src, &dst, &[2, 4]);
        assert_eq!(d.included.len(), 1);
        assert_eq!(d.included[0].source.id, 2);
        assert_eq!(d.included[0].destination.id, 10);
        assert_eq!(d.excluded, vec![tag(4, 1, "D")]);

        let full = diff(&src, &dst);
        for pair in &d.included {
            assert!(full.included.contains(pair));
        }
    }

    #[test]
    fn test_diff_for_evidence_without_tags() {
        let src = vec![tag(1, 1, "A")];
        let dst = vec![tag(10, 2, "A")];
        assert_eq!(diff_for_evidence(&src, &dst, &[]), TagDifference::default());
    }
}
