//! Filter value model for timeline queries.
//!
//! A filter field holds an ordered list of [`FilterValue`]s, each tagged
//! with a [`FilterModifier`]. Before compilation the list is partitioned by
//! modifier with [`FilterValues::split_by_modifier`]; every non-empty side
//! becomes exactly one membership test. No normalization happens here:
//! case handling belongs to whoever consumes the values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether a value includes or excludes matching items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterModifier {
    #[default]
    Normal,
    Not,
}

/// One filter term with its modifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterValue<T> {
    pub value: T,
    #[serde(default)]
    pub modifier: FilterModifier,
}

impl<T> FilterValue<T> {
    pub fn new(value: T, modifier: FilterModifier) -> Self {
        Self { value, modifier }
    }

    /// An including term.
    pub fn val(value: T) -> Self {
        Self::new(value, FilterModifier::Normal)
    }

    /// An excluding term.
    pub fn not_val(value: T) -> Self {
        Self::new(value, FilterModifier::Not)
    }
}

/// Values partitioned by modifier, each side in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitValues<T> {
    pub normal: Vec<T>,
    pub not: Vec<T>,
}

impl<T> Default for SplitValues<T> {
    fn default() -> Self {
        Self {
            normal: Vec::new(),
            not: Vec::new(),
        }
    }
}

/// Ordered terms for a single filter field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterValues<T>(pub Vec<FilterValue<T>>);

impl<T> Default for FilterValues<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T: Clone> FilterValues<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: FilterValue<T>) {
        self.0.push(value);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Raw values regardless of modifier, in input order.
    pub fn values(&self) -> Vec<T> {
        self.0.iter().map(|v| v.value.clone()).collect()
    }

    /// Partition the terms into `{normal, not}`, preserving relative order.
    pub fn split_by_modifier(&self) -> SplitValues<T> {
        let mut split = SplitValues::default();
        for term in &self.0 {
            match term.modifier {
                FilterModifier::Normal => split.normal.push(term.value.clone()),
                FilterModifier::Not => split.not.push(term.value.clone()),
            }
        }
        split
    }
}

impl<T> FromIterator<FilterValue<T>> for FilterValues<T> {
    fn from_iter<I: IntoIterator<Item = FilterValue<T>>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Closed time window; both bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from <= at && at <= self.to
    }

    /// True when `[start, end]` shares at least one instant with this window.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        end >= self.from && start <= self.to
    }
}

/// A date range with its include/exclude modifier.
pub type DateRangeTerm = FilterValue<DateRange>;

/// The full filter set accepted by the evidence and finding listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineFilters {
    /// Free-text terms, each one narrows the result further.
    pub text: Vec<String>,
    /// Substrings that must all appear in one metadata body.
    pub metadata: Vec<String>,
    pub uuid: FilterValues<Uuid>,
    /// Operator (user) slugs.
    pub operator: FilterValues<String>,
    /// Tag names.
    pub tags: FilterValues<String>,
    pub content_type: FilterValues<String>,
    pub date_ranges: FilterValues<DateRange>,
    /// For findings: UUIDs of evidence the finding must (not) contain.
    pub with_evidence_uuid: FilterValues<Uuid>,
    /// `Some(true)` keeps evidence linked to a finding, `Some(false)` the rest.
    pub linked: Option<bool>,
    pub sort_asc: bool,
}

impl TimelineFilters {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_split_empty() {
        let values: FilterValues<String> = FilterValues::new();
        let split = values.split_by_modifier();
        assert!(split.normal.is_empty());
        assert!(split.not.is_empty());
    }

    #[test]
    fn test_split_normal_and_not() {
        let values: FilterValues<String> = vec![
            FilterValue::val("a".to_string()),
            FilterValue::not_val("b".to_string()),
        ]
        .into_iter()
        .collect();

        let split = values.split_by_modifier();
        assert_eq!(split.normal, vec!["a".to_string()]);
        assert_eq!(split.not, vec!["b".to_string()]);
    }

    #[test]
    fn test_split_preserves_order_and_case() {
        let values: FilterValues<String> = vec![
            FilterValue::val("Zed".to_string()),
            FilterValue::not_val("x".to_string()),
            FilterValue::val("alpha".to_string()),
            FilterValue::not_val(" Y ".to_string()),
        ]
        .into_iter()
        .collect();

        let split = values.split_by_modifier();
        assert_eq!(split.normal, vec!["Zed".to_string(), "alpha".to_string()]);
        assert_eq!(split.not, vec!["x".to_string(), " Y ".to_string()]);
        assert_eq!(values.values().len(), 4);
    }

    #[test]
    fn test_date_range_bounds_inclusive() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let range = DateRange::new(from, to);

        assert!(range.contains(from));
        assert!(range.contains(to));
        assert!(!range.contains(to + chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_date_range_overlap() {
        let at = |d| Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap();
        let range = DateRange::new(at(10), at(20));

        assert!(range.overlaps(at(5), at(10)));
        assert!(range.overlaps(at(12), at(14)));
        assert!(range.overlaps(at(1), at(30)));
        assert!(!range.overlaps(at(1), at(9)));
        assert!(!range.overlaps(at(21), at(25)));
    }

    #[test]
    fn test_modifier_deserializes_default() {
        let term: FilterValue<String> = serde_json::from_str(r#"{"value":"x"}"#).unwrap();
        assert_eq!(term.modifier, FilterModifier::Normal);

        let term: FilterValue<String> =
            serde_json::from_str(r#"{"value":"x","modifier":"not"}"#).unwrap();
        assert_eq!(term.modifier, FilterModifier::Not);
    }
}
