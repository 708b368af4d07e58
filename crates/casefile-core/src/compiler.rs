//! Compiles [`TimelineFilters`] into a [`Predicate`] for evidence or findings.
//!
//! Each entity has a fixed, ordered catalog of filterable fields. Fields are
//! visited in catalog order and their clauses ANDed, so the same filter set
//! always produces the same tree with the same value order. For a field
//! with terms, the Normal values become one `IN` clause and the Not values
//! one `NOT IN` clause; both can be present at once.
//!
//! Date ranges are the exception to "one clause per modifier": Normal ranges
//! OR together, Not ranges AND together.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::filter::{DateRange, FilterValues, TimelineFilters};
use crate::predicate::{Aggregate, CompareOp, Having, Join, Predicate, Subquery, Value};
use crate::schema::{
    evidence, evidence_finding_map, evidence_metadata, findings, tag_evidence_map, tags, users,
    Column, Table,
};

/// Strategy for tag membership tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagMatch {
    /// Item carries at least one of the listed tags.
    #[default]
    Any,
    /// Item carries every listed tag.
    All,
}

/// Entity a listing query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Evidence,
    Finding,
}

/// A filterable field of [`TimelineFilters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterField {
    Uuid,
    Text,
    Metadata,
    DateRange,
    Operator,
    Tag,
    ContentType,
    Linked,
    WithEvidence,
}

impl FilterField {
    pub const ALL: [FilterField; 9] = [
        FilterField::Uuid,
        FilterField::Text,
        FilterField::Metadata,
        FilterField::DateRange,
        FilterField::Operator,
        FilterField::Tag,
        FilterField::ContentType,
        FilterField::Linked,
        FilterField::WithEvidence,
    ];

    /// Query key the field is parsed from.
    pub fn name(&self) -> &'static str {
        match self {
            FilterField::Uuid => "uuid",
            FilterField::Text => "text",
            FilterField::Metadata => "meta",
            FilterField::DateRange => "range",
            FilterField::Operator => "operator",
            FilterField::Tag => "tag",
            FilterField::ContentType => "type",
            FilterField::Linked => "linked",
            FilterField::WithEvidence => "with-evidence",
        }
    }

    fn is_set(&self, filters: &TimelineFilters) -> bool {
        match self {
            FilterField::Uuid => !filters.uuid.is_empty(),
            FilterField::Text => !filters.text.is_empty(),
            FilterField::Metadata => !filters.metadata.is_empty(),
            FilterField::DateRange => !filters.date_ranges.is_empty(),
            FilterField::Operator => !filters.operator.is_empty(),
            FilterField::Tag => !filters.tags.is_empty(),
            FilterField::ContentType => !filters.content_type.is_empty(),
            FilterField::Linked => filters.linked.is_some(),
            FilterField::WithEvidence => !filters.with_evidence_uuid.is_empty(),
        }
    }
}

const EVIDENCE_FIELDS: &[FilterField] = &[
    FilterField::Uuid,
    FilterField::Text,
    FilterField::Metadata,
    FilterField::DateRange,
    FilterField::Operator,
    FilterField::Tag,
    FilterField::ContentType,
    FilterField::Linked,
];

const FINDING_FIELDS: &[FilterField] = &[
    FilterField::Uuid,
    FilterField::Tag,
    FilterField::Text,
    FilterField::DateRange,
    FilterField::Operator,
    FilterField::WithEvidence,
];

impl Entity {
    /// Registered fields in compilation order.
    pub fn catalog(&self) -> &'static [FilterField] {
        match self {
            Entity::Evidence => EVIDENCE_FIELDS,
            Entity::Finding => FINDING_FIELDS,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Entity::Evidence => "evidence",
            Entity::Finding => "findings",
        }
    }
}

/// Fields with terms in `filters` that `entity` has no where-builder for.
pub fn unsupported_fields(entity: Entity, filters: &TimelineFilters) -> Vec<FilterField> {
    FilterField::ALL
        .into_iter()
        .filter(|f| f.is_set(filters) && !entity.catalog().contains(f))
        .collect()
}

fn ensure_supported(entity: Entity, filters: &TimelineFilters) -> Result<()> {
    let unsupported = unsupported_fields(entity, filters);
    if unsupported.is_empty() {
        return Ok(());
    }
    let names: Vec<&str> = unsupported.iter().map(|f| f.name()).collect();
    Err(Error::Internal(format!(
        "no where-builder registered for {} field(s): {}",
        entity.name(),
        names.join(", ")
    )))
}

/// Append `build(true, normal)` and `build(false, not)` for the non-empty sides.
fn add_where_and_not<T, F>(clauses: &mut Vec<Predicate>, values: &FilterValues<T>, build: F)
where
    T: Clone + Into<Value>,
    F: Fn(bool, Vec<Value>) -> Predicate,
{
    let split = values.split_by_modifier();
    if !split.normal.is_empty() {
        clauses.push(build(true, split.normal.into_iter().map(Into::into).collect()));
    }
    if !split.not.is_empty() {
        clauses.push(build(false, split.not.into_iter().map(Into::into).collect()));
    }
}

/// Normal windows OR together; Not windows AND together.
fn add_date_ranges<F>(clauses: &mut Vec<Predicate>, ranges: &FilterValues<DateRange>, within: F)
where
    F: Fn(&DateRange, bool) -> Predicate,
{
    let split = ranges.split_by_modifier();
    if !split.normal.is_empty() {
        clauses.push(Predicate::or(
            split.normal.iter().map(|r| within(r, true)).collect(),
        ));
    }
    if !split.not.is_empty() {
        clauses.push(Predicate::and(
            split.not.iter().map(|r| within(r, false)).collect(),
        ));
    }
}

/// Tag-name filter shared by both entities; `All` groups and counts names.
fn tag_name_subquery(
    base: Subquery,
    group_col: Column,
    names: Vec<Value>,
    strategy: TagMatch,
) -> Subquery {
    let wanted = {
        let mut distinct = names.clone();
        distinct.sort();
        distinct.dedup();
        distinct.len() as i64
    };
    let subquery = base.filter(Predicate::InList {
        column: tags::NAME,
        values: names,
        negated: false,
    });
    match strategy {
        TagMatch::Any => subquery,
        TagMatch::All => subquery.group_by(
            group_col,
            Having::Compare {
                aggregate: Aggregate::CountDistinct(tags::NAME),
                op: CompareOp::Eq,
                value: Value::Int(wanted),
            },
        ),
    }
}

// =============================================================================
// EVIDENCE WHERE-BUILDERS
// =============================================================================

fn evidence_uuid_where(include: bool, values: Vec<Value>) -> Predicate {
    Predicate::in_list(evidence::UUID, values, include)
}

fn evidence_text_where(term: &str) -> Predicate {
    Predicate::contains(vec![evidence::DESCRIPTION], term)
}

fn evidence_metadata_where(terms: &[String]) -> Predicate {
    let bodies = terms
        .iter()
        .map(|t| Predicate::contains(vec![evidence_metadata::BODY], t.as_str()))
        .collect();
    Predicate::in_subquery(
        evidence::ID,
        Subquery::new(evidence_metadata::EVIDENCE_ID).filter(Predicate::and(bodies)),
        true,
    )
}

fn evidence_date_range_where(range: &DateRange, include: bool) -> Predicate {
    let within = Predicate::and(vec![
        Predicate::compare(evidence::OCCURRED_AT, CompareOp::GtEq, range.from),
        Predicate::compare(evidence::OCCURRED_AT, CompareOp::LtEq, range.to),
    ]);
    if include {
        within
    } else {
        Predicate::not(within)
    }
}

fn evidence_operator_where(include: bool, slugs: Vec<Value>) -> Predicate {
    Predicate::in_subquery(
        evidence::OPERATOR_ID,
        Subquery::new(users::ID).filter(Predicate::InList {
            column: users::SLUG,
            values: slugs,
            negated: false,
        }),
        include,
    )
}

fn evidence_tag_where(include: bool, names: Vec<Value>, strategy: TagMatch) -> Predicate {
    let base = Subquery::new(tag_evidence_map::EVIDENCE_ID).join(Join::left(
        Table::Tags,
        tag_evidence_map::TAG_ID,
        tags::ID,
    ));
    Predicate::in_subquery(
        evidence::ID,
        tag_name_subquery(base, tag_evidence_map::EVIDENCE_ID, names, strategy),
        include,
    )
}

fn evidence_type_where(include: bool, values: Vec<Value>) -> Predicate {
    Predicate::in_list(evidence::CONTENT_TYPE, values, include)
}

fn evidence_linked_where(linked: bool) -> Predicate {
    Predicate::in_subquery(
        evidence::ID,
        Subquery::new(evidence_finding_map::EVIDENCE_ID),
        linked,
    )
}

/// Build the WHERE predicate for listing one operation's evidence.
pub fn compile_evidence_filters(
    operation_id: i64,
    filters: &TimelineFilters,
    tag_match: TagMatch,
) -> Result<Predicate> {
    ensure_supported(Entity::Evidence, filters)?;

    let mut clauses = vec![Predicate::eq(evidence::OPERATION_ID, operation_id)];
    for field in Entity::Evidence.catalog() {
        if !field.is_set(filters) {
            continue;
        }
        match field {
            FilterField::Uuid => add_where_and_not(&mut clauses, &filters.uuid, evidence_uuid_where),
            FilterField::Text => {
                clauses.extend(filters.text.iter().map(|t| evidence_text_where(t)));
            }
            FilterField::Metadata => clauses.push(evidence_metadata_where(&filters.metadata)),
            FilterField::DateRange => {
                add_date_ranges(&mut clauses, &filters.date_ranges, evidence_date_range_where)
            }
            FilterField::Operator => {
                add_where_and_not(&mut clauses, &filters.operator, evidence_operator_where)
            }
            FilterField::Tag => add_where_and_not(&mut clauses, &filters.tags, |include, names| {
                evidence_tag_where(include, names, tag_match)
            }),
            FilterField::ContentType => {
                add_where_and_not(&mut clauses, &filters.content_type, evidence_type_where)
            }
            FilterField::Linked => {
                if let Some(linked) = filters.linked {
                    clauses.push(evidence_linked_where(linked));
                }
            }
            FilterField::WithEvidence => {}
        }
    }

    debug!(
        subsystem = "core",
        component = "compiler",
        op = "compile_evidence_filters",
        operation_id,
        clause_count = clauses.len(),
        "Compiled evidence filters"
    );
    Ok(Predicate::and(clauses))
}

// =============================================================================
// FINDING WHERE-BUILDERS
// =============================================================================

fn finding_uuid_where(include: bool, values: Vec<Value>) -> Predicate {
    Predicate::in_list(findings::UUID, values, include)
}

fn finding_tag_where(include: bool, names: Vec<Value>, strategy: TagMatch) -> Predicate {
    let base = Subquery::new(evidence_finding_map::FINDING_ID)
        .join(Join::inner(
            Table::TagEvidenceMap,
            evidence_finding_map::EVIDENCE_ID,
            tag_evidence_map::EVIDENCE_ID,
        ))
        .join(Join::left(Table::Tags, tag_evidence_map::TAG_ID, tags::ID));
    Predicate::in_subquery(
        findings::ID,
        tag_name_subquery(base, evidence_finding_map::FINDING_ID, names, strategy),
        include,
    )
}

fn finding_text_where(term: &str) -> Predicate {
    Predicate::contains(vec![findings::TITLE, findings::DESCRIPTION], term)
}

/// A finding matches a window when its evidence interval overlaps it.
fn finding_date_range_where(range: &DateRange, include: bool) -> Predicate {
    let overlapping = Subquery::new(evidence_finding_map::FINDING_ID)
        .join(Join::inner(
            Table::Evidence,
            evidence_finding_map::EVIDENCE_ID,
            evidence::ID,
        ))
        .group_by(
            evidence_finding_map::FINDING_ID,
            Having::And(vec![
                Having::Compare {
                    aggregate: Aggregate::Max(evidence::OCCURRED_AT),
                    op: CompareOp::GtEq,
                    value: range.from.into(),
                },
                Having::Compare {
                    aggregate: Aggregate::Min(evidence::OCCURRED_AT),
                    op: CompareOp::LtEq,
                    value: range.to.into(),
                },
            ]),
        );
    Predicate::in_subquery(findings::ID, overlapping, include)
}

fn finding_operator_where(include: bool, slugs: Vec<Value>) -> Predicate {
    let subquery = Subquery::new(evidence_finding_map::FINDING_ID)
        .join(Join::inner(
            Table::Evidence,
            evidence_finding_map::EVIDENCE_ID,
            evidence::ID,
        ))
        .join(Join::left(Table::Users, evidence::OPERATOR_ID, users::ID))
        .filter(Predicate::InList {
            column: users::SLUG,
            values: slugs,
            negated: false,
        });
    Predicate::in_subquery(findings::ID, subquery, include)
}

fn finding_with_evidence_where(include: bool, uuids: Vec<Value>) -> Predicate {
    let subquery = Subquery::new(evidence_finding_map::FINDING_ID)
        .join(Join::left(
            Table::Evidence,
            evidence_finding_map::EVIDENCE_ID,
            evidence::ID,
        ))
        .filter(Predicate::InList {
            column: evidence::UUID,
            values: uuids,
            negated: false,
        });
    Predicate::in_subquery(findings::ID, subquery, include)
}

/// Build the WHERE predicate for listing one operation's findings.
pub fn compile_finding_filters(
    operation_id: i64,
    filters: &TimelineFilters,
    tag_match: TagMatch,
) -> Result<Predicate> {
    ensure_supported(Entity::Finding, filters)?;

    let mut clauses = vec![Predicate::eq(findings::OPERATION_ID, operation_id)];
    for field in Entity::Finding.catalog() {
        if !field.is_set(filters) {
            continue;
        }
        match field {
            FilterField::Uuid => add_where_and_not(&mut clauses, &filters.uuid, finding_uuid_where),
            FilterField::Tag => add_where_and_not(&mut clauses, &filters.tags, |include, names| {
                finding_tag_where(include, names, tag_match)
            }),
            FilterField::Text => {
                clauses.extend(filters.text.iter().map(|t| finding_text_where(t)));
            }
            FilterField::DateRange => {
                add_date_ranges(&mut clauses, &filters.date_ranges, finding_date_range_where)
            }
            FilterField::Operator => {
                add_where_and_not(&mut clauses, &filters.operator, finding_operator_where)
            }
            FilterField::WithEvidence => add_where_and_not(
                &mut clauses,
                &filters.with_evidence_uuid,
                finding_with_evidence_where,
            ),
            FilterField::Metadata | FilterField::ContentType | FilterField::Linked => {}
        }
    }

    debug!(
        subsystem = "core",
        component = "compiler",
        op = "compile_finding_filters",
        operation_id,
        clause_count = clauses.len(),
        "Compiled finding filters"
    );
    Ok(Predicate::and(clauses))
}
