//! Entity lookups shared by the services and the cascade orchestrator.

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Evidence, Finding, Operation, Tag};
use crate::predicate::{Predicate, Row, Select};
use crate::schema::{evidence, findings, operations, tag_evidence_map, tags, Table};
use crate::traits::RelationalStore;

fn first_row(rows: Vec<Row>, what: impl FnOnce() -> String) -> Result<Row> {
    rows.into_iter()
        .next()
        .ok_or_else(|| Error::NotFound(what()))
}

pub async fn lookup_operation<S: RelationalStore>(store: &S, slug: &str) -> Result<Operation> {
    let rows = store
        .select(&Select::from(Table::Operations).filter(Predicate::eq(operations::SLUG, slug)))
        .await?;
    Operation::try_from(&first_row(rows, || format!("operation '{}'", slug))?)
}

/// Evidence `uuid`, only if it belongs to `operation_id`.
pub async fn lookup_evidence<S: RelationalStore>(
    store: &S,
    operation_id: i64,
    uuid: Uuid,
) -> Result<Evidence> {
    let rows = store
        .select(&Select::from(Table::Evidence).filter(Predicate::and(vec![
            Predicate::eq(evidence::UUID, uuid),
            Predicate::eq(evidence::OPERATION_ID, operation_id),
        ])))
        .await?;
    Evidence::try_from(&first_row(rows, || format!("evidence {}", uuid))?)
}

/// Finding `uuid`, only if it belongs to `operation_id`.
pub async fn lookup_finding<S: RelationalStore>(
    store: &S,
    operation_id: i64,
    uuid: Uuid,
) -> Result<Finding> {
    let rows = store
        .select(&Select::from(Table::Findings).filter(Predicate::and(vec![
            Predicate::eq(findings::UUID, uuid),
            Predicate::eq(findings::OPERATION_ID, operation_id),
        ])))
        .await?;
    Finding::try_from(&first_row(rows, || format!("finding {}", uuid))?)
}

/// The operation's tag catalog, ordered by id.
pub async fn tags_for_operation<S: RelationalStore>(
    store: &S,
    operation_id: i64,
) -> Result<Vec<Tag>> {
    let rows = store
        .select(
            &Select::from(Table::Tags)
                .filter(Predicate::eq(tags::OPERATION_ID, operation_id))
                .order_by(tags::ID, false),
        )
        .await?;
    rows.iter().map(Tag::try_from).collect()
}

/// Ids of the tags attached to one evidence item.
pub async fn tag_ids_for_evidence<S: RelationalStore>(
    store: &S,
    evidence_id: i64,
) -> Result<Vec<i64>> {
    let query = Select {
        columns: vec![tag_evidence_map::TAG_ID],
        ..Select::from(Table::TagEvidenceMap)
            .filter(Predicate::eq(tag_evidence_map::EVIDENCE_ID, evidence_id))
    };
    let rows = store.select(&query).await?;
    rows.iter()
        .map(|r| r.int(&tag_evidence_map::TAG_ID))
        .collect()
}
