//! Evidence listing and moves between operations.

use std::collections::HashMap;
use std::time::Instant;

use tracing::info;

use crate::compiler::{compile_evidence_filters, unsupported_fields, Entity, TagMatch};
use crate::error::{Error, Result};
use crate::filter::TimelineFilters;
use crate::models::{
    Evidence, EvidenceSummary, MoveEvidenceInput, Tag, TagDifference, TagSummary, UserSummary,
};
use crate::policy::{Access, Permission};
use crate::predicate::{Join, Predicate, Row, Select, Update};
use crate::schema::{evidence, evidence_finding_map, tag_evidence_map, tags, users, Table};
use crate::services::lookup::{
    lookup_evidence, lookup_operation, tag_ids_for_evidence, tags_for_operation,
};
use crate::tag_diff::diff_for_evidence;
use crate::traits::{RelationalStore, StoreTransaction};

/// Reject filter fields `entity` has no where-builder for.
pub(crate) fn reject_unsupported(entity: Entity, filters: &TimelineFilters) -> Result<()> {
    let unsupported = unsupported_fields(entity, filters);
    if unsupported.is_empty() {
        return Ok(());
    }
    let names: Vec<&str> = unsupported.iter().map(|f| f.name()).collect();
    Err(Error::InvalidInput(format!(
        "{} cannot be filtered by: {}",
        entity.name(),
        names.join(", ")
    )))
}

/// Tags attached to each of `evidence_ids`, ordered by tag id.
pub(crate) async fn tags_by_evidence_id<S: RelationalStore>(
    store: &S,
    evidence_ids: Vec<i64>,
) -> Result<HashMap<i64, Vec<TagSummary>>> {
    let mut by_evidence: HashMap<i64, Vec<TagSummary>> = HashMap::new();
    if evidence_ids.is_empty() {
        return Ok(by_evidence);
    }
    let rows = store
        .select(
            &Select::from(Table::TagEvidenceMap)
                .join(Join::inner(Table::Tags, tag_evidence_map::TAG_ID, tags::ID))
                .filter(Predicate::in_list(
                    tag_evidence_map::EVIDENCE_ID,
                    evidence_ids,
                    true,
                ))
                .order_by(tags::ID, false),
        )
        .await?;
    for row in &rows {
        let evidence_id = row.int(&tag_evidence_map::EVIDENCE_ID)?;
        let tag = Tag::try_from(row)?;
        by_evidence.entry(evidence_id).or_default().push(tag.summary());
    }
    Ok(by_evidence)
}

/// List an operation's evidence matching `filters`, newest first unless
/// `filters.sort_asc`.
pub async fn list_evidence_for_operation<S: RelationalStore>(
    store: &S,
    access: &Access,
    slug: &str,
    filters: &TimelineFilters,
) -> Result<Vec<EvidenceSummary>> {
    list_evidence_matching(store, access, slug, filters, TagMatch::default()).await
}

/// [`list_evidence_for_operation`] with an explicit tag strategy.
pub async fn list_evidence_matching<S: RelationalStore>(
    store: &S,
    access: &Access,
    slug: &str,
    filters: &TimelineFilters,
    tag_match: TagMatch,
) -> Result<Vec<EvidenceSummary>> {
    let start = Instant::now();
    let operation = lookup_operation(store, slug).await?;
    access.require(&[Permission::ReadOperation(operation.id)])?;
    reject_unsupported(Entity::Evidence, filters)?;

    let predicate = compile_evidence_filters(operation.id, filters, tag_match)?;
    let descending = !filters.sort_asc;
    let rows = store
        .select(
            &Select::from(Table::Evidence)
                .join(Join::inner(Table::Users, evidence::OPERATOR_ID, users::ID))
                .filter(predicate)
                .order_by(evidence::OCCURRED_AT, descending)
                .order_by(evidence::ID, descending),
        )
        .await?;

    let ids = rows
        .iter()
        .map(|r| r.int(&evidence::ID))
        .collect::<Result<Vec<_>>>()?;
    let mut tags_by_id = tags_by_evidence_id(store, ids).await?;

    let summaries = rows
        .iter()
        .map(|row: &Row| {
            let item = Evidence::try_from(row)?;
            Ok(EvidenceSummary {
                uuid: item.uuid,
                description: item.description,
                operator: UserSummary::try_from(row)?,
                content_type: item.content_type,
                occurred_at: item.occurred_at,
                tags: tags_by_id.remove(&item.id).unwrap_or_default(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    info!(
        subsystem = "core",
        component = "evidence",
        op = "list_evidence",
        operation_id = operation.id,
        result_count = summaries.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Listed evidence"
    );
    Ok(summaries)
}

/// Move one evidence item to another operation.
///
/// Finding links are dropped. Tags are re-attached under the destination
/// tag of the same name; tags without a counterpart are dropped and listed
/// in the returned difference's `excluded`.
pub async fn move_evidence<S: RelationalStore>(
    store: &S,
    access: &Access,
    input: MoveEvidenceInput,
) -> Result<TagDifference> {
    let source = lookup_operation(store, &input.source_operation_slug).await?;
    let destination = lookup_operation(store, &input.target_operation_slug).await?;
    access.require(&[
        Permission::ModifyOperation(source.id),
        Permission::ModifyOperation(destination.id),
    ])?;
    let item = lookup_evidence(store, source.id, input.evidence_uuid).await?;
    if source.id == destination.id {
        return Err(Error::InvalidInput(format!(
            "evidence {} already belongs to operation '{}'",
            item.uuid, destination.slug
        )));
    }

    let source_tags = tags_for_operation(store, source.id).await?;
    let destination_tags = tags_for_operation(store, destination.id).await?;
    let attached = tag_ids_for_evidence(store, item.id).await?;
    let difference = diff_for_evidence(&source_tags, &destination_tags, &attached);

    let mut tx = store.begin().await?;
    tx.delete(
        Table::EvidenceFindingMap,
        &Predicate::eq(evidence_finding_map::EVIDENCE_ID, item.id),
    )
    .await?;
    tx.delete(
        Table::TagEvidenceMap,
        &Predicate::eq(tag_evidence_map::EVIDENCE_ID, item.id),
    )
    .await?;
    tx.update(
        &Update::table(Table::Evidence)
            .set(evidence::OPERATION_ID, destination.id)
            .filter(Predicate::eq(evidence::ID, item.id)),
    )
    .await?;
    if !difference.included.is_empty() {
        let links = difference
            .included
            .iter()
            .map(|pair| {
                Row::new()
                    .with(tag_evidence_map::TAG_ID, pair.destination.id)
                    .with(tag_evidence_map::EVIDENCE_ID, item.id)
            })
            .collect();
        tx.insert(Table::TagEvidenceMap, links).await?;
    }
    tx.commit().await?;

    info!(
        subsystem = "core",
        component = "evidence",
        op = "move_evidence",
        evidence_uuid = %item.uuid,
        source_operation_id = source.id,
        destination_operation_id = destination.id,
        tags_kept = difference.included.len(),
        tags_dropped = difference.excluded.len(),
        "Evidence moved"
    );
    Ok(difference)
}
