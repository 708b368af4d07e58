//! Finding listing and evidence membership.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::compiler::{compile_finding_filters, Entity, TagMatch};
use crate::error::{Error, Result};
use crate::filter::TimelineFilters;
use crate::models::{
    AddEvidenceToFindingInput, Evidence, Finding, FindingSummary, Tag, TagSummary,
};
use crate::policy::{Access, Permission};
use crate::predicate::{Join, Predicate, Row, Select};
use crate::schema::{evidence, evidence_finding_map, tag_evidence_map, tags, Table};
use crate::services::evidence::reject_unsupported;
use crate::services::lookup::{lookup_finding, lookup_operation};
use crate::traits::RelationalStore;

/// Aggregates over one finding's linked evidence.
#[derive(Debug, Default)]
struct EvidenceWindow {
    evidence_ids: BTreeSet<i64>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

impl EvidenceWindow {
    fn add(&mut self, evidence_id: i64, occurred_at: DateTime<Utc>) {
        self.evidence_ids.insert(evidence_id);
        self.from = Some(self.from.map_or(occurred_at, |f| f.min(occurred_at)));
        self.to = Some(self.to.map_or(occurred_at, |t| t.max(occurred_at)));
    }
}

async fn evidence_windows<S: RelationalStore>(
    store: &S,
    finding_ids: &[i64],
) -> Result<BTreeMap<i64, EvidenceWindow>> {
    let query = Select {
        columns: vec![
            evidence_finding_map::FINDING_ID,
            evidence::ID,
            evidence::OCCURRED_AT,
        ],
        ..Select::from(Table::EvidenceFindingMap)
            .join(Join::inner(
                Table::Evidence,
                evidence_finding_map::EVIDENCE_ID,
                evidence::ID,
            ))
            .filter(Predicate::in_list(
                evidence_finding_map::FINDING_ID,
                finding_ids.iter().copied(),
                true,
            ))
    };

    let mut windows: BTreeMap<i64, EvidenceWindow> = BTreeMap::new();
    for row in store.select(&query).await? {
        windows
            .entry(row.int(&evidence_finding_map::FINDING_ID)?)
            .or_default()
            .add(row.int(&evidence::ID)?, row.timestamp(&evidence::OCCURRED_AT)?);
    }
    Ok(windows)
}

/// Distinct tags of each finding's evidence, ordered by tag id.
async fn finding_tags<S: RelationalStore>(
    store: &S,
    finding_ids: &[i64],
) -> Result<BTreeMap<i64, Vec<TagSummary>>> {
    let query = Select::from(Table::EvidenceFindingMap)
        .join(Join::inner(
            Table::TagEvidenceMap,
            evidence_finding_map::EVIDENCE_ID,
            tag_evidence_map::EVIDENCE_ID,
        ))
        .join(Join::inner(Table::Tags, tag_evidence_map::TAG_ID, tags::ID))
        .filter(Predicate::in_list(
            evidence_finding_map::FINDING_ID,
            finding_ids.iter().copied(),
            true,
        ))
        .order_by(tags::ID, false);

    let mut by_finding: BTreeMap<i64, BTreeMap<i64, TagSummary>> = BTreeMap::new();
    for row in store.select(&query).await? {
        let tag = Tag::try_from(&row)?;
        by_finding
            .entry(row.int(&evidence_finding_map::FINDING_ID)?)
            .or_default()
            .insert(tag.id, tag.summary());
    }
    Ok(by_finding
        .into_iter()
        .map(|(finding_id, tags)| (finding_id, tags.into_values().collect()))
        .collect())
}

/// List an operation's findings matching `filters`.
///
/// Ordered by the end, then the start, of each finding's evidence window,
/// latest first unless `filters.sort_asc`. Findings without evidence sort
/// as the earliest.
pub async fn list_findings_for_operation<S: RelationalStore>(
    store: &S,
    access: &Access,
    slug: &str,
    filters: &TimelineFilters,
) -> Result<Vec<FindingSummary>> {
    list_findings_matching(store, access, slug, filters, TagMatch::default()).await
}

/// [`list_findings_for_operation`] with an explicit tag strategy.
pub async fn list_findings_matching<S: RelationalStore>(
    store: &S,
    access: &Access,
    slug: &str,
    filters: &TimelineFilters,
    tag_match: TagMatch,
) -> Result<Vec<FindingSummary>> {
    let operation = lookup_operation(store, slug).await?;
    access.require(&[Permission::ReadOperation(operation.id)])?;
    reject_unsupported(Entity::Finding, filters)?;

    let predicate = compile_finding_filters(operation.id, filters, tag_match)?;
    let rows = store
        .select(&Select::from(Table::Findings).filter(predicate))
        .await?;
    let matched = rows
        .iter()
        .map(Finding::try_from)
        .collect::<Result<Vec<_>>>()?;
    if matched.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<i64> = matched.iter().map(|f| f.id).collect();
    let mut windows = evidence_windows(store, &ids).await?;
    let mut tags_by_finding = finding_tags(store, &ids).await?;

    let mut keyed: Vec<(i64, FindingSummary)> = matched
        .into_iter()
        .map(|finding| {
            let window = windows.remove(&finding.id).unwrap_or_default();
            let summary = FindingSummary {
                uuid: finding.uuid,
                category: finding.category,
                title: finding.title,
                description: finding.description,
                ticket_link: finding.ticket_link,
                ready_to_report: finding.ready_to_report,
                num_evidence: window.evidence_ids.len(),
                occurred_from: window.from,
                occurred_to: window.to,
                tags: tags_by_finding.remove(&finding.id).unwrap_or_default(),
            };
            (finding.id, summary)
        })
        .collect();

    keyed.sort_by(|(a_id, a), (b_id, b)| {
        let by_window = (a.occurred_to, a.occurred_from).cmp(&(b.occurred_to, b.occurred_from));
        let by_window = if filters.sort_asc {
            by_window
        } else {
            by_window.reverse()
        };
        by_window.then(a_id.cmp(b_id))
    });

    info!(
        subsystem = "core",
        component = "findings",
        op = "list_findings",
        operation_id = operation.id,
        result_count = keyed.len(),
        "Listed findings"
    );
    Ok(keyed.into_iter().map(|(_, summary)| summary).collect())
}

async fn evidence_by_uuid<S: RelationalStore>(store: &S, uuids: &[Uuid]) -> Result<Vec<Evidence>> {
    let rows = store
        .select(&Select::from(Table::Evidence).filter(Predicate::in_list(
            evidence::UUID,
            uuids.iter().copied(),
            true,
        )))
        .await?;
    let found = rows
        .iter()
        .map(Evidence::try_from)
        .collect::<Result<Vec<_>>>()?;

    let known: HashSet<Uuid> = found.iter().map(|e| e.uuid).collect();
    if let Some(missing) = uuids.iter().find(|u| !known.contains(u)) {
        return Err(Error::NotFound(format!("evidence {}", missing)));
    }
    Ok(found)
}

async fn batch_add_evidence<S: RelationalStore>(
    store: &S,
    uuids: &[Uuid],
    operation_id: i64,
    finding_id: i64,
) -> Result<u64> {
    if uuids.is_empty() {
        return Ok(0);
    }
    let found = evidence_by_uuid(store, uuids).await?;
    if let Some(foreign) = found.iter().find(|e| e.operation_id != operation_id) {
        return Err(Error::InvalidInput(format!(
            "cannot add evidence {} to operation {}: evidence belongs to operation {}",
            foreign.uuid, operation_id, foreign.operation_id
        )));
    }

    let existing = Select {
        columns: vec![evidence_finding_map::EVIDENCE_ID],
        ..Select::from(Table::EvidenceFindingMap)
            .filter(Predicate::eq(evidence_finding_map::FINDING_ID, finding_id))
    };
    let linked = store
        .select(&existing)
        .await?
        .iter()
        .map(|r| r.int(&evidence_finding_map::EVIDENCE_ID))
        .collect::<Result<HashSet<_>>>()?;

    let links: Vec<Row> = found
        .iter()
        .filter(|e| !linked.contains(&e.id))
        .map(|e| {
            Row::new()
                .with(evidence_finding_map::EVIDENCE_ID, e.id)
                .with(evidence_finding_map::FINDING_ID, finding_id)
        })
        .collect();
    if links.is_empty() {
        return Ok(0);
    }
    store.insert(Table::EvidenceFindingMap, links).await
}

async fn batch_remove_evidence<S: RelationalStore>(
    store: &S,
    uuids: &[Uuid],
    finding_id: i64,
) -> Result<u64> {
    if uuids.is_empty() {
        return Ok(0);
    }
    let ids: Vec<i64> = evidence_by_uuid(store, uuids)
        .await?
        .iter()
        .map(|e| e.id)
        .collect();
    store
        .delete(
            Table::EvidenceFindingMap,
            &Predicate::and(vec![
                Predicate::eq(evidence_finding_map::FINDING_ID, finding_id),
                Predicate::in_list(evidence_finding_map::EVIDENCE_ID, ids, true),
            ]),
        )
        .await
}

/// Link and unlink evidence on a finding.
///
/// The add and remove batches run concurrently; both run to completion
/// before the first error, if any, is returned.
pub async fn add_evidence_to_finding<S: RelationalStore>(
    store: &S,
    access: &Access,
    input: AddEvidenceToFindingInput,
) -> Result<()> {
    let operation = lookup_operation(store, &input.operation_slug).await?;
    access.require(&[Permission::ModifyFindingsOfOperation(operation.id)])?;
    let finding = lookup_finding(store, operation.id, input.finding_uuid).await?;

    let (added, removed) = futures::join!(
        batch_add_evidence(store, &input.evidence_to_add, operation.id, finding.id),
        batch_remove_evidence(store, &input.evidence_to_remove, finding.id),
    );
    let (added, removed) = (added?, removed?);

    debug!(
        subsystem = "core",
        component = "findings",
        op = "add_evidence_to_finding",
        finding_uuid = %finding.uuid,
        added,
        removed,
        "Updated finding evidence"
    );
    Ok(())
}
