//! Cascading deletes of operations and evidence.
//!
//! A deletion runs in two phases:
//!
//! 1. **Relational** (one transaction): every dependent row is removed
//!    child-before-parent. Any failure drops the transaction, which rolls it
//!    back, so no partial deletion is ever visible.
//! 2. **Content** (after commit): one task per deleted evidence row removes
//!    its blobs. Tasks run concurrently and all run to completion. Failures
//!    are logged with the orphaned keys and returned together as
//!    [`Error::ContentCleanup`]. They never undo phase 1.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ContentCleanupFailure, Error, OrphanedContent, Result};
use crate::logging::ORPHANED_DELETE;
use crate::models::{DeleteEvidenceInput, DeletionReport, Evidence};
use crate::policy::{Access, Permission};
use crate::predicate::{Predicate, Select, Subquery};
use crate::schema::{
    evidence, evidence_finding_map, evidence_metadata, findings, operations, tag_evidence_map,
    tags, user_operation_permissions, Table,
};
use crate::services::lookup::{lookup_evidence, lookup_operation};
use crate::traits::{ContentStore, RelationalStore, StoreTransaction};

/// Delete an operation with its whole object graph and evidence content.
///
/// Returns `Error::NotFound` when the operation does not exist, including
/// when a concurrent deletion removed it first. In that case no content
/// deletions are issued.
pub async fn delete_operation<S: RelationalStore>(
    store: &S,
    content: Arc<dyn ContentStore>,
    access: &Access,
    slug: &str,
) -> Result<DeletionReport> {
    let start = Instant::now();
    let operation = lookup_operation(store, slug).await?;
    access.require(&[Permission::DeleteOperation(operation.id)])?;

    let (deleted_evidence, mut report) = remove_operation_rows(store, operation.id).await?;
    debug!(
        subsystem = "core",
        component = "cascade",
        op = "delete_operation",
        operation_id = operation.id,
        rows_deleted = report.rows_deleted(),
        "Relational deletion committed"
    );

    report.content_keys_deleted = delete_content(content, deleted_evidence).await?;

    info!(
        subsystem = "core",
        component = "cascade",
        op = "delete_operation",
        operation_id = operation.id,
        operation_slug = %slug,
        rows_deleted = report.rows_deleted(),
        content_keys_deleted = report.content_keys_deleted,
        duration_ms = start.elapsed().as_millis() as u64,
        "Operation deleted"
    );
    Ok(report)
}

async fn remove_operation_rows<S: RelationalStore>(
    store: &S,
    operation_id: i64,
) -> Result<(Vec<Evidence>, DeletionReport)> {
    let mut tx = store.begin().await?;
    let mut report = DeletionReport::default();

    // Serializes concurrent deletions of the same operation.
    let locked = tx
        .select(
            &Select::from(Table::Operations)
                .filter(Predicate::eq(operations::ID, operation_id))
                .for_update(),
        )
        .await?;
    if locked.is_empty() {
        return Err(Error::NotFound(format!("operation {}", operation_id)));
    }

    let evidence_rows = tx
        .select(
            &Select::from(Table::Evidence)
                .filter(Predicate::eq(evidence::OPERATION_ID, operation_id)),
        )
        .await?;
    let deleted_evidence = evidence_rows
        .iter()
        .map(Evidence::try_from)
        .collect::<Result<Vec<_>>>()?;
    let evidence_ids: Vec<i64> = deleted_evidence.iter().map(|e| e.id).collect();

    let operation_tags =
        Subquery::new(tags::ID).filter(Predicate::eq(tags::OPERATION_ID, operation_id));
    report.tag_evidence_links += tx
        .delete(
            Table::TagEvidenceMap,
            &Predicate::in_subquery(tag_evidence_map::TAG_ID, operation_tags, true),
        )
        .await?;
    report.tags = tx
        .delete(Table::Tags, &Predicate::eq(tags::OPERATION_ID, operation_id))
        .await?;

    let operation_findings =
        Subquery::new(findings::ID).filter(Predicate::eq(findings::OPERATION_ID, operation_id));
    report.evidence_finding_links += tx
        .delete(
            Table::EvidenceFindingMap,
            &Predicate::in_subquery(evidence_finding_map::FINDING_ID, operation_findings, true),
        )
        .await?;
    report.findings = tx
        .delete(
            Table::Findings,
            &Predicate::eq(findings::OPERATION_ID, operation_id),
        )
        .await?;

    // Links from other operations' tags or findings must not outlive the evidence.
    report.tag_evidence_links += tx
        .delete(
            Table::TagEvidenceMap,
            &Predicate::in_list(tag_evidence_map::EVIDENCE_ID, evidence_ids.clone(), true),
        )
        .await?;
    report.evidence_finding_links += tx
        .delete(
            Table::EvidenceFindingMap,
            &Predicate::in_list(evidence_finding_map::EVIDENCE_ID, evidence_ids.clone(), true),
        )
        .await?;
    report.evidence_metadata = tx
        .delete(
            Table::EvidenceMetadata,
            &Predicate::in_list(evidence_metadata::EVIDENCE_ID, evidence_ids, true),
        )
        .await?;
    report.evidence = tx
        .delete(
            Table::Evidence,
            &Predicate::eq(evidence::OPERATION_ID, operation_id),
        )
        .await?;

    report.user_permissions = tx
        .delete(
            Table::UserOperationPermissions,
            &Predicate::eq(user_operation_permissions::OPERATION_ID, operation_id),
        )
        .await?;
    report.operations = tx
        .delete(
            Table::Operations,
            &Predicate::eq(operations::ID, operation_id),
        )
        .await?;

    tx.commit().await?;
    Ok((deleted_evidence, report))
}

/// Delete one evidence item, optionally with the findings it belongs to.
pub async fn delete_evidence<S: RelationalStore>(
    store: &S,
    content: Arc<dyn ContentStore>,
    access: &Access,
    input: DeleteEvidenceInput,
) -> Result<DeletionReport> {
    let operation = lookup_operation(store, &input.operation_slug).await?;
    access.require(&[Permission::ModifyEvidenceOfOperation(operation.id)])?;
    let target = lookup_evidence(store, operation.id, input.evidence_uuid).await?;

    let mut tx = store.begin().await?;
    let mut report = DeletionReport::default();

    let locked = tx
        .select(
            &Select::from(Table::Evidence)
                .filter(Predicate::eq(evidence::ID, target.id))
                .for_update(),
        )
        .await?;
    if locked.is_empty() {
        return Err(Error::NotFound(format!("evidence {}", target.uuid)));
    }

    if input.delete_associated_findings {
        let linked = Select {
            columns: vec![evidence_finding_map::FINDING_ID],
            ..Select::from(Table::EvidenceFindingMap)
                .filter(Predicate::eq(evidence_finding_map::EVIDENCE_ID, target.id))
        };
        let finding_ids = tx
            .select(&linked)
            .await?
            .iter()
            .map(|r| r.int(&evidence_finding_map::FINDING_ID))
            .collect::<Result<Vec<_>>>()?;

        report.evidence_finding_links += tx
            .delete(
                Table::EvidenceFindingMap,
                &Predicate::in_list(evidence_finding_map::FINDING_ID, finding_ids.clone(), true),
            )
            .await?;
        report.findings = tx
            .delete(
                Table::Findings,
                &Predicate::in_list(findings::ID, finding_ids, true),
            )
            .await?;
    }

    report.evidence_finding_links += tx
        .delete(
            Table::EvidenceFindingMap,
            &Predicate::eq(evidence_finding_map::EVIDENCE_ID, target.id),
        )
        .await?;
    report.tag_evidence_links = tx
        .delete(
            Table::TagEvidenceMap,
            &Predicate::eq(tag_evidence_map::EVIDENCE_ID, target.id),
        )
        .await?;
    report.evidence_metadata = tx
        .delete(
            Table::EvidenceMetadata,
            &Predicate::eq(evidence_metadata::EVIDENCE_ID, target.id),
        )
        .await?;
    report.evidence = tx
        .delete(Table::Evidence, &Predicate::eq(evidence::ID, target.id))
        .await?;
    tx.commit().await?;

    report.content_keys_deleted = delete_content(content, vec![target.clone()]).await?;

    info!(
        subsystem = "core",
        component = "cascade",
        op = "delete_evidence",
        operation_id = operation.id,
        evidence_uuid = %target.uuid,
        rows_deleted = report.rows_deleted(),
        "Evidence deleted"
    );
    Ok(report)
}

/// Blob keys owned by one evidence row, without empties or duplicates.
pub fn content_keys(evidence: &Evidence) -> Vec<String> {
    let mut keys = Vec::with_capacity(2);
    if !evidence.full_image_key.is_empty() {
        keys.push(evidence.full_image_key.clone());
    }
    if !evidence.thumb_image_key.is_empty() && evidence.thumb_image_key != evidence.full_image_key
    {
        keys.push(evidence.thumb_image_key.clone());
    }
    keys
}

/// Outcome of one evidence item's cleanup task.
struct KeyCleanup {
    evidence_uuid: Uuid,
    deleted: usize,
    orphaned: Vec<OrphanedContent>,
}

async fn delete_keys(
    content: Arc<dyn ContentStore>,
    evidence_uuid: Uuid,
    keys: Vec<String>,
) -> KeyCleanup {
    let mut outcome = KeyCleanup {
        evidence_uuid,
        deleted: 0,
        orphaned: Vec::new(),
    };
    for key in keys {
        match content.delete(&key).await {
            Ok(()) => outcome.deleted += 1,
            Err(e) => outcome.orphaned.push(OrphanedContent {
                evidence_uuid,
                key,
                reason: e.to_string(),
            }),
        }
    }
    outcome
}

/// Delete every blob of `deleted`, one concurrent task per evidence row.
///
/// Returns the number of keys deleted, or the aggregate of every failure.
pub async fn delete_content(
    content: Arc<dyn ContentStore>,
    deleted: Vec<Evidence>,
) -> Result<usize> {
    let mut pending: BTreeMap<Uuid, Vec<String>> = BTreeMap::new();
    let mut tasks = JoinSet::new();

    for item in deleted {
        let keys = content_keys(&item);
        if keys.is_empty() {
            continue;
        }
        pending.insert(item.uuid, keys.clone());
        tasks.spawn(delete_keys(Arc::clone(&content), item.uuid, keys));
    }

    let mut deleted_keys = 0;
    let mut failure = ContentCleanupFailure::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => {
                pending.remove(&outcome.evidence_uuid);
                deleted_keys += outcome.deleted;
                if !outcome.orphaned.is_empty() {
                    let keys: Vec<&str> =
                        outcome.orphaned.iter().map(|o| o.key.as_str()).collect();
                    warn!(
                        subsystem = "core",
                        component = "cascade",
                        unique_key = ORPHANED_DELETE,
                        evidence_uuid = %outcome.evidence_uuid,
                        keys = ?keys,
                        error = %outcome.orphaned[0].reason,
                        "Unable to delete evidence content"
                    );
                    failure.orphaned.extend(outcome.orphaned);
                }
            }
            Err(e) => {
                warn!(
                    subsystem = "core",
                    component = "cascade",
                    error = %e,
                    "Content cleanup task did not complete"
                );
            }
        }
    }

    // Tasks that panicked or were cancelled never reported back.
    for (evidence_uuid, keys) in pending {
        warn!(
            subsystem = "core",
            component = "cascade",
            unique_key = ORPHANED_DELETE,
            evidence_uuid = %evidence_uuid,
            keys = ?keys,
            "Unable to delete evidence content"
        );
        failure
            .orphaned
            .extend(keys.into_iter().map(|key| OrphanedContent {
                evidence_uuid,
                key,
                reason: "cleanup task did not complete".to_string(),
            }));
    }

    if failure.is_empty() {
        Ok(deleted_keys)
    } else {
        failure.orphaned.sort_by(|a, b| a.key.cmp(&b.key));
        Err(Error::ContentCleanup(failure))
    }
}
