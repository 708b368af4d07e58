//! Tag differences between two operations.

use uuid::Uuid;

use crate::error::Result;
use crate::models::TagDifference;
use crate::policy::{Access, Permission};
use crate::services::lookup::{
    lookup_evidence, lookup_operation, tag_ids_for_evidence, tags_for_operation,
};
use crate::tag_diff::{diff, diff_for_evidence};
use crate::traits::RelationalStore;

/// Which of the source operation's tags exist in the destination operation.
pub async fn list_tag_difference<S: RelationalStore>(
    store: &S,
    access: &Access,
    source_slug: &str,
    destination_slug: &str,
) -> Result<TagDifference> {
    let source = lookup_operation(store, source_slug).await?;
    let destination = lookup_operation(store, destination_slug).await?;
    access.require(&[
        Permission::ReadOperation(source.id),
        Permission::ReadOperation(destination.id),
    ])?;

    let source_tags = tags_for_operation(store, source.id).await?;
    let destination_tags = tags_for_operation(store, destination.id).await?;
    Ok(diff(&source_tags, &destination_tags))
}

/// [`list_tag_difference`] restricted to the tags on one source evidence item.
pub async fn list_tag_difference_for_evidence<S: RelationalStore>(
    store: &S,
    access: &Access,
    source_slug: &str,
    destination_slug: &str,
    evidence_uuid: Uuid,
) -> Result<TagDifference> {
    let source = lookup_operation(store, source_slug).await?;
    let destination = lookup_operation(store, destination_slug).await?;
    access.require(&[
        Permission::ReadOperation(source.id),
        Permission::ReadOperation(destination.id),
    ])?;
    let evidence = lookup_evidence(store, source.id, evidence_uuid).await?;

    let source_tags = tags_for_operation(store, source.id).await?;
    let destination_tags = tags_for_operation(store, destination.id).await?;
    let attached = tag_ids_for_evidence(store, evidence.id).await?;
    Ok(diff_for_evidence(&source_tags, &destination_tags, &attached))
}
