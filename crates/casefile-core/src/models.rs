//! Domain models for operations, evidence, findings and tags.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::predicate::Row;
use crate::schema::{evidence, findings, operations, tags, users};

// =============================================================================
// PERSISTED ENTITIES
// =============================================================================

/// An engagement that owns evidence, findings and tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub status: i64,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<&Row> for Operation {
    type Error = crate::Error;

    fn try_from(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.int(&operations::ID)?,
            slug: row.text(&operations::SLUG)?,
            name: row.text(&operations::NAME)?,
            status: row.int(&operations::STATUS)?,
            created_at: row.timestamp(&operations::CREATED_AT)?,
        })
    }
}

/// A user as shown next to the evidence they created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub slug: String,
    pub first_name: String,
    pub last_name: String,
}

impl TryFrom<&Row> for UserSummary {
    type Error = crate::Error;

    fn try_from(row: &Row) -> Result<Self> {
        Ok(Self {
            slug: row.text(&users::SLUG)?,
            first_name: row.text(&users::FIRST_NAME)?,
            last_name: row.text(&users::LAST_NAME)?,
        })
    }
}

/// A tag belonging to one operation's catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub operation_id: i64,
    pub name: String,
    pub color_name: String,
}

impl Tag {
    pub fn summary(&self) -> TagSummary {
        TagSummary {
            id: self.id,
            name: self.name.clone(),
            color_name: self.color_name.clone(),
        }
    }
}

impl TryFrom<&Row> for Tag {
    type Error = crate::Error;

    fn try_from(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.int(&tags::ID)?,
            operation_id: row.int(&tags::OPERATION_ID)?,
            name: row.text(&tags::NAME)?,
            color_name: row.text(&tags::COLOR_NAME)?,
        })
    }
}

/// One piece of evidence (screenshot, code block, recording).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub id: i64,
    pub uuid: Uuid,
    pub operation_id: i64,
    pub operator_id: i64,
    pub description: String,
    pub content_type: String,
    pub full_image_key: String,
    pub thumb_image_key: String,
    pub occurred_at: DateTime<Utc>,
}

impl TryFrom<&Row> for Evidence {
    type Error = crate::Error;

    fn try_from(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.int(&evidence::ID)?,
            uuid: row.uuid(&evidence::UUID)?,
            operation_id: row.int(&evidence::OPERATION_ID)?,
            operator_id: row.int(&evidence::OPERATOR_ID)?,
            description: row.text(&evidence::DESCRIPTION)?,
            content_type: row.text(&evidence::CONTENT_TYPE)?,
            full_image_key: row.text(&evidence::FULL_IMAGE_KEY)?,
            thumb_image_key: row.text(&evidence::THUMB_IMAGE_KEY)?,
            occurred_at: row.timestamp(&evidence::OCCURRED_AT)?,
        })
    }
}

/// A finding groups related evidence under a title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub id: i64,
    pub uuid: Uuid,
    pub operation_id: i64,
    pub category: Option<String>,
    pub title: String,
    pub description: String,
    pub ticket_link: Option<String>,
    pub ready_to_report: bool,
}

impl TryFrom<&Row> for Finding {
    type Error = crate::Error;

    fn try_from(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.int(&findings::ID)?,
            uuid: row.uuid(&findings::UUID)?,
            operation_id: row.int(&findings::OPERATION_ID)?,
            category: row.opt_text(&findings::CATEGORY)?,
            title: row.text(&findings::TITLE)?,
            description: row.text(&findings::DESCRIPTION)?,
            ticket_link: row.opt_text(&findings::TICKET_LINK)?,
            ready_to_report: row.bool(&findings::READY_TO_REPORT)?,
        })
    }
}

// =============================================================================
// DERIVED VALUES
// =============================================================================

/// Tag as rendered in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSummary {
    pub id: i64,
    pub name: String,
    pub color_name: String,
}

/// A source tag and the destination tag it maps onto by normalized name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagPair {
    pub source: Tag,
    pub destination: Tag,
}

/// Which tags survive a transfer from one operation to another.
///
/// Never persisted. `included` pairs a source tag with its same-named
/// destination tag; `excluded` lists source tags with no counterpart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagDifference {
    pub included: Vec<TagPair>,
    pub excluded: Vec<Tag>,
}

/// Evidence row as returned by the timeline listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceSummary {
    pub uuid: Uuid,
    pub description: String,
    pub operator: UserSummary,
    pub content_type: String,
    pub occurred_at: DateTime<Utc>,
    pub tags: Vec<TagSummary>,
}

/// Finding row with aggregates over its linked evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingSummary {
    pub uuid: Uuid,
    pub category: Option<String>,
    pub title: String,
    pub description: String,
    pub ticket_link: Option<String>,
    pub ready_to_report: bool,
    pub num_evidence: usize,
    /// Earliest `occurred_at` of linked evidence; `None` without evidence.
    pub occurred_from: Option<DateTime<Utc>>,
    /// Latest `occurred_at` of linked evidence; `None` without evidence.
    pub occurred_to: Option<DateTime<Utc>>,
    pub tags: Vec<TagSummary>,
}

/// Rows and blobs removed by a cascading delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionReport {
    pub operations: u64,
    pub user_permissions: u64,
    pub tags: u64,
    pub tag_evidence_links: u64,
    pub findings: u64,
    pub evidence_finding_links: u64,
    pub evidence: u64,
    pub evidence_metadata: u64,
    pub content_keys_deleted: usize,
}

impl DeletionReport {
    /// Total relational rows removed across all tables.
    pub fn rows_deleted(&self) -> u64 {
        self.operations
            + self.user_permissions
            + self.tags
            + self.tag_evidence_links
            + self.findings
            + self.evidence_finding_links
            + self.evidence
            + self.evidence_metadata
    }
}

// =============================================================================
// REQUESTS
// =============================================================================

/// Request for moving one evidence item to another operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveEvidenceInput {
    pub source_operation_slug: String,
    pub target_operation_slug: String,
    pub evidence_uuid: Uuid,
}

/// Request for deleting one evidence item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteEvidenceInput {
    pub operation_slug: String,
    pub evidence_uuid: Uuid,
    /// Also delete every finding the evidence is linked to.
    #[serde(default)]
    pub delete_associated_findings: bool,
}

/// Request for changing which evidence a finding groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddEvidenceToFindingInput {
    pub operation_slug: String,
    pub finding_uuid: Uuid,
    #[serde(default)]
    pub evidence_to_add: Vec<Uuid>,
    #[serde(default)]
    pub evidence_to_remove: Vec<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::Value;

    #[test]
    fn test_tag_from_row() {
        let row = Row::new()
            .with(tags::ID, 4)
            .with(tags::OPERATION_ID, 1)
            .with(tags::NAME, "Home")
            .with(tags::COLOR_NAME, "blue");

        let tag = Tag::try_from(&row).unwrap();
        assert_eq!(tag.id, 4);
        assert_eq!(tag.name, "Home");
        assert_eq!(tag.summary().color_name, "blue");
    }

    #[test]
    fn test_finding_from_row_with_nulls() {
        let row = Row::new()
            .with(findings::ID, 1)
            .with(findings::UUID, Uuid::nil())
            .with(findings::OPERATION_ID, 2)
            .with(findings::CATEGORY, Value::Null)
            .with(findings::TITLE, "XSS")
            .with(findings::DESCRIPTION, "")
            .with(findings::TICKET_LINK, Value::Null)
            .with(findings::READY_TO_REPORT, false);

        let finding = Finding::try_from(&row).unwrap();
        assert_eq!(finding.category, None);
        assert_eq!(finding.ticket_link, None);
        assert!(!finding.ready_to_report);
    }

    #[test]
    fn test_missing_column_is_internal_error() {
        let row = Row::new().with(tags::ID, 4);
        let err = Tag::try_from(&row).unwrap_err();
        assert!(matches!(err, crate::Error::Internal(_)));
    }

    #[test]
    fn test_deletion_report_totals() {
        let report = DeletionReport {
            operations: 1,
            tags: 3,
            evidence: 2,
            tag_evidence_links: 4,
            content_keys_deleted: 4,
            ..Default::default()
        };
        assert_eq!(report.rows_deleted(), 10);
    }

    #[test]
    fn test_delete_evidence_input_defaults() {
        let input: DeleteEvidenceInput = serde_json::from_str(
            r#"{"operation_slug":"op","evidence_uuid":"00000000-0000-0000-0000-000000000000"}"#,
        )
        .unwrap();
        assert!(!input.delete_associated_findings);
    }
}
