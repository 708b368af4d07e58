//! Shared fixtures for integration tests over the in-memory stores.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use casefile_core::schema::{
    evidence, evidence_finding_map, evidence_metadata, findings, operations, tag_evidence_map,
    tags, user_operation_permissions, users,
};
use casefile_core::{
    ContentStore, MemoryContentStore, MemoryStore, RelationalStore, Row, Table,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
}

pub fn evidence_uuid(id: i64) -> Uuid {
    Uuid::from_u128(0xE000_0000 + id as u128)
}

pub fn finding_uuid(id: i64) -> Uuid {
    Uuid::from_u128(0xF000_0000 + id as u128)
}

pub fn full_key(id: i64) -> String {
    format!("{}/full", evidence_uuid(id))
}

pub fn thumb_key(id: i64) -> String {
    format!("{}/thumb", evidence_uuid(id))
}

/// In-memory stores plus builders for the operation object graph.
///
/// Ids are chosen by the test so assertions can name rows directly.
pub struct Fixture {
    pub store: MemoryStore,
    pub content: MemoryContentStore,
}

impl Fixture {
    pub fn new() -> Self {
        init_tracing();
        Self {
            store: MemoryStore::new(),
            content: MemoryContentStore::new(),
        }
    }

    pub fn content_store(&self) -> Arc<dyn ContentStore> {
        Arc::new(self.content.clone())
    }

    async fn put(&self, table: Table, row: Row) {
        self.store.insert(table, vec![row]).await.unwrap();
    }

    pub async fn user(&self, id: i64, slug: &str) {
        self.put(
            Table::Users,
            Row::new()
                .with(users::ID, id)
                .with(users::SLUG, slug)
                .with(users::FIRST_NAME, slug)
                .with(users::LAST_NAME, "Tester")
                .with(users::EMAIL, format!("{slug}@example.com"))
                .with(users::ADMIN, false),
        )
        .await;
    }

    pub async fn operation(&self, id: i64, slug: &str) {
        self.put(
            Table::Operations,
            Row::new()
                .with(operations::ID, id)
                .with(operations::SLUG, slug)
                .with(operations::NAME, slug.to_uppercase())
                .with(operations::STATUS, 0i64)
                .with(operations::CREATED_AT, at(1, 0)),
        )
        .await;
    }

    pub async fn permission(&self, user_id: i64, operation_id: i64, role: &str) {
        self.put(
            Table::UserOperationPermissions,
            Row::new()
                .with(user_operation_permissions::USER_ID, user_id)
                .with(user_operation_permissions::OPERATION_ID, operation_id)
                .with(user_operation_permissions::ROLE, role),
        )
        .await;
    }

    pub async fn tag(&self, id: i64, operation_id: i64, name: &str) {
        self.put(
            Table::Tags,
            Row::new()
                .with(tags::ID, id)
                .with(tags::OPERATION_ID, operation_id)
                .with(tags::NAME, name)
                .with(tags::COLOR_NAME, "blue"),
        )
        .await;
    }

    /// Evidence with both blob keys written to the content store.
    pub async fn evidence(
        &self,
        id: i64,
        operation_id: i64,
        operator_id: i64,
        description: &str,
        occurred_at: DateTime<Utc>,
    ) -> Uuid {
        self.put(
            Table::Evidence,
            Row::new()
                .with(evidence::ID, id)
                .with(evidence::UUID, evidence_uuid(id))
                .with(evidence::OPERATION_ID, operation_id)
                .with(evidence::OPERATOR_ID, operator_id)
                .with(evidence::DESCRIPTION, description)
                .with(evidence::CONTENT_TYPE, "image")
                .with(evidence::FULL_IMAGE_KEY, full_key(id))
                .with(evidence::THUMB_IMAGE_KEY, thumb_key(id))
                .with(evidence::OCCURRED_AT, occurred_at),
        )
        .await;
        self.content.write(&full_key(id), b"full").await.unwrap();
        self.content.write(&thumb_key(id), b"thumb").await.unwrap();
        evidence_uuid(id)
    }

    pub async fn metadata(&self, evidence_id: i64, body: &str) {
        self.put(
            Table::EvidenceMetadata,
            Row::new()
                .with(evidence_metadata::EVIDENCE_ID, evidence_id)
                .with(evidence_metadata::SOURCE, "ocr")
                .with(evidence_metadata::BODY, body),
        )
        .await;
    }

    pub async fn tag_evidence(&self, tag_id: i64, evidence_id: i64) {
        self.put(
            Table::TagEvidenceMap,
            Row::new()
                .with(tag_evidence_map::TAG_ID, tag_id)
                .with(tag_evidence_map::EVIDENCE_ID, evidence_id),
        )
        .await;
    }

    pub async fn finding(&self, id: i64, operation_id: i64, title: &str) -> Uuid {
        self.put(
            Table::Findings,
            Row::new()
                .with(findings::ID, id)
                .with(findings::UUID, finding_uuid(id))
                .with(findings::OPERATION_ID, operation_id)
                .with(findings::TITLE, title)
                .with(findings::DESCRIPTION, format!("{title} details"))
                .with(findings::READY_TO_REPORT, false),
        )
        .await;
        finding_uuid(id)
    }

    pub async fn link(&self, evidence_id: i64, finding_id: i64) {
        self.put(
            Table::EvidenceFindingMap,
            Row::new()
                .with(evidence_finding_map::EVIDENCE_ID, evidence_id)
                .with(evidence_finding_map::FINDING_ID, finding_id),
        )
        .await;
    }

    /// Row counts of every table, in [`Table::ALL`] order.
    pub async fn counts(&self) -> Vec<(Table, usize)> {
        let mut counts = Vec::new();
        for table in Table::ALL {
            counts.push((table, self.store.count(table).await));
        }
        counts
    }
}

/// Operation `op` (id 1) with user `alice` (id 1), tags X, Y, Z,
/// E1{X,Y} at day 2, E2{Y,Z} at day 3 and finding F1 grouping E1.
pub async fn scenario() -> Fixture {
    let fx = Fixture::new();
    fx.user(1, "alice").await;
    fx.operation(1, "op").await;
    fx.permission(1, 1, "admin").await;
    fx.tag(1, 1, "X").await;
    fx.tag(2, 1, "Y").await;
    fx.tag(3, 1, "Z").await;
    fx.evidence(1, 1, 1, "login page screenshot", at(2, 9)).await;
    fx.evidence(2, 1, 1, "port scan output", at(3, 9)).await;
    fx.tag_evidence(1, 1).await;
    fx.tag_evidence(2, 1).await;
    fx.tag_evidence(2, 2).await;
    fx.tag_evidence(3, 2).await;
    fx.metadata(1, "user=admin host=web01").await;
    fx.finding(1, 1, "Weak login").await;
    fx.link(1, 1).await;
    fx
}
