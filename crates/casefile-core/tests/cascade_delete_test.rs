//! Cascading deletes: atomicity of the relational phase and best-effort
//! content cleanup.

mod common;

use std::sync::Arc;

use casefile_core::{
    delete_evidence, delete_operation, Access, ContentStore, DeleteEvidenceInput, Error,
    OperationRole, OperationRolePolicy, Table,
};
use common::{evidence_uuid, full_key, scenario, thumb_key};

#[tokio::test]
async fn test_failed_child_delete_leaves_everything_in_place() {
    for failing in [
        Table::TagEvidenceMap,
        Table::Tags,
        Table::EvidenceFindingMap,
        Table::Findings,
        Table::EvidenceMetadata,
        Table::Evidence,
        Table::UserOperationPermissions,
        Table::Operations,
    ] {
        let fx = scenario().await;
        let before = fx.counts().await;
        fx.store.fail_deletes_from(failing).await;

        let err = delete_operation(&fx.store, fx.content_store(), &Access::bypass(), "op")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)), "{failing}: {err}");

        assert_eq!(fx.counts().await, before, "partial delete when {failing} failed");
        assert!(fx.content.delete_calls().await.is_empty());
    }
}

#[tokio::test]
async fn test_delete_succeeds_after_failure_cleared() {
    let fx = scenario().await;
    fx.store.fail_deletes_from(Table::Evidence).await;
    assert!(
        delete_operation(&fx.store, fx.content_store(), &Access::bypass(), "op")
            .await
            .is_err()
    );

    fx.store.clear_failures().await;
    let report = delete_operation(&fx.store, fx.content_store(), &Access::bypass(), "op")
        .await
        .unwrap();
    assert_eq!(report.evidence, 2);
}

#[tokio::test]
async fn test_missing_blob_is_reported_after_commit() {
    let fx = scenario().await;
    fx.content.delete(&thumb_key(2)).await.unwrap();

    let err = delete_operation(&fx.store, fx.content_store(), &Access::bypass(), "op")
        .await
        .unwrap_err();
    let Error::ContentCleanup(failure) = err else {
        panic!("expected content cleanup failure, got {err}");
    };
    assert_eq!(failure.keys(), vec![thumb_key(2).as_str()]);
    assert_eq!(failure.orphaned[0].evidence_uuid, evidence_uuid(2));

    // relational phase stays committed
    assert_eq!(fx.store.count(Table::Operations).await, 0);
    assert_eq!(fx.store.count(Table::Evidence).await, 0);
    // every other key was still attempted and removed
    assert!(fx.content.keys().await.is_empty());
    let calls = fx.content.delete_calls().await;
    for key in [full_key(1), thumb_key(1), full_key(2)] {
        assert!(calls.contains(&key), "{key} never deleted");
    }
}

#[tokio::test]
async fn test_second_concurrent_delete_is_not_found() {
    let fx = scenario().await;
    let access = Access::bypass();

    let (first, second) = tokio::join!(
        delete_operation(&fx.store, fx.content_store(), &access, "op"),
        delete_operation(&fx.store, fx.content_store(), &access, "op"),
    );
    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(Error::NotFound(_)))));
    assert_eq!(fx.content.delete_calls().await.len(), 4);
}

#[tokio::test]
async fn test_delete_operation_requires_admin() {
    let fx = scenario().await;
    let writer = Access::new(Arc::new(
        OperationRolePolicy::new(1).with_role(1, OperationRole::Write),
    ));

    let err = delete_operation(&fx.store, fx.content_store(), &writer, "op")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));
    assert_eq!(fx.store.count(Table::Operations).await, 1);

    let admin = Access::new(Arc::new(
        OperationRolePolicy::new(1).with_role(1, OperationRole::Admin),
    ));
    assert!(delete_operation(&fx.store, fx.content_store(), &admin, "op")
        .await
        .is_ok());
}

#[tokio::test]
async fn test_delete_unknown_operation() {
    let fx = scenario().await;
    let err = delete_operation(&fx.store, fx.content_store(), &Access::bypass(), "nope")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_delete_evidence_keeps_findings_by_default() {
    let fx = scenario().await;
    let report = delete_evidence(
        &fx.store,
        fx.content_store(),
        &Access::bypass(),
        DeleteEvidenceInput {
            operation_slug: "op".into(),
            evidence_uuid: evidence_uuid(1),
            delete_associated_findings: false,
        },
    )
    .await
    .unwrap();

    assert_eq!(report.evidence, 1);
    assert_eq!(report.findings, 0);
    assert_eq!(report.content_keys_deleted, 2);
    assert_eq!(fx.store.count(Table::Evidence).await, 1);
    assert_eq!(fx.store.count(Table::Findings).await, 1);
    assert_eq!(fx.store.count(Table::EvidenceFindingMap).await, 0);
    assert_eq!(fx.store.count(Table::EvidenceMetadata).await, 0);
    // E2 keeps its Y and Z links
    assert_eq!(fx.store.count(Table::TagEvidenceMap).await, 2);
    assert_eq!(fx.content.keys().await.len(), 2);
}

#[tokio::test]
async fn test_delete_evidence_with_associated_findings() {
    let fx = scenario().await;
    fx.finding(2, 1, "Second finding").await;
    fx.link(1, 2).await;
    fx.link(2, 2).await;

    let report = delete_evidence(
        &fx.store,
        fx.content_store(),
        &Access::bypass(),
        DeleteEvidenceInput {
            operation_slug: "op".into(),
            evidence_uuid: evidence_uuid(1),
            delete_associated_findings: true,
        },
    )
    .await
    .unwrap();

    assert_eq!(report.findings, 2);
    assert_eq!(fx.store.count(Table::Findings).await, 0);
    // E2's link to the deleted finding goes with it
    assert_eq!(fx.store.count(Table::EvidenceFindingMap).await, 0);
    assert_eq!(fx.store.count(Table::Evidence).await, 1);
}

#[tokio::test]
async fn test_delete_evidence_of_other_operation_is_not_found() {
    let fx = scenario().await;
    fx.operation(2, "other").await;

    let err = delete_evidence(
        &fx.store,
        fx.content_store(),
        &Access::bypass(),
        DeleteEvidenceInput {
            operation_slug: "other".into(),
            evidence_uuid: evidence_uuid(1),
            delete_associated_findings: false,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(fx.store.count(Table::Evidence).await, 2);
}

#[tokio::test]
async fn test_delete_evidence_checks_access_before_lookup() {
    let fx = scenario().await;
    let reader = Access::new(Arc::new(
        OperationRolePolicy::new(1).with_role(1, OperationRole::Read),
    ));

    for uuid in [evidence_uuid(1), uuid::Uuid::from_u128(42)] {
        let err = delete_evidence(
            &fx.store,
            fx.content_store(),
            &reader,
            DeleteEvidenceInput {
                operation_slug: "op".into(),
                evidence_uuid: uuid,
                delete_associated_findings: false,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)), "{uuid}: {err}");
    }
    assert_eq!(fx.store.count(Table::Evidence).await, 2);
}
