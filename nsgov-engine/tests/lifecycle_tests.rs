//! Lifecycle Tests
//! Provisioning, stage transitions, renewal and operator deletion

mod common;

use common::{at, test_config, TestEnv};
use nsgov_engine::engine::INITIAL_PROVISIONING;
use nsgov_engine::gateway::memory::Operation;
use nsgov_engine::record::{ANN_DELETION_STARTED_AT, LABEL_STAGE};
use nsgov_engine::{CreateRequest, GatewayError, GovernanceError, Stage, TransitionOutcome};
use std::collections::BTreeSet;

fn request(name: &str) -> CreateRequest {
    CreateRequest::new(name, "payments", "dev")
}

fn unavailable() -> GatewayError {
    GatewayError::Unavailable("injected".to_string())
}

// ============== Provisioning ==============

#[tokio::test]
async fn test_create_at_development() {
    let env = TestEnv::new();
    let record = env
        .engine
        .create_at(request("payments-dev"), at(2024, 1, 1))
        .await
        .unwrap();

    assert_eq!(record.stage, Stage::Development);
    assert_eq!(record.retention_days, 90);
    assert_eq!(record.expires_at, Some(at(2024, 3, 31).date_naive()));
    assert!(record.resource_version.is_some());

    let object = env.gateway.peek("payments-dev").await.unwrap();
    assert_eq!(object.labels.get(LABEL_STAGE).unwrap(), "development");
    assert_eq!(object.labels.get("retention-policy").unwrap(), "90d");
    assert_eq!(env.gateway.applied_bundles("payments-dev").await.len(), 1);
}

#[tokio::test]
async fn test_create_keeps_caller_metadata() {
    let env = TestEnv::new();
    let record = env
        .engine
        .create(
            request("search-dev")
                .label("cost-center", "cc-42")
                .annotation("owner", "search-team@example.com"),
        )
        .await
        .unwrap();

    assert_eq!(record.labels.get("cost-center").unwrap(), "cc-42");
    assert_eq!(record.annotations.get("owner").unwrap(), "search-team@example.com");
    assert!(!record.labels.contains_key(LABEL_STAGE));
}

#[tokio::test]
async fn test_create_at_production_promotes() {
    let env = TestEnv::new();
    let record = env
        .engine
        .create(request("payments-prod").stage(Stage::Production))
        .await
        .unwrap();

    assert_eq!(record.stage, Stage::Production);
    assert_eq!(record.previous_stage, Some(Stage::Testing));
    assert_eq!(record.last_transition_reason.as_deref(), Some(INITIAL_PROVISIONING));
    assert_eq!(env.gateway.applied_bundles("payments-prod").await.len(), 3);

    let production = env.engine.catalog().resolve(Stage::Production).unwrap();
    assert_eq!(record.retention_days, production.retention_days);
}

#[tokio::test]
async fn test_create_validation_errors() {
    let env = TestEnv::new();

    for bad in [
        request("Payments"),
        request("-payments"),
        request(&"a".repeat(64)),
        CreateRequest::new("payments", "pay ments", "dev"),
        request("payments").retention_days(0),
        request("payments").retention_days(4000),
        request("payments").stage(Stage::Archived),
        request("payments").label(LABEL_STAGE, "production"),
        request("payments").annotation(ANN_DELETION_STARTED_AT, "now"),
    ] {
        let err = env.engine.create(bad).await.unwrap_err();
        assert!(matches!(err, GovernanceError::Validation(_)), "unexpected {:?}", err);
    }

    assert_eq!(env.gateway.calls(Operation::Create).await, 0);
}

#[tokio::test]
async fn test_create_existing_namespace() {
    let env = TestEnv::new();
    env.engine.create(request("payments")).await.unwrap();

    let err = env.engine.create(request("payments")).await.unwrap_err();
    assert!(matches!(err, GovernanceError::Validation(_)));
}

#[tokio::test]
async fn test_create_rolls_back_on_policy_failure() {
    let env = TestEnv::new();
    env.gateway
        .fail_next(Operation::ApplyPolicyBundle, unavailable(), 10)
        .await;

    let err = env.engine.create(request("payments")).await.unwrap_err();
    assert!(matches!(err, GovernanceError::Gateway(_)));
    assert!(!env.gateway.contains("payments").await);
}

#[tokio::test]
async fn test_create_is_not_retried() {
    let env = TestEnv::new();
    env.gateway.fail_next(Operation::Create, unavailable(), 1).await;

    let err = env.engine.create(request("payments")).await.unwrap_err();
    assert!(matches!(err, GovernanceError::Gateway(_)));
    assert_eq!(env.gateway.calls(Operation::Create).await, 1);
}

// ============== Transitions ==============

#[tokio::test]
async fn test_promotion_materializes_each_bundle() {
    let env = TestEnv::new();
    env.engine.create(request("payments")).await.unwrap();

    env.engine
        .transition("payments", Stage::Testing, "qa sign-off")
        .await
        .unwrap();
    let outcome = env
        .engine
        .transition("payments", Stage::Production, "release")
        .await
        .unwrap();

    let record = outcome.record().unwrap().clone();
    assert_eq!(record.stage, Stage::Production);
    assert_eq!(record.previous_stage, Some(Stage::Testing));
    assert_eq!(record.last_transition_reason.as_deref(), Some("release"));

    let applied = env.gateway.applied_bundles("payments").await;
    let references: BTreeSet<String> = applied.iter().map(|b| b.reference()).collect();
    assert_eq!(applied.len(), 3);
    assert_eq!(references.len(), 3);
    assert_eq!(record.policy_ref, Some(applied[2].reference()));

    let err = env
        .engine
        .transition("payments", Stage::Testing, "rollback")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GovernanceError::InvalidTransition {
            from: Stage::Production,
            to: Stage::Testing
        }
    ));
}

#[tokio::test]
async fn test_same_stage_is_noop() {
    let env = TestEnv::new();
    let created = env.engine.create(request("payments")).await.unwrap();
    let patches = env.gateway.calls(Operation::PatchMetadata).await;

    let outcome = env
        .engine
        .transition("payments", Stage::Development, "again")
        .await
        .unwrap();

    match outcome {
        TransitionOutcome::Unchanged { record } => assert_eq!(record, created),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(env.gateway.calls(Operation::PatchMetadata).await, patches);
    assert_eq!(env.gateway.applied_bundles("payments").await.len(), 1);
}

#[tokio::test]
async fn test_failed_metadata_write_restores_previous_bundle() {
    let env = TestEnv::new();
    env.engine.create(request("payments")).await.unwrap();
    env.gateway
        .fail_next(
            Operation::PatchMetadata,
            GatewayError::Rejected("admission denied".to_string()),
            1,
        )
        .await;

    let err = env
        .engine
        .transition("payments", Stage::Testing, "promote")
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::Gateway(GatewayError::Rejected(_))));

    let record = env.engine.get("payments").await.unwrap();
    assert_eq!(record.stage, Stage::Development);

    let stages: Vec<Stage> = env
        .gateway
        .applied_bundles("payments")
        .await
        .iter()
        .map(|b| b.stage)
        .collect();
    assert_eq!(stages, vec![Stage::Development, Stage::Testing, Stage::Development]);
}

#[tokio::test]
async fn test_concurrent_change_is_retried_once() {
    let env = TestEnv::new();
    env.engine.create(request("payments")).await.unwrap();
    let patches = env.gateway.calls(Operation::PatchMetadata).await;
    env.gateway
        .fail_next(
            Operation::PatchMetadata,
            GatewayError::Conflict("payments".to_string()),
            1,
        )
        .await;

    let outcome = env
        .engine
        .transition("payments", Stage::Testing, "promote")
        .await
        .unwrap();
    match outcome {
        TransitionOutcome::Transitioned { record, .. } => assert_eq!(record.stage, Stage::Testing),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(env.gateway.calls(Operation::PatchMetadata).await, patches + 2);
}

#[tokio::test]
async fn test_repeated_conflict_is_surfaced() {
    let env = TestEnv::new();
    env.engine.create(request("payments")).await.unwrap();
    let patches = env.gateway.calls(Operation::PatchMetadata).await;
    env.gateway
        .fail_next(
            Operation::PatchMetadata,
            GatewayError::Conflict("payments".to_string()),
            2,
        )
        .await;

    let err = env
        .engine
        .transition("payments", Stage::Testing, "promote")
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::Conflict(_)));
    assert_eq!(env.gateway.calls(Operation::PatchMetadata).await, patches + 2);
    assert_eq!(env.engine.get("payments").await.unwrap().stage, Stage::Development);
}

#[tokio::test]
async fn test_deprecation_takes_backup() {
    let env = TestEnv::new();
    env.engine.create(request("payments")).await.unwrap();

    let outcome = env
        .engine
        .transition("payments", Stage::Deprecated, "replaced")
        .await
        .unwrap();

    let TransitionOutcome::Transitioned { record, backup } = outcome else {
        panic!("expected a transition");
    };
    let backup = backup.unwrap();
    assert_eq!(record.stage, Stage::Deprecated);
    assert_eq!(record.last_backup.as_deref(), Some(backup.key()));
    assert_eq!(record.last_backup_checksum.as_deref(), Some(backup.checksum()));
    assert!(std::path::Path::new(backup.location()).exists());
    assert_eq!(env.backup_files("payments"), 1);
}

#[tokio::test]
async fn test_backup_required_blocks_transition() {
    let env = TestEnv::new();
    env.engine.create(request("payments")).await.unwrap();
    env.gateway
        .fail_next(Operation::ExportResources, unavailable(), 10)
        .await;

    let err = env
        .engine
        .transition("payments", Stage::Deprecated, "replaced")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GovernanceError::BackupRequired {
            stage: Stage::Deprecated,
            ..
        }
    ));

    env.gateway.clear_faults().await;
    let record = env.engine.get("payments").await.unwrap();
    assert_eq!(record.stage, Stage::Development);
    assert_eq!(env.gateway.applied_bundles("payments").await.len(), 1);
}

#[tokio::test]
async fn test_reactivation_requires_capability() {
    let env = TestEnv::new();
    env.engine.create(request("payments")).await.unwrap();
    env.engine
        .transition("payments", Stage::Deprecated, "replaced")
        .await
        .unwrap();
    env.engine
        .transition("payments", Stage::Archived, "cold storage")
        .await
        .unwrap();

    let err = env
        .engine
        .transition("payments", Stage::Development, "revive")
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::ReactivationDenied { to: Stage::Development, .. }));
    assert_eq!(env.engine.get("payments").await.unwrap().stage, Stage::Archived);
}

#[tokio::test]
async fn test_reactivation_with_capability() {
    let mut config = test_config();
    config.engine.allow_reactivation = true;
    let env = TestEnv::with_config(config);

    env.engine.create(request("payments")).await.unwrap();
    env.engine
        .transition("payments", Stage::Deprecated, "replaced")
        .await
        .unwrap();
    env.engine
        .transition("payments", Stage::Archived, "cold storage")
        .await
        .unwrap();

    let outcome = env
        .engine
        .transition("payments", Stage::Testing, "revive")
        .await
        .unwrap();
    let record = outcome.record().unwrap();
    assert_eq!(record.stage, Stage::Testing);
    assert_eq!(record.previous_stage, Some(Stage::Archived));
}

#[tokio::test]
async fn test_transition_to_deleting_requires_archived() {
    let env = TestEnv::new();
    env.engine.create(request("payments")).await.unwrap();

    let err = env
        .engine
        .transition("payments", Stage::Deleting, "cleanup")
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::InvalidTransition { .. }));
    assert_eq!(env.gateway.calls(Operation::Delete).await, 0);

    env.engine
        .transition("payments", Stage::Deprecated, "replaced")
        .await
        .unwrap();
    env.engine
        .transition("payments", Stage::Archived, "cold storage")
        .await
        .unwrap();

    let outcome = env
        .engine
        .transition("payments", Stage::Deleting, "cleanup")
        .await
        .unwrap();
    assert!(matches!(outcome, TransitionOutcome::Reclaimed { .. }));
    assert!(!env.gateway.contains("payments").await);
}

#[tokio::test]
async fn test_transition_refused_during_reclamation() {
    let env = TestEnv::new();
    env.engine.create(request("payments")).await.unwrap();
    env.set_marker("payments", chrono::Utc::now()).await;

    let err = env
        .engine
        .transition("payments", Stage::Testing, "qa")
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::Conflict(_)));
}

#[tokio::test]
async fn test_transition_unknown_namespace() {
    let env = TestEnv::new();
    let err = env
        .engine
        .transition("ghost", Stage::Testing, "qa")
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::NotFound(_)));
}

// ============== Renewal ==============

#[tokio::test]
async fn test_renew_restarts_retention() {
    let env = TestEnv::new();
    env.engine
        .create_at(request("payments"), at(2024, 1, 1))
        .await
        .unwrap();

    let renewed = env
        .engine
        .renew_at("payments", Some(30), at(2024, 3, 1))
        .await
        .unwrap();
    assert_eq!(renewed.retention_days, 30);
    assert_eq!(renewed.expires_at, Some(at(2024, 3, 31).date_naive()));

    let renewed = env
        .engine
        .renew_at("payments", None, at(2024, 3, 1))
        .await
        .unwrap();
    assert_eq!(renewed.retention_days, 90);

    let err = env.engine.renew("payments", Some(0)).await.unwrap_err();
    assert!(matches!(err, GovernanceError::Validation(_)));
}

// ============== Deletion ==============

#[tokio::test]
async fn test_delete_backs_up_first() {
    let env = TestEnv::new();
    env.engine.create(request("payments")).await.unwrap();

    let backup = env.engine.delete("payments").await.unwrap();
    assert_eq!(backup.namespace(), "payments");
    assert!(!env.gateway.contains("payments").await);
    assert_eq!(env.backup_files("payments"), 1);

    let artifact = env.load_backup(backup.key()).await;
    assert_eq!(artifact.namespace, "payments");
    assert_eq!(artifact.labels.get(LABEL_STAGE).unwrap(), "development");
}

#[tokio::test]
async fn test_delete_unknown_namespace() {
    let env = TestEnv::new();
    let err = env.engine.delete("ghost").await.unwrap_err();
    assert!(matches!(err, GovernanceError::NotFound(_)));
}

#[tokio::test]
async fn test_delete_without_backup_never_deletes() {
    let env = TestEnv::new();
    env.engine.create(request("payments")).await.unwrap();
    env.gateway
        .fail_next(Operation::ExportResources, unavailable(), 10)
        .await;

    let err = env.engine.delete("payments").await.unwrap_err();
    assert!(matches!(err, GovernanceError::BackupFailure { .. }));
    assert_eq!(env.gateway.calls(Operation::Delete).await, 0);

    let object = env.gateway.peek("payments").await.unwrap();
    assert!(!object.annotations.contains_key(ANN_DELETION_STARTED_AT));
}

// ============== Listing ==============

#[tokio::test]
async fn test_list_is_sorted() {
    let env = TestEnv::new();
    for name in ["search", "analytics", "payments"] {
        env.engine.create(request(name)).await.unwrap();
    }

    let names: Vec<String> = env
        .engine
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["analytics", "payments", "search"]);
}
