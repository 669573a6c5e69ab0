//! Diagnostics Tests
//! Scoring namespaces through the engine

mod common;

use common::TestEnv;
use nsgov_engine::diagnostics::CheckId;
use nsgov_engine::gateway::memory::Operation;
use nsgov_engine::gateway::NamespaceObject;
use nsgov_engine::{CreateRequest, DiagnosticBucket, GatewayError, GovernanceError};

#[tokio::test]
async fn test_empty_namespace_is_poor() {
    let env = TestEnv::new();
    env.gateway
        .insert_namespace(NamespaceObject {
            name: "scratch".to_string(),
            ..Default::default()
        })
        .await;

    let report = env.engine.diagnose("scratch").await.unwrap();
    assert_eq!(report.score, 4);
    assert_eq!(report.max_score, 10);
    assert_eq!(report.bucket, DiagnosticBucket::Poor);
}

#[tokio::test]
async fn test_provisioned_namespace_has_policies() {
    let env = TestEnv::new();
    env.engine
        .create(CreateRequest::new("payments", "payments", "dev"))
        .await
        .unwrap();

    let report = env.engine.diagnose("payments").await.unwrap();
    assert!(report.passed(CheckId::ResourceQuota));
    assert!(report.passed(CheckId::LimitRange));
    assert_eq!(report.score, 6);
    assert_eq!(report.bucket, DiagnosticBucket::Fair);
}

#[tokio::test]
async fn test_diagnose_takes_no_mutating_calls() {
    let env = TestEnv::new();
    env.engine
        .create(CreateRequest::new("payments", "payments", "dev"))
        .await
        .unwrap();
    let patches = env.gateway.calls(Operation::PatchMetadata).await;

    env.engine.diagnose("payments").await.unwrap();
    assert_eq!(env.gateway.calls(Operation::PatchMetadata).await, patches);
    assert_eq!(env.gateway.calls(Operation::ApplyPolicyBundle).await, 1);
}

#[tokio::test]
async fn test_diagnose_missing_namespace() {
    let env = TestEnv::new();
    let err = env.engine.diagnose("ghost").await.unwrap_err();
    assert!(matches!(err, GovernanceError::NotFound(_)));
}

#[tokio::test]
async fn test_unavailable_inventory_is_reported() {
    let env = TestEnv::new();
    env.gateway
        .insert_namespace(NamespaceObject {
            name: "scratch".to_string(),
            ..Default::default()
        })
        .await;
    env.gateway
        .fail_next(
            Operation::ListWorkloads,
            GatewayError::Unavailable("injected".to_string()),
            10,
        )
        .await;

    let report = env.engine.diagnose("scratch").await.unwrap();
    let unavailable: Vec<CheckId> = report.unavailable.iter().map(|u| u.check).collect();
    assert_eq!(
        unavailable,
        vec![CheckId::ResourceRequests, CheckId::ResourceLimits, CheckId::HealthProbes]
    );
    assert_eq!(report.score, 1);
}
