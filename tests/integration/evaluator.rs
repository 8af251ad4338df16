//! End-to-end verdicts against a live node

use std::sync::Arc;

use clustercheck::config::CheckConfig;
use clustercheck::health::HealthEvaluator;

use crate::{get_backend_config, skip_if_not_enabled, status_source};

fn policy(dir: &tempfile::TempDir) -> CheckConfig {
    CheckConfig {
        available_when_donor: false,
        available_when_readonly: false,
        force_fail_file: dir.path().join("proxyoff"),
        force_up_file: dir.path().join("proxyon"),
    }
}

#[tokio::test]
async fn test_live_node_gets_a_definite_verdict() {
    skip_if_not_enabled!();

    let dir = tempfile::tempdir().unwrap();
    let evaluator = HealthEvaluator::new(
        policy(&dir),
        Arc::new(status_source(get_backend_config())),
    );

    let verdict = evaluator.evaluate().await;
    let status = verdict.status_code().as_u16();
    assert!(
        [200, 503].contains(&status),
        "unexpected verdict {:?}",
        verdict
    );
}

#[tokio::test]
async fn test_force_fail_overrides_live_node() {
    skip_if_not_enabled!();

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("proxyoff"), b"").unwrap();
    let evaluator = HealthEvaluator::new(
        policy(&dir),
        Arc::new(status_source(get_backend_config())),
    );

    assert_eq!(evaluator.evaluate().await.status_code().as_u16(), 404);
}
