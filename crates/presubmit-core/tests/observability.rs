//! Structured lifecycle events emitted during a polling round.

use presubmit_core::fakes::{MemoryCiServer, MemoryReviewServer};
use presubmit_core::obs::{
    emit_build_cancelled, emit_group_outcome, emit_group_submitted, emit_recoverable_error,
    emit_run_skipped,
};
use presubmit_core::{registry, run_query, BuildStatus, Change, PresubmitConfig};
use tracing_test::traced_test;

fn config(log_file: &std::path::Path) -> PresubmitConfig {
    let mut config = PresubmitConfig::from_toml_str(
        r#"
[gerrit]
host = "https://review.example.io"

[jenkins]
host = "https://ci.example.io"

[presubmit]
trusted_domains = ["example.io"]

[projects.core]
tests = ["go-test"]
"#,
    )
    .unwrap();
    config.presubmit.log_file = log_file.display().to_string();
    config
}

#[traced_test]
#[test]
fn test_emit_helpers_log_event_names() {
    emit_run_skipped("no previous refs");
    emit_group_outcome("100/2", "dispatched");
    emit_build_cancelled("refs/changes/00/100/1", "queued");
    emit_recoverable_error("cancel outdated build", &"connection reset");
    emit_group_submitted("100/2");

    assert!(logs_contain("run.skipped"));
    assert!(logs_contain("group.outcome"));
    assert!(logs_contain("build.cancelled"));
    assert!(logs_contain("connection reset"));
    assert!(logs_contain("group.submitted"));
}

#[tokio::test]
#[traced_test]
async fn test_round_logs_start_and_finish() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("log");
    registry::persist(&log, &[Change::new(100, 1, "core")]).unwrap();
    let change = Change::new(100, 2, "core").with_owner("dev@example.io");
    let review = MemoryReviewServer::with_changes(vec![change]);
    let ci = MemoryCiServer::new();

    run_query(&config(&log), &review, &ci).await.unwrap();

    assert!(logs_contain("run.started"));
    assert!(logs_contain("group.outcome"));
    assert!(logs_contain("run.finished"));
}

#[tokio::test]
#[traced_test]
async fn test_failed_last_build_logs_skip() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("log");
    let review = MemoryReviewServer::new();
    let ci = MemoryCiServer::new();
    ci.set_last_status(BuildStatus {
        number: 9,
        result: Some("FAILURE".to_string()),
    });

    let report = run_query(&config(&log), &review, &ci).await.unwrap();

    assert!(report.skip_reason.is_some());
    assert!(logs_contain("last completed build failed"));
}
