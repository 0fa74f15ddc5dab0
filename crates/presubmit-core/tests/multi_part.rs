//! Multi-part change sets across polling rounds.

use std::path::Path;

use presubmit_core::fakes::{MemoryCiServer, MemoryReviewServer};
use presubmit_core::{registry, run_query, Change, PresubmitConfig, PROJECTS_PARAM, REFS_PARAM};

fn config_with_log(log_file: &Path) -> PresubmitConfig {
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

[projects.tools]
tests = ["go-test"]
"#,
    )
    .unwrap();
    config.presubmit.log_file = log_file.display().to_string();
    config
}

fn part(number: u64, patchset: u64, project: &str, index: u32, total: u32) -> Change {
    Change::new(number, patchset, project)
        .with_owner("dev@example.io")
        .with_topic("new-api")
        .with_message(format!("Add the new API.\n\nMultiPart: {index}/{total}\n"))
}

#[tokio::test]
async fn test_complete_set_is_built_together() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("log");
    registry::persist(&log, &[part(501, 1, "core", 1, 2)]).unwrap();
    let config = config_with_log(&log);
    let ci = MemoryCiServer::new();
    // Part 2 arrives listed before part 1; the build keeps index order.
    let review = MemoryReviewServer::with_changes(vec![
        part(502, 1, "tools", 2, 2),
        part(501, 1, "core", 1, 2),
    ]);

    let report = run_query(&config, &review, &ci).await.unwrap();
    // One build, two changes sent.
    assert_eq!(report.sent, 2);
    let added = ci.added();
    assert_eq!(added.len(), 1);
    assert_eq!(
        added[0].param(REFS_PARAM),
        "refs/changes/01/501/1:refs/changes/02/502/1"
    );
    assert_eq!(added[0].param(PROJECTS_PARAM), "core:tools");
}

#[tokio::test]
async fn test_incomplete_set_posts_one_error() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("log");
    registry::persist(&log, &[Change::new(1, 1, "core")]).unwrap();
    let config = config_with_log(&log);
    let ci = MemoryCiServer::new();
    let review = MemoryReviewServer::with_changes(vec![
        part(601, 1, "core", 1, 3),
        part(602, 1, "tools", 2, 3),
    ]);

    let report = run_query(&config, &review, &ci).await.unwrap();
    assert_eq!(report.sent, 0);
    assert_eq!(report.multipart_errors, 1);
    assert!(ci.added().is_empty());

    let posts = review.posts();
    assert_eq!(posts.len(), 1);
    assert!(!posts[0].verified);
    assert!(posts[0].message.starts_with("failed to process multi-part CL "));

    // Nothing changed since, so the error is not posted again.
    let again = run_query(&config, &review, &ci).await.unwrap();
    assert_eq!(again.multipart_errors, 0);
    assert_eq!(review.posts().len(), 1);
}

#[tokio::test]
async fn test_new_part_outdates_build_of_smaller_set() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("log");
    registry::persist(&log, &[Change::new(701, 1, "core")]).unwrap();
    let config = config_with_log(&log);
    let ci = MemoryCiServer::new();
    ci.set_queued(vec![presubmit_core::QueuedBuild {
        id: 3,
        params: [(REFS_PARAM.to_string(), "refs/changes/01/701/1".to_string())].into(),
    }]);
    let review = MemoryReviewServer::with_changes(vec![
        part(701, 2, "core", 1, 2),
        part(702, 1, "tools", 2, 2),
    ]);

    let report = run_query(&config, &review, &ci).await.unwrap();
    assert_eq!(report.sent, 2);
    assert_eq!(ci.added().len(), 1);
    assert_eq!(ci.cancelled_queued(), vec![3]);
}

#[tokio::test]
async fn test_set_is_submitted_only_when_every_part_is_ready() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("log");
    registry::persist(&log, &[part(801, 1, "core", 1, 2), part(802, 1, "tools", 2, 2)]).unwrap();
    let config = config_with_log(&log);
    let ci = MemoryCiServer::new();
    let ready = |change: Change| {
        let message = format!("{}AutoSubmit\n", change.message);
        change.with_message(message).with_submittable(true)
    };
    let review = MemoryReviewServer::with_changes(vec![
        ready(part(801, 1, "core", 1, 2)),
        part(802, 1, "tools", 2, 2).with_submittable(true),
    ]);

    let report = run_query(&config, &review, &ci).await.unwrap();
    assert_eq!(report.submitted, 0);
    assert!(review.submits().is_empty());

    review.set_changes(vec![
        ready(part(801, 1, "core", 1, 2)),
        ready(part(802, 1, "tools", 2, 2)),
    ]);
    let report = run_query(&config, &review, &ci).await.unwrap();
    assert_eq!(report.submitted, 2);
    assert_eq!(
        review.submits(),
        vec![
            "refs/changes/01/801/1".to_string(),
            "refs/changes/02/802/1".to_string(),
        ]
    );
}
