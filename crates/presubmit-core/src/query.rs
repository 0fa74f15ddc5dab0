//! One polling round: query open changes, diff them against the previous
//! round, dispatch what is new, then submit what is ready to land.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, Instrument};
use uuid::Uuid;

use crate::config::PresubmitConfig;
use crate::diff::new_grouping;
use crate::dispatch::{Dispatcher, GroupOutcome, GroupReport};
use crate::error::Result;
use crate::group::group_changes;
use crate::obs::{
    emit_recoverable_error, emit_run_finished, emit_run_skipped, emit_run_started, run_span,
};
use crate::registry;
use crate::submit::{submit_groups, submittable_groups};
use crate::traits::{CiServer, ReviewServer};

/// Summary of one round.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Changes whose group build was queued; a multi-part set counts each
    /// of its members.
    pub sent: usize,
    /// Groups not sent, by policy.
    pub skipped: usize,
    /// Groups whose post or trigger failed.
    pub errored: usize,
    /// Changes submitted after dispatch.
    pub submitted: usize,
    /// Multi-part errors posted back to the review server.
    pub multipart_errors: usize,
    /// Why the round stopped before diffing, if it did.
    pub skip_reason: Option<String>,
    pub groups: Vec<GroupReport>,
}

impl RunReport {
    fn new(run_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            started_at: now,
            finished_at: now,
            sent: 0,
            skipped: 0,
            errored: 0,
            submitted: 0,
            multipart_errors: 0,
            skip_reason: None,
            groups: Vec::new(),
        }
    }

    fn record(&mut self, groups: Vec<GroupReport>) {
        for group in &groups {
            match group.outcome {
                GroupOutcome::Dispatched { .. } => self.sent += group.changes,
                GroupOutcome::Skipped { .. } => self.skipped += 1,
                GroupOutcome::Errored { .. } => self.errored += 1,
            }
        }
        self.groups = groups;
    }

    fn skip(mut self, reason: &str) -> Self {
        emit_run_skipped(reason);
        self.skip_reason = Some(reason.to_string());
        self
    }
}

/// Run a single round against `review` and `ci`.
///
/// Errors loading the previous refs or querying the review server abort the
/// round without touching the log file. Dispatch failures are per group. A
/// failed submit aborts the round after the log has been written.
pub async fn run_query(
    config: &PresubmitConfig,
    review: &dyn ReviewServer,
    ci: &dyn CiServer,
) -> Result<RunReport> {
    let run_id = Uuid::new_v4();
    run_round(config, review, ci, run_id)
        .instrument(run_span(&run_id.to_string()))
        .await
}

async fn run_round(
    config: &PresubmitConfig,
    review: &dyn ReviewServer,
    ci: &dyn CiServer,
    run_id: Uuid,
) -> Result<RunReport> {
    let clock = Instant::now();
    let mut report = RunReport::new(run_id);
    let log_file = config.log_file_path();
    emit_run_started(&config.gerrit.query, &log_file.display().to_string());

    // A broken last build means the tree itself is red; retry next round.
    if config.dispatch_enabled() {
        match ci.last_completed_build_status(&config.jenkins.job).await {
            Ok(status) if status.is_failure() => {
                return Ok(finish(
                    report.skip("last completed build failed"),
                    clock,
                ));
            }
            Ok(_) => {}
            Err(e) => emit_recoverable_error("last completed build status", &e),
        }
    }

    let previous = registry::load(&log_file)?;
    let changes = review.query(&config.gerrit.query).await?;
    info!(open = changes.len(), previous = previous.len(), "queried open changes");

    if !config.dispatch_enabled() {
        registry::persist(&log_file, &changes)?;
        return Ok(finish(report.skip("no CI host configured"), clock));
    }
    if previous.is_empty() {
        registry::persist(&log_file, &changes)?;
        return Ok(finish(report.skip("no previous refs"), clock));
    }

    let grouping = new_grouping(&previous, &group_changes(&changes));
    let dispatcher = Dispatcher::new(config, review, ci);
    report.multipart_errors = dispatcher.report_multi_part_errors(&grouping.errors).await;
    let groups = dispatcher.dispatch_groups(&grouping.groups).await;
    report.record(groups);

    registry::persist(&log_file, &changes)?;

    report.submitted = submit_groups(review, &submittable_groups(&changes)).await?;
    Ok(finish(report, clock))
}

fn finish(mut report: RunReport, clock: Instant) -> RunReport {
    report.finished_at = Utc::now();
    emit_run_finished(
        clock.elapsed().as_millis() as u64,
        report.sent,
        report.skipped,
        report.errored,
        report.submitted,
    );
    report
}
