//! Structured observability hooks for the presubmit run lifecycle.
//!
//! Every event carries an `event` field so log pipelines can filter on it;
//! a run's events are emitted inside the span returned by [`run_span`].

use tracing::{info, warn, Span};

/// Span tagging everything a run logs with its `run_id`.
///
/// Attach it with `tracing::Instrument` rather than entering it, since the
/// run awaits network calls.
pub fn run_span(run_id: &str) -> Span {
    tracing::info_span!("presubmit.run", run_id = %run_id)
}

pub fn emit_run_started(query: &str, log_file: &str) {
    info!(event = "run.started", query = %query, log_file = %log_file);
}

/// The round ended early without dispatching anything.
pub fn emit_run_skipped(reason: &str) {
    info!(event = "run.skipped", reason = %reason);
}

pub fn emit_group_outcome(group: &str, outcome: &str) {
    info!(event = "group.outcome", group = %group, outcome = %outcome);
}

pub fn emit_build_cancelled(refs: &str, kind: &str) {
    info!(event = "build.cancelled", refs = %refs, kind = %kind);
}

pub fn emit_group_submitted(group: &str) {
    info!(event = "group.submitted", group = %group);
}

pub fn emit_run_finished(
    duration_ms: u64,
    sent: usize,
    skipped: usize,
    errored: usize,
    submitted: usize,
) {
    info!(
        event = "run.finished",
        duration_ms = duration_ms,
        sent = sent,
        skipped = skipped,
        errored = errored,
        submitted = submitted,
    );
}

/// A per-group or best-effort failure that did not abort the run.
pub fn emit_recoverable_error(context: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.recoverable_error", context = %context, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _entered = run_span("test-run-id").entered();
        emit_run_skipped("test");
    }
}
