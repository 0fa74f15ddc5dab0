//! Gate new change groups and hand them to the CI server.
//!
//! Each group moves through `Gated -> [Cancelling outdated] -> Dispatched |
//! Skipped | Errored`. Failures are confined to the group they happen in;
//! the dispatcher always moves on to the next group.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::change::{Change, ClPatchsets, PresubmitDirective};
use crate::config::PresubmitConfig;
use crate::error::PresubmitError;
use crate::group::{ChangeGroup, MultiPartError};
use crate::obs::{emit_build_cancelled, emit_group_outcome, emit_recoverable_error};
use crate::outdated::is_build_outdated;
use crate::traits::{BuildParams, CiServer, ReviewServer, PROJECTS_PARAM, REFS_PARAM, TESTS_PARAM};

pub const OPTED_OUT_MESSAGE: &str = "Presubmit tests skipped.\n";
pub const NO_TESTS_MESSAGE: &str = "No tests found.\n";

/// Why a group was not sent to CI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No member belongs to a known project.
    EmptyGroup,
    /// A member's commit message says `PresubmitTest: none`.
    OptedOut,
    /// None of the touched projects has tests configured.
    NoTests,
    /// A member's owner is outside the trusted domains and whitelist.
    UntrustedOwner,
}

/// Terminal state of one group within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GroupOutcome {
    Dispatched { tests: Vec<String> },
    Skipped { reason: SkipReason },
    Errored { error: String },
}

impl GroupOutcome {
    fn label(&self) -> &'static str {
        match self {
            GroupOutcome::Dispatched { .. } => "dispatched",
            GroupOutcome::Skipped { .. } => "skipped",
            GroupOutcome::Errored { .. } => "errored",
        }
    }
}

/// Outcome of one group, as reported at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupReport {
    /// `number/patchset` labels of the members that were considered.
    pub group: String,
    pub changes: usize,
    pub outcome: GroupOutcome,
}

/// Builds cancelled while clearing the way for a group.
#[derive(Debug, Default)]
pub struct CancelReport {
    pub cancelled: usize,
    pub errors: Vec<PresubmitError>,
}

/// What the gating rules need to know about a group.
struct PreparedGroup {
    group: ChangeGroup,
    cls: ClPatchsets,
    opted_out: bool,
    untrusted_owner: bool,
}

/// Applies the dispatch policy to change groups.
pub struct Dispatcher<'a> {
    config: &'a PresubmitConfig,
    review: &'a dyn ReviewServer,
    ci: &'a dyn CiServer,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        config: &'a PresubmitConfig,
        review: &'a dyn ReviewServer,
        ci: &'a dyn CiServer,
    ) -> Self {
        Self { config, review, ci }
    }

    fn job(&self) -> &str {
        &self.config.jenkins.job
    }

    /// Post each multi-part error on the change it names. Returns how many
    /// posts succeeded.
    pub async fn report_multi_part_errors(&self, errors: &[MultiPartError]) -> usize {
        let mut posted = 0;
        for err in errors {
            warn!(change = %err.change.reference, "{err}");
            let reference = err.change.reference.clone();
            let message = format!(
                "failed to process multi-part CL {reference}:\n{}\n",
                err.issue
            );
            match self.review.post_review(&message, &[reference], false).await {
                Ok(()) => posted += 1,
                Err(e) => emit_recoverable_error("post multi-part error", &e),
            }
        }
        posted
    }

    /// Run every group through the policy, in order.
    pub async fn dispatch_groups(&self, groups: &[ChangeGroup]) -> Vec<GroupReport> {
        let mut reports = Vec::with_capacity(groups.len());
        for group in groups {
            let (considered, outcome) = self.dispatch_group(group).await;
            emit_group_outcome(&considered.describe(), outcome.label());
            reports.push(GroupReport {
                group: considered.describe(),
                changes: considered.len(),
                outcome,
            });
        }
        reports
    }

    /// Gate a single group and, if it passes, queue its build. Returns the
    /// members that were considered after project filtering.
    pub async fn dispatch_group(&self, group: &ChangeGroup) -> (ChangeGroup, GroupOutcome) {
        let prepared = self.prepare(group);
        let outcome = self.gate_and_send(&prepared).await;
        (prepared.group, outcome)
    }

    fn prepare(&self, group: &ChangeGroup) -> PreparedGroup {
        let changes: Vec<Change> = group
            .changes
            .iter()
            .filter(|c| {
                let known = self.config.is_known_project(&c.project);
                if !known {
                    info!(project = %c.project, change = %c.reference, "project not known, skipped");
                }
                known
            })
            .cloned()
            .collect();

        let group = ChangeGroup { changes };
        PreparedGroup {
            cls: group.cl_patchsets(),
            opted_out: group
                .changes
                .iter()
                .any(|c| c.presubmit == PresubmitDirective::Skip),
            untrusted_owner: group
                .changes
                .iter()
                .any(|c| !self.config.is_trusted_owner(&c.owner_email)),
            group,
        }
    }

    async fn gate_and_send(&self, prepared: &PreparedGroup) -> GroupOutcome {
        let group = &prepared.group;
        if group.is_empty() {
            return GroupOutcome::Skipped {
                reason: SkipReason::EmptyGroup,
            };
        }
        let refs = group.refs();
        let projects = group.projects();

        if prepared.opted_out {
            return self
                .acknowledge(OPTED_OUT_MESSAGE, &refs, SkipReason::OptedOut)
                .await;
        }

        let tests = self.config.tests_to_run(&projects);
        if tests.is_empty() {
            return self
                .acknowledge(NO_TESTS_MESSAGE, &refs, SkipReason::NoTests)
                .await;
        }

        let params = build_params(&refs, &projects, &tests);

        if prepared.untrusted_owner {
            let link = self.ci.start_build_link(self.job(), &params);
            let message = format!(
                "A team member will manually trigger presubmit tests for this change:\n{link}\n"
            );
            return match self.review.post_review(&message, &refs, false).await {
                Ok(()) => GroupOutcome::Skipped {
                    reason: SkipReason::UntrustedOwner,
                },
                Err(e) => errored("post manual-trigger link", e),
            };
        }

        let cancelled = self.remove_outdated_builds(&prepared.cls).await;
        for err in &cancelled.errors {
            emit_recoverable_error("cancel outdated build", err);
        }

        match self.ci.add_build_with_parameters(self.job(), params).await {
            Ok(()) => {
                info!(group = %group.describe(), tests = tests.len(), "presubmit build added");
                GroupOutcome::Dispatched { tests }
            }
            Err(e) => errored("add presubmit build", e),
        }
    }

    /// Post `message` with Verified+1 and skip the group.
    async fn acknowledge(&self, message: &str, refs: &[String], reason: SkipReason) -> GroupOutcome {
        match self.review.post_review(message, refs, true).await {
            Ok(()) => GroupOutcome::Skipped { reason },
            Err(e) => errored("acknowledge skipped group", e),
        }
    }

    /// Cancel queued and running builds made stale by `group_cls`.
    ///
    /// Nothing here is fatal: errors are collected for the caller to log.
    pub async fn remove_outdated_builds(&self, group_cls: &ClPatchsets) -> CancelReport {
        let mut report = CancelReport::default();
        self.remove_queued_outdated_builds(group_cls, &mut report)
            .await;
        self.remove_ongoing_outdated_builds(group_cls, &mut report)
            .await;
        report
    }

    async fn remove_queued_outdated_builds(&self, group_cls: &ClPatchsets, report: &mut CancelReport) {
        let queued = match self.ci.queued_builds(self.job()).await {
            Ok(queued) => queued,
            Err(e) => {
                report.errors.push(e);
                return;
            }
        };
        for build in queued {
            let refs = build.parse_refs();
            if refs.is_empty() {
                continue;
            }
            match is_build_outdated(&refs, group_cls) {
                Ok(true) => match self.ci.cancel_queued_build(build.id).await {
                    Ok(()) => {
                        emit_build_cancelled(&refs, "queued");
                        report.cancelled += 1;
                    }
                    Err(e) => report.errors.push(e),
                },
                Ok(false) => debug!(refs = %refs, "queued build still current"),
                Err(e) => report.errors.push(e),
            }
        }
    }

    async fn remove_ongoing_outdated_builds(&self, group_cls: &ClPatchsets, report: &mut CancelReport) {
        let ongoing = match self.ci.ongoing_builds(self.job()).await {
            Ok(ongoing) => ongoing,
            Err(e) => {
                report.errors.push(e);
                return;
            }
        };
        for build in ongoing.into_iter().filter(|b| b.building) {
            let refs = build.parse_refs();
            if refs.is_empty() {
                continue;
            }
            match is_build_outdated(&refs, group_cls) {
                Ok(true) => match self.ci.cancel_ongoing_build(self.job(), build.number).await {
                    Ok(()) => {
                        emit_build_cancelled(&refs, "ongoing");
                        report.cancelled += 1;
                    }
                    Err(e) => report.errors.push(e),
                },
                Ok(false) => debug!(refs = %refs, "running build still current"),
                Err(e) => report.errors.push(e),
            }
        }
    }
}

fn errored(context: &str, err: PresubmitError) -> GroupOutcome {
    emit_recoverable_error(context, &err);
    GroupOutcome::Errored {
        error: format!("{context}: {err}"),
    }
}

/// CI parameters for a presubmit build of `refs`.
pub fn build_params(refs: &[String], projects: &[String], tests: &[String]) -> BuildParams {
    BuildParams::from([
        (REFS_PARAM.to_string(), vec![refs.join(":")]),
        (PROJECTS_PARAM.to_string(), vec![projects.join(":")]),
        // The CI job splits the test list on spaces.
        (TESTS_PARAM.to_string(), vec![tests.join(" ")]),
    ])
}
