//! Presubmit Core Library
//!
//! Finds new patchsets among open review changes, cancels CI builds they
//! supersede, queues presubmit builds for them, and submits approved
//! changes that asked to land.

pub mod change;
pub mod config;
pub mod diff;
pub mod dispatch;
pub mod error;
pub mod fakes;
pub mod group;
pub mod obs;
pub mod outdated;
pub mod query;
pub mod registry;
pub mod submit;
pub mod telemetry;
pub mod traits;

pub use change::{
    parse_auto_submit, parse_multi_part, parse_presubmit_directive, Change, ClPatchsets, ClRef, MultiPartMarker,
    PresubmitDirective,
};
pub use config::{
    GerritConfig, JenkinsConfig, PolicyConfig, PresubmitConfig, ProjectConfig, TestConfig,
};
pub use diff::{has_new_member, new_groups, new_grouping};
pub use dispatch::{
    build_params, CancelReport, Dispatcher, GroupOutcome, GroupReport, SkipReason,
};
pub use error::{PresubmitError, Result};
pub use group::{group_changes, ChangeGroup, Grouping, MultiPartError, MultiPartIssue};
pub use outdated::{is_build_outdated, parse_build_refs};
pub use query::{run_query, RunReport};
pub use submit::{submit_groups, submittable_groups};
pub use telemetry::init_tracing;
pub use traits::{
    BuildInfo, BuildParams, BuildStatus, CiServer, QueuedBuild, ReviewServer, PROJECTS_PARAM,
    REFS_PARAM, TESTS_PARAM,
};
