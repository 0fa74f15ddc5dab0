//! Interfaces to the review server and the CI server.
//!
//! The dispatcher only talks to these traits. Production implementations
//! live in `presubmit-clients`; in-memory fakes for tests live in
//! [`crate::fakes`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::change::Change;
use crate::error::Result;

/// Build parameter carrying the colon-joined refs under test.
pub const REFS_PARAM: &str = "REFS";
/// Build parameter carrying the colon-joined projects under test.
pub const PROJECTS_PARAM: &str = "PROJECTS";
/// Build parameter carrying the space-separated test names.
pub const TESTS_PARAM: &str = "TESTS";

/// Parameters for a new build: name to values.
pub type BuildParams = BTreeMap<String, Vec<String>>;

// ---------------------------------------------------------------------------
// Review server
// ---------------------------------------------------------------------------

/// Code-review server.
#[async_trait]
pub trait ReviewServer: Send + Sync {
    /// Full snapshot of the open changes matching `query`.
    async fn query(&self, query: &str) -> Result<Vec<Change>>;

    /// Post `message` on each of `refs`, optionally voting Verified+1.
    async fn post_review(&self, message: &str, refs: &[String], set_verified: bool)
        -> Result<()>;

    /// Submit each of `refs`, in order, stopping at the first failure.
    async fn submit(&self, refs: &[String]) -> Result<()>;
}

// ---------------------------------------------------------------------------
// CI server
// ---------------------------------------------------------------------------

/// A build waiting in the CI queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedBuild {
    pub id: u64,
    pub params: BTreeMap<String, String>,
}

impl QueuedBuild {
    /// Colon-joined refs the build was queued with, empty if unknown.
    pub fn parse_refs(&self) -> String {
        self.params.get(REFS_PARAM).cloned().unwrap_or_default()
    }
}

/// A build the CI server has started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub number: u64,
    pub building: bool,
    pub params: BTreeMap<String, String>,
}

impl BuildInfo {
    /// Colon-joined refs the build was started with, empty if unknown.
    pub fn parse_refs(&self) -> String {
        self.params.get(REFS_PARAM).cloned().unwrap_or_default()
    }
}

/// Outcome of the last completed build of a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStatus {
    pub number: u64,
    /// CI result string such as `SUCCESS` or `FAILURE`.
    pub result: Option<String>,
}

impl BuildStatus {
    pub fn is_failure(&self) -> bool {
        self.result.as_deref() == Some("FAILURE")
    }
}

/// Continuous-integration server.
#[async_trait]
pub trait CiServer: Send + Sync {
    async fn queued_builds(&self, job: &str) -> Result<Vec<QueuedBuild>>;

    async fn ongoing_builds(&self, job: &str) -> Result<Vec<BuildInfo>>;

    async fn cancel_queued_build(&self, id: u64) -> Result<()>;

    async fn cancel_ongoing_build(&self, job: &str, number: u64) -> Result<()>;

    async fn add_build_with_parameters(&self, job: &str, params: BuildParams) -> Result<()>;

    async fn last_completed_build_status(&self, job: &str) -> Result<BuildStatus>;

    /// URL a person can open to start a build of `job` with `params` by hand.
    fn start_build_link(&self, job: &str, params: &BuildParams) -> String;
}
