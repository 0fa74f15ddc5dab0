//! In-memory fakes for the server traits (testing only)
//!
//! Provides `MemoryReviewServer` and `MemoryCiServer`, which serve canned
//! state and record every call so tests can assert on side effects.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::change::Change;
use crate::error::{PresubmitError, Result};
use crate::traits::*;

// ---------------------------------------------------------------------------
// MemoryReviewServer
// ---------------------------------------------------------------------------

/// A review posted through [`MemoryReviewServer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedReview {
    pub reference: String,
    pub message: String,
    pub verified: bool,
}

/// In-memory review server returning a fixed change list.
#[derive(Debug, Default)]
pub struct MemoryReviewServer {
    changes: Mutex<Vec<Change>>,
    queries: Mutex<Vec<String>>,
    posts: Mutex<Vec<PostedReview>>,
    fail_query: Mutex<bool>,
    fail_posts_to: Mutex<HashSet<String>>,
    submits: Mutex<Vec<String>>,
    fail_submits_to: Mutex<HashSet<String>>,
}

impl MemoryReviewServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_changes(changes: Vec<Change>) -> Self {
        let server = Self::default();
        server.set_changes(changes);
        server
    }

    /// Replace the open changes returned by the next query.
    pub fn set_changes(&self, changes: Vec<Change>) {
        *self.changes.lock().unwrap() = changes;
    }

    /// Make every query fail.
    pub fn fail_queries(&self, fail: bool) {
        *self.fail_query.lock().unwrap() = fail;
    }

    /// Make posts to `reference` fail.
    pub fn fail_posts_to(&self, reference: &str) {
        self.fail_posts_to
            .lock()
            .unwrap()
            .insert(reference.to_string());
    }

    /// Make submits of `reference` fail.
    pub fn fail_submits_to(&self, reference: &str) {
        self.fail_submits_to
            .lock()
            .unwrap()
            .insert(reference.to_string());
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn posts(&self) -> Vec<PostedReview> {
        self.posts.lock().unwrap().clone()
    }

    /// Refs submitted so far, in submit order.
    pub fn submits(&self) -> Vec<String> {
        self.submits.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReviewServer for MemoryReviewServer {
    async fn query(&self, query: &str) -> Result<Vec<Change>> {
        self.queries.lock().unwrap().push(query.to_string());
        if *self.fail_query.lock().unwrap() {
            return Err(PresubmitError::Review(format!("query {query:?} failed")));
        }
        Ok(self.changes.lock().unwrap().clone())
    }

    async fn post_review(
        &self,
        message: &str,
        refs: &[String],
        set_verified: bool,
    ) -> Result<()> {
        let failing = self.fail_posts_to.lock().unwrap();
        let mut posts = self.posts.lock().unwrap();
        for reference in refs {
            if failing.contains(reference) {
                return Err(PresubmitError::Review(format!(
                    "post to {reference} failed"
                )));
            }
            posts.push(PostedReview {
                reference: reference.clone(),
                message: message.to_string(),
                verified: set_verified,
            });
        }
        Ok(())
    }

    async fn submit(&self, refs: &[String]) -> Result<()> {
        let failing = self.fail_submits_to.lock().unwrap();
        let mut submits = self.submits.lock().unwrap();
        for reference in refs {
            if failing.contains(reference) {
                return Err(PresubmitError::Review(format!(
                    "submit of {reference} failed"
                )));
            }
            submits.push(reference.clone());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryCiServer
// ---------------------------------------------------------------------------

/// A build added through [`MemoryCiServer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedBuild {
    pub job: String,
    pub params: BuildParams,
}

impl AddedBuild {
    /// First value of parameter `name`, empty if absent.
    pub fn param(&self, name: &str) -> &str {
        self.params
            .get(name)
            .and_then(|v| v.first())
            .map(String::as_str)
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct CiState {
    queued: Vec<QueuedBuild>,
    ongoing: Vec<BuildInfo>,
    last_status: BuildStatus,
    added: Vec<AddedBuild>,
    cancelled_queued: Vec<u64>,
    cancelled_ongoing: Vec<(String, u64)>,
    fail_adds: bool,
    fail_cancels: bool,
    fail_status: bool,
}

/// In-memory CI server with a build queue and a list of running builds.
#[derive(Debug, Default)]
pub struct MemoryCiServer {
    state: Mutex<CiState>,
}

impl MemoryCiServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_queued(&self, builds: Vec<QueuedBuild>) {
        self.state.lock().unwrap().queued = builds;
    }

    pub fn set_ongoing(&self, builds: Vec<BuildInfo>) {
        self.state.lock().unwrap().ongoing = builds;
    }

    pub fn set_last_status(&self, status: BuildStatus) {
        self.state.lock().unwrap().last_status = status;
    }

    pub fn fail_adds(&self, fail: bool) {
        self.state.lock().unwrap().fail_adds = fail;
    }

    pub fn fail_cancels(&self, fail: bool) {
        self.state.lock().unwrap().fail_cancels = fail;
    }

    pub fn fail_status(&self, fail: bool) {
        self.state.lock().unwrap().fail_status = fail;
    }

    pub fn added(&self) -> Vec<AddedBuild> {
        self.state.lock().unwrap().added.clone()
    }

    pub fn queued(&self) -> Vec<QueuedBuild> {
        self.state.lock().unwrap().queued.clone()
    }

    pub fn cancelled_queued(&self) -> Vec<u64> {
        self.state.lock().unwrap().cancelled_queued.clone()
    }

    pub fn cancelled_ongoing(&self) -> Vec<(String, u64)> {
        self.state.lock().unwrap().cancelled_ongoing.clone()
    }
}

#[async_trait]
impl CiServer for MemoryCiServer {
    async fn queued_builds(&self, _job: &str) -> Result<Vec<QueuedBuild>> {
        Ok(self.state.lock().unwrap().queued.clone())
    }

    async fn ongoing_builds(&self, _job: &str) -> Result<Vec<BuildInfo>> {
        Ok(self.state.lock().unwrap().ongoing.clone())
    }

    async fn cancel_queued_build(&self, id: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_cancels {
            return Err(PresubmitError::Ci(format!("cancel queued {id} failed")));
        }
        state.queued.retain(|b| b.id != id);
        state.cancelled_queued.push(id);
        Ok(())
    }

    async fn cancel_ongoing_build(&self, job: &str, number: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_cancels {
            return Err(PresubmitError::Ci(format!("stop {job}#{number} failed")));
        }
        for build in state.ongoing.iter_mut().filter(|b| b.number == number) {
            build.building = false;
        }
        state.cancelled_ongoing.push((job.to_string(), number));
        Ok(())
    }

    async fn add_build_with_parameters(&self, job: &str, params: BuildParams) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_adds {
            return Err(PresubmitError::Ci(format!("add build to {job} failed")));
        }
        state.added.push(AddedBuild {
            job: job.to_string(),
            params,
        });
        Ok(())
    }

    async fn last_completed_build_status(&self, job: &str) -> Result<BuildStatus> {
        let state = self.state.lock().unwrap();
        if state.fail_status {
            return Err(PresubmitError::Ci(format!("no status for {job}")));
        }
        Ok(state.last_status.clone())
    }

    fn start_build_link(&self, job: &str, params: &BuildParams) -> String {
        let query = params
            .iter()
            .map(|(name, values)| format!("{name}={}", values.join(",")))
            .collect::<Vec<_>>()
            .join("&");
        format!("memory://{job}/buildWithParameters?{query}")
    }
}
