//! Jenkins REST client
//!
//! Reads the build queue and running builds of the presubmit job, stops
//! superseded ones, and queues new parameterized builds.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use presubmit_core::{
    BuildInfo, BuildParams, BuildStatus, CiServer, JenkinsConfig, QueuedBuild,
};
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::http::{base_url, build_client, check_status, endpoint};

/// Fields fetched for a job's build list.
const BUILDS_TREE: &str = "builds[number,building,actions[parameters[name,value]]]";

#[derive(Debug, Default, Deserialize)]
struct QueueInfo {
    #[serde(default)]
    items: Vec<QueueItem>,
}

#[derive(Debug, Deserialize)]
struct QueueItem {
    id: u64,
    #[serde(default)]
    task: TaskInfo,
    #[serde(default)]
    actions: Vec<ActionInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct TaskInfo {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct JobInfo {
    #[serde(default)]
    builds: Vec<BuildEntry>,
}

#[derive(Debug, Deserialize)]
struct BuildEntry {
    number: u64,
    #[serde(default)]
    building: bool,
    #[serde(default)]
    actions: Vec<ActionInfo>,
}

/// Build actions are heterogeneous; only parameter actions carry anything
/// of interest, the rest deserialize empty.
#[derive(Debug, Default, Deserialize)]
struct ActionInfo {
    #[serde(default)]
    parameters: Vec<ParameterInfo>,
}

#[derive(Debug, Deserialize)]
struct ParameterInfo {
    name: String,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
struct CompletedBuild {
    #[serde(default)]
    number: u64,
    #[serde(default)]
    result: Option<String>,
}

fn collect_params(actions: Vec<ActionInfo>) -> BTreeMap<String, String> {
    actions
        .into_iter()
        .flat_map(|a| a.parameters)
        .map(|p| {
            let value = match p.value {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (p.name, value)
        })
        .collect()
}

/// Queued builds of `job` from a `/queue/api/json` body.
pub fn parse_queue(body: &str, job: &str) -> Result<Vec<QueuedBuild>> {
    let queue: QueueInfo = serde_json::from_str(body)?;
    Ok(queue
        .items
        .into_iter()
        .filter(|item| item.task.name == job)
        .map(|item| QueuedBuild {
            id: item.id,
            params: collect_params(item.actions),
        })
        .collect())
}

/// Builds listed in a `/job/<job>/api/json` body.
pub fn parse_builds(body: &str) -> Result<Vec<BuildInfo>> {
    let job: JobInfo = serde_json::from_str(body)?;
    Ok(job
        .builds
        .into_iter()
        .map(|b| BuildInfo {
            number: b.number,
            building: b.building,
            params: collect_params(b.actions),
        })
        .collect())
}

/// Status from a `/job/<job>/lastCompletedBuild/api/json` body.
pub fn parse_build_status(body: &str) -> Result<BuildStatus> {
    let build: CompletedBuild = serde_json::from_str(body)?;
    Ok(BuildStatus {
        number: build.number,
        result: build.result,
    })
}

/// Jenkins client bound to one server
///
/// A client built from an empty host is inert: every request fails with
/// [`ClientError::NotConfigured`].
pub struct JenkinsClient {
    base: Option<Url>,
    user: Option<String>,
    token: Option<String>,
    http: Client,
}

impl JenkinsClient {
    pub fn new(config: &JenkinsConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base: if config.host.trim().is_empty() {
                None
            } else {
                Some(base_url(&config.host)?)
            },
            user: config.user.clone(),
            token: config.token.clone(),
            http: build_client(timeout)?,
        })
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.user {
            Some(user) => request.basic_auth(user, self.token.as_deref()),
            None => request,
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let base = self.base.as_ref().ok_or(ClientError::NotConfigured("jenkins"))?;
        Ok(endpoint(base, segments))
    }

    fn job_url(&self, job: &str, rest: &[&str]) -> Result<Url> {
        let mut segments = vec!["job", job];
        segments.extend_from_slice(rest);
        self.url(&segments)
    }

    async fn get_text(&self, url: Url) -> Result<String> {
        debug!(url = %url, "GET");
        let response = self.authed(self.http.get(url)).send().await?;
        Ok(check_status("GET", response).await?.text().await?)
    }

    async fn post_empty(&self, url: Url) -> Result<()> {
        debug!(url = %url, "POST");
        let response = self.authed(self.http.post(url)).send().await?;
        check_status("POST", response).await?;
        Ok(())
    }

    async fn fetch_queue(&self, job: &str) -> Result<Vec<QueuedBuild>> {
        let body = self.get_text(self.url(&["queue", "api", "json"])?).await?;
        parse_queue(&body, job)
    }

    async fn fetch_builds(&self, job: &str) -> Result<Vec<BuildInfo>> {
        let mut url = self.job_url(job, &["api", "json"])?;
        url.query_pairs_mut().append_pair("tree", BUILDS_TREE);
        let body = self.get_text(url).await?;
        parse_builds(&body)
    }

    async fn cancel_queued(&self, id: u64) -> Result<()> {
        let mut url = self.url(&["queue", "cancelItem"])?;
        url.query_pairs_mut().append_pair("id", &id.to_string());
        self.post_empty(url).await
    }

    async fn stop(&self, job: &str, number: u64) -> Result<()> {
        let number = number.to_string();
        self.post_empty(self.job_url(job, &[number.as_str(), "stop"])?)
            .await
    }

    async fn add_build(&self, job: &str, params: &BuildParams) -> Result<()> {
        let url = self.job_url(job, &["buildWithParameters"])?;
        let form: Vec<(&str, &str)> = flatten_params(params);
        debug!(url = %url, "POST");
        let response = self
            .authed(self.http.post(url))
            .form(&form)
            .send()
            .await?;
        check_status("POST", response).await?;
        Ok(())
    }

    async fn fetch_last_status(&self, job: &str) -> Result<BuildStatus> {
        let body = self
            .get_text(self.job_url(job, &["lastCompletedBuild", "api", "json"])?)
            .await?;
        parse_build_status(&body)
    }
}

fn flatten_params(params: &BuildParams) -> Vec<(&str, &str)> {
    params
        .iter()
        .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v.as_str())))
        .collect()
}

#[async_trait]
impl CiServer for JenkinsClient {
    async fn queued_builds(&self, job: &str) -> presubmit_core::Result<Vec<QueuedBuild>> {
        self.fetch_queue(job).await.map_err(|e| e.into_ci())
    }

    async fn ongoing_builds(&self, job: &str) -> presubmit_core::Result<Vec<BuildInfo>> {
        self.fetch_builds(job).await.map_err(|e| e.into_ci())
    }

    async fn cancel_queued_build(&self, id: u64) -> presubmit_core::Result<()> {
        self.cancel_queued(id).await.map_err(|e| e.into_ci())
    }

    async fn cancel_ongoing_build(&self, job: &str, number: u64) -> presubmit_core::Result<()> {
        self.stop(job, number).await.map_err(|e| e.into_ci())
    }

    async fn add_build_with_parameters(
        &self,
        job: &str,
        params: BuildParams,
    ) -> presubmit_core::Result<()> {
        self.add_build(job, &params).await.map_err(|e| e.into_ci())
    }

    async fn last_completed_build_status(&self, job: &str) -> presubmit_core::Result<BuildStatus> {
        self.fetch_last_status(job).await.map_err(|e| e.into_ci())
    }

    fn start_build_link(&self, job: &str, params: &BuildParams) -> String {
        match self.job_url(job, &["buildWithParameters"]) {
            Ok(mut url) => {
                url.query_pairs_mut().extend_pairs(flatten_params(params));
                url.into()
            }
            Err(_) => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use presubmit_core::{PROJECTS_PARAM, REFS_PARAM, TESTS_PARAM};

    fn client() -> JenkinsClient {
        let config = JenkinsConfig {
            host: "https://ci.example.io".to_string(),
            ..JenkinsConfig::default()
        };
        JenkinsClient::new(&config, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_parse_queue_filters_by_job() {
        let body = r#"{
          "items": [
            {
              "id": 31,
              "task": {"name": "presubmit-test"},
              "actions": [
                {"parameters": [
                  {"name": "REFS", "value": "refs/changes/00/100/1"},
                  {"name": "RETRY", "value": true}
                ]},
                {}
              ]
            },
            {"id": 32, "task": {"name": "nightly"}, "actions": []}
          ]
        }"#;
        let queued = parse_queue(body, "presubmit-test").unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].id, 31);
        assert_eq!(queued[0].parse_refs(), "refs/changes/00/100/1");
        assert_eq!(queued[0].params["RETRY"], "true");
    }

    #[test]
    fn test_parse_builds() {
        let body = r#"{
          "builds": [
            {"number": 12, "building": true,
             "actions": [{"parameters": [{"name": "REFS", "value": "refs/changes/00/200/3"}]}]},
            {"number": 11, "building": false, "actions": [{}]}
          ]
        }"#;
        let builds = parse_builds(body).unwrap();
        assert_eq!(builds.len(), 2);
        assert!(builds[0].building);
        assert_eq!(builds[0].parse_refs(), "refs/changes/00/200/3");
        assert_eq!(builds[1].parse_refs(), "");
    }

    #[test]
    fn test_parse_build_status() {
        let status = parse_build_status(r#"{"number": 40, "result": "FAILURE"}"#).unwrap();
        assert!(status.is_failure());
        let status = parse_build_status(r#"{"number": 41, "result": null}"#).unwrap();
        assert!(!status.is_failure());
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(parse_builds("<html>Unauthorized</html>").is_err());
    }

    #[test]
    fn test_start_build_link_encodes_params() {
        let params = BuildParams::from([
            (REFS_PARAM.to_string(), vec!["refs/changes/00/100/2".to_string()]),
            (PROJECTS_PARAM.to_string(), vec!["core".to_string()]),
            (TESTS_PARAM.to_string(), vec!["go-test go-vet".to_string()]),
        ]);
        let link = client().start_build_link("presubmit-test", &params);
        assert_eq!(
            link,
            "https://ci.example.io/job/presubmit-test/buildWithParameters\
             ?PROJECTS=core&REFS=refs%2Fchanges%2F00%2F100%2F2&TESTS=go-test+go-vet"
        );
    }

    #[tokio::test]
    async fn test_client_without_host_is_inert() {
        let client = JenkinsClient::new(&JenkinsConfig::default(), Duration::from_secs(5)).unwrap();
        let err = client.queued_builds("presubmit-test").await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
        assert_eq!(client.start_build_link("presubmit-test", &BuildParams::new()), "");
    }

    #[test]
    fn test_job_url_with_build_number() {
        let url = client().job_url("presubmit-test", &["17", "stop"]).unwrap();
        assert_eq!(url.as_str(), "https://ci.example.io/job/presubmit-test/17/stop");
    }
}
