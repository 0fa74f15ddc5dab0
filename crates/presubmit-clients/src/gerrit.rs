//! Gerrit REST client
//!
//! Queries open changes, posts review messages and submits changes through
//! the authenticated `/a/` endpoints.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use presubmit_core::{Change, ClRef, GerritConfig, ReviewServer};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::http::{base_url, build_client, check_status, endpoint};

/// Gerrit prepends this to every JSON body to defeat XSSI.
const XSSI_PREFIX: &str = ")]}'";

/// Extra fields requested with every query.
const QUERY_OPTIONS: [&str; 4] = [
    "CURRENT_REVISION",
    "CURRENT_COMMIT",
    "DETAILED_ACCOUNTS",
    "SUBMITTABLE",
];

#[derive(Debug, Default, Deserialize)]
struct ChangeInfo {
    #[serde(default)]
    change_id: String,
    #[serde(rename = "_number", default)]
    number: u64,
    #[serde(default)]
    project: String,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    owner: AccountInfo,
    #[serde(default)]
    current_revision: Option<String>,
    #[serde(default)]
    revisions: HashMap<String, RevisionInfo>,
    #[serde(default)]
    submittable: bool,
}

#[derive(Debug, Default, Deserialize)]
struct AccountInfo {
    #[serde(default)]
    email: String,
}

#[derive(Debug, Default, Deserialize)]
struct RevisionInfo {
    #[serde(rename = "_number", default)]
    number: u64,
    #[serde(rename = "ref", default)]
    reference: String,
    #[serde(default)]
    fetch: HashMap<String, FetchInfo>,
    #[serde(default)]
    commit: Option<CommitInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct FetchInfo {
    #[serde(rename = "ref", default)]
    reference: String,
}

#[derive(Debug, Default, Deserialize)]
struct CommitInfo {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
struct ReviewInput<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<&'static str, i32>,
}

impl ChangeInfo {
    fn into_change(self) -> Change {
        let revision = self
            .current_revision
            .as_ref()
            .and_then(|rev| self.revisions.get(rev));

        let reference = revision
            .map(|r| {
                if r.reference.is_empty() {
                    r.fetch
                        .get("http")
                        .or_else(|| r.fetch.values().next())
                        .map(|f| f.reference.clone())
                        .unwrap_or_default()
                } else {
                    r.reference.clone()
                }
            })
            .unwrap_or_default();
        let message = revision
            .and_then(|r| r.commit.as_ref())
            .map(|c| c.message.clone())
            .unwrap_or_default();

        let parsed: Option<ClRef> = reference.parse().ok();
        let number = parsed.map(|r| r.number).unwrap_or(self.number);
        let patchset = parsed
            .map(|r| r.patchset)
            .or_else(|| revision.map(|r| r.number))
            .unwrap_or_default();

        let mut change = Change::new(number, patchset, self.project)
            .with_change_id(self.change_id)
            .with_owner(self.owner.email)
            .with_reference(reference)
            .with_message(message)
            .with_submittable(self.submittable);
        if let Some(topic) = self.topic {
            change = change.with_topic(topic);
        }
        change
    }
}

/// Parse the body of a change query into changes, in server order.
pub fn parse_query_results(body: &str) -> Result<Vec<Change>> {
    let json = body.trim_start();
    let json = json.strip_prefix(XSSI_PREFIX).unwrap_or(json);
    let infos: Vec<ChangeInfo> = serde_json::from_str(json)?;
    Ok(infos.into_iter().map(ChangeInfo::into_change).collect())
}

/// Gerrit client for change queries and reviews
pub struct GerritClient {
    base: Url,
    user: Option<String>,
    password: Option<String>,
    http: Client,
}

impl GerritClient {
    pub fn new(config: &GerritConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base: base_url(&config.host)?,
            user: config.user.clone(),
            password: config.password.clone(),
            http: build_client(timeout)?,
        })
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.user {
            Some(user) => request.basic_auth(user, self.password.as_deref()),
            None => request,
        }
    }

    /// URL of a change query.
    pub fn query_url(&self, query: &str) -> Url {
        let mut url = endpoint(&self.base, &["a", "changes", ""]);
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("q", query);
            for option in QUERY_OPTIONS {
                pairs.append_pair("o", option);
            }
        }
        url
    }

    /// URL a review of `cl` is posted to.
    pub fn review_url(&self, cl: &ClRef) -> Url {
        let number = cl.number.to_string();
        let patchset = cl.patchset.to_string();
        endpoint(
            &self.base,
            &["a", "changes", &number, "revisions", &patchset, "review"],
        )
    }

    /// URL that submits the patchset `cl` names.
    pub fn submit_url(&self, cl: &ClRef) -> Url {
        let number = cl.number.to_string();
        let patchset = cl.patchset.to_string();
        endpoint(
            &self.base,
            &["a", "changes", &number, "revisions", &patchset, "submit"],
        )
    }

    async fn fetch_changes(&self, query: &str) -> Result<Vec<Change>> {
        let url = self.query_url(query);
        debug!(url = %url, "querying gerrit");
        let response = self.authed(self.http.get(url)).send().await?;
        let body = check_status("GET", response).await?.text().await?;
        parse_query_results(&body)
    }

    async fn post(&self, reference: &str, input: &ReviewInput<'_>) -> Result<()> {
        let cl: ClRef = reference.parse()?;
        let response = self
            .authed(self.http.post(self.review_url(&cl)))
            .json(input)
            .send()
            .await?;
        check_status("POST", response).await?;
        Ok(())
    }

    async fn submit_one(&self, reference: &str) -> Result<()> {
        let cl: ClRef = reference.parse()?;
        let url = self.submit_url(&cl);
        debug!(url = %url, "submitting change");
        let response = self.authed(self.http.post(url)).send().await?;
        check_status("POST", response).await?;
        Ok(())
    }
}

#[async_trait]
impl ReviewServer for GerritClient {
    async fn query(&self, query: &str) -> presubmit_core::Result<Vec<Change>> {
        self.fetch_changes(query)
            .await
            .map_err(|e| e.into_review())
    }

    async fn post_review(
        &self,
        message: &str,
        refs: &[String],
        set_verified: bool,
    ) -> presubmit_core::Result<()> {
        let mut labels = BTreeMap::new();
        if set_verified {
            labels.insert("Verified", 1);
        }
        let input = ReviewInput { message, labels };
        for reference in refs {
            if let Err(e) = self.post(reference, &input).await {
                warn!(reference = %reference, "posting review failed");
                return Err(e.into_review());
            }
        }
        Ok(())
    }

    async fn submit(&self, refs: &[String]) -> presubmit_core::Result<()> {
        for reference in refs {
            if let Err(e) = self.submit_one(reference).await {
                warn!(reference = %reference, "submit failed");
                return Err(e.into_review());
            }
        }
        Ok(())
    }
}
