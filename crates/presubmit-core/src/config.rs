//! Dispatcher configuration.
//!
//! Loaded from TOML and passed explicitly to every component; nothing here is
//! read from process-wide state except `$HOME` when expanding the log path.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PresubmitError, Result};

pub const DEFAULT_QUERY: &str = "status:open";
pub const DEFAULT_JOB: &str = "presubmit-test";
pub const DEFAULT_LOG_FILE: &str = "${HOME}/tmp/presubmit_log";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Review server (Gerrit) settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GerritConfig {
    pub host: String,
    /// Query selecting the open changes to consider.
    pub query: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for GerritConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            query: DEFAULT_QUERY.to_string(),
            user: None,
            password: None,
        }
    }
}

/// CI server (Jenkins) settings. An empty host disables dispatching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JenkinsConfig {
    pub host: String,
    pub job: String,
    pub user: Option<String>,
    pub token: Option<String>,
}

impl Default for JenkinsConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            job: DEFAULT_JOB.to_string(),
            user: None,
            token: None,
        }
    }
}

/// Gating and bookkeeping settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Where the refs seen by the previous run are kept.
    pub log_file: String,
    /// Owner email domains whose changes are tested automatically.
    pub trusted_domains: Vec<String>,
    /// Individual owner emails trusted regardless of domain.
    pub email_whitelist: Vec<String>,
    /// Projects eligible for presubmit; empty accepts every project.
    pub known_projects: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            log_file: DEFAULT_LOG_FILE.to_string(),
            trusted_domains: Vec::new(),
            email_whitelist: Vec::new(),
            known_projects: Vec::new(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub tests: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    /// Shard count minus one; a test with `parts = n` runs as `n + 1` shards.
    pub parts: Option<u32>,
}

/// Full dispatcher configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresubmitConfig {
    pub gerrit: GerritConfig,
    pub jenkins: JenkinsConfig,
    pub presubmit: PolicyConfig,
    pub projects: BTreeMap<String, ProjectConfig>,
    pub tests: BTreeMap<String, TestConfig>,
}

impl PresubmitConfig {
    /// Read and parse a TOML configuration file without validating it, so
    /// callers can layer overrides first.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Read, parse and validate a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let config = Self::from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.gerrit.host.trim().is_empty() {
            return Err(PresubmitError::Config("gerrit.host must be set".to_string()));
        }
        if self.dispatch_enabled() && self.jenkins.job.trim().is_empty() {
            return Err(PresubmitError::Config(
                "jenkins.job must be set when jenkins.host is".to_string(),
            ));
        }
        if self.presubmit.request_timeout_secs == 0 {
            return Err(PresubmitError::Config(
                "presubmit.request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Builds are only queued when a CI host is configured.
    pub fn dispatch_enabled(&self) -> bool {
        !self.jenkins.host.trim().is_empty()
    }

    /// The log path with `$HOME` expanded.
    pub fn log_file_path(&self) -> PathBuf {
        expand_home(&self.presubmit.log_file)
    }

    pub fn is_known_project(&self, project: &str) -> bool {
        self.presubmit.known_projects.is_empty()
            || self.presubmit.known_projects.iter().any(|p| p == project)
    }

    /// Whether changes owned by `email` may be tested without a human
    /// starting the build.
    pub fn is_trusted_owner(&self, email: &str) -> bool {
        let email = email.trim().to_ascii_lowercase();
        if email.is_empty() {
            return false;
        }
        let in_domain = self.presubmit.trusted_domains.iter().any(|domain| {
            let domain = domain.trim_start_matches('@').to_ascii_lowercase();
            email.ends_with(&format!("@{domain}"))
        });
        in_domain
            || self
                .presubmit
                .email_whitelist
                .iter()
                .any(|w| w.to_ascii_lowercase() == email)
    }

    /// Configured tests of `projects`, deduplicated and sorted.
    pub fn project_tests(&self, projects: &[String]) -> Vec<String> {
        let tests: BTreeSet<&String> = projects
            .iter()
            .filter_map(|p| self.projects.get(p))
            .flat_map(|p| p.tests.iter())
            .collect();
        tests.into_iter().cloned().collect()
    }

    /// Test names to pass to the CI build for `projects`, with sharded tests
    /// expanded to `<test>-part<i>` and the list sorted.
    pub fn tests_to_run(&self, projects: &[String]) -> Vec<String> {
        let mut tests = Vec::new();
        for test in self.project_tests(projects) {
            match self.tests.get(&test).and_then(|t| t.parts) {
                Some(parts) => {
                    tests.extend((0..=parts).map(|i| test_name_with_part_suffix(&test, i)))
                }
                None => tests.push(test),
            }
        }
        tests.sort();
        tests
    }
}

pub fn test_name_with_part_suffix(test: &str, part: u32) -> String {
    format!("{test}-part{part}")
}

/// Expand `${HOME}`, `$HOME` and a leading `~/` in `raw`.
pub fn expand_home(raw: &str) -> PathBuf {
    let Ok(home) = std::env::var("HOME") else {
        return PathBuf::from(raw);
    };
    let expanded = if let Some(rest) = raw.strip_prefix("~/") {
        format!("{home}/{rest}")
    } else {
        raw.replace("${HOME}", &home).replace("$HOME", &home)
    };
    PathBuf::from(expanded)
}
