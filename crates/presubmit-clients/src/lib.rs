//! Presubmit Clients: Gerrit and Jenkins over HTTP
//!
//! Production implementations of the `ReviewServer` and `CiServer`
//! interfaces from `presubmit-core`.

pub mod error;
pub mod gerrit;
mod http;
pub mod jenkins;

pub use error::{ClientError, Result};
pub use gerrit::{parse_query_results, GerritClient};
pub use jenkins::{parse_build_status, parse_builds, parse_queue, JenkinsClient};
