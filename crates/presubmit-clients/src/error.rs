//! Error types for the HTTP clients

use presubmit_core::PresubmitError;
use thiserror::Error;

/// Errors talking to Gerrit or Jenkins
#[derive(Error, Debug)]
pub enum ClientError {
    /// Transport failure or timeout
    #[error("HTTP error: {0}")]
    Http(String),

    /// Server answered with a non-success status
    #[error("{method} {url} returned {status}: {body}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },

    /// Response body did not match the expected shape
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// No host configured for this server
    #[error("{0} host not configured")]
    NotConfigured(&'static str),

    /// Host is not a usable base URL
    #[error("invalid host URL {0:?}")]
    InvalidHost(String),

    /// Reference passed in did not name a change revision
    #[error(transparent)]
    Ref(#[from] PresubmitError),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Http(err.to_string())
    }
}

impl ClientError {
    /// Error as seen by callers of the review-server interface.
    pub fn into_review(self) -> PresubmitError {
        match self {
            ClientError::Ref(err) => err,
            other => PresubmitError::Review(other.to_string()),
        }
    }

    /// Error as seen by callers of the CI-server interface.
    pub fn into_ci(self) -> PresubmitError {
        match self {
            ClientError::Ref(err) => err,
            other => PresubmitError::Ci(other.to_string()),
        }
    }
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_message() {
        let err = ClientError::Status {
            method: "POST",
            url: "https://ci.example.io/queue/cancelItem?id=3".to_string(),
            status: 403,
            body: "No valid crumb".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "POST https://ci.example.io/queue/cancelItem?id=3 returned 403: No valid crumb"
        );
        assert!(matches!(err.into_ci(), PresubmitError::Ci(_)));
    }

    #[test]
    fn test_ref_errors_pass_through() {
        let err = ClientError::from(PresubmitError::RefParse("bad".to_string()));
        assert!(matches!(err.into_review(), PresubmitError::RefParse(_)));
    }
}
