//! Error taxonomy for the presubmit dispatcher.

/// Presubmit errors.
///
/// `Parse` and `Review` raised while loading the log or querying the review
/// server are fatal for a run. The remaining variants are reported per change
/// group and never abort the run.
#[derive(Debug, thiserror::Error)]
pub enum PresubmitError {
    #[error("log parse error at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("invalid ref: {0}")]
    RefParse(String),

    #[error("review server error: {0}")]
    Review(String),

    #[error("ci server error: {0}")]
    Ci(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for presubmit operations.
pub type Result<T> = std::result::Result<T, PresubmitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display_names_line() {
        let err = PresubmitError::Parse {
            line: 3,
            reason: "not a ref".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("line 3"));
        assert!(msg.contains("not a ref"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: PresubmitError = io.into();
        assert!(matches!(err, PresubmitError::Io(_)));
        assert!(err.to_string().contains("denied"));
    }
}
