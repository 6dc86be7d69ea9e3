use std::path::PathBuf;
use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while building or running the engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
    /// Aggregated pre-start validation failure. Every malformed job is listed,
    /// not just the first one encountered.
    #[error("Invalid configuration:\n{}", issues.join("\n"))]
    ConfigInvalid { issues: Vec<String> },
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Scan root unreadable: {path}: {source}")]
    ScanFatal {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn invalid_pattern(pattern: impl Into<String>, source: regex::Error) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            source,
        }
    }

    pub fn config_invalid(issues: Vec<String>) -> Self {
        Self::ConfigInvalid { issues }
    }

    pub fn scan_fatal(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ScanFatal {
            path: path.into(),
            source,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let source = regex::Regex::new("(").unwrap_err();
        let err = EngineError::invalid_pattern("(", source);
        assert!(matches!(err, EngineError::InvalidPattern { .. }));

        let err = EngineError::scan_fatal(
            "/no/such/root",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert!(matches!(err, EngineError::ScanFatal { .. }));
    }

    #[test]
    fn test_config_invalid_lists_every_issue() {
        let err = EngineError::config_invalid(vec![
            "job 0: invalid regex".to_string(),
            "job 2: empty script".to_string(),
        ]);
        let rendered = err.to_string();
        assert!(rendered.contains("job 0: invalid regex"));
        assert!(rendered.contains("job 2: empty script"));
    }
}
