//! Error types for pipeline operations.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::run::RunState;

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Fatal errors that halt a pipeline run.
///
/// Per-record validation rejections are not errors: they are counted on the
/// run statistics by the validator and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Source unavailable: {location}: {reason}")]
    SourceUnavailable { location: String, reason: String },

    #[error("Pipeline produced no valid records")]
    EmptyResult,

    #[error("Write failure at {}: {reason}", path.display())]
    WriteFailure { path: PathBuf, reason: String },

    #[error("{stage} stage timed out after {limit:?}")]
    Timeout { stage: RunState, limit: Duration },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn source_unavailable(location: impl Into<String>, reason: impl fmt::Display) -> Self {
        PipelineError::SourceUnavailable {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    pub fn write_failure(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        PipelineError::WriteFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Stable classification of this error, reported alongside the failing stage.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::SourceUnavailable { .. } => ErrorKind::SourceUnavailable,
            PipelineError::EmptyResult => ErrorKind::PipelineEmptyResult,
            PipelineError::WriteFailure { .. } => ErrorKind::WriteFailure,
            PipelineError::Timeout { .. } => ErrorKind::Timeout,
            PipelineError::Configuration(_) => ErrorKind::InvalidConfiguration,
            PipelineError::InvalidArtifact(_) => ErrorKind::InvalidArtifact,
            PipelineError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Error taxonomy shared by failures and warnings on a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SourceUnavailable,
    PipelineEmptyResult,
    WriteFailure,
    Timeout,
    InvalidConfiguration,
    InvalidArtifact,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SourceUnavailable => "SourceUnavailable",
            ErrorKind::PipelineEmptyResult => "PipelineEmptyResult",
            ErrorKind::WriteFailure => "WriteFailure",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::InvalidConfiguration => "InvalidConfiguration",
            ErrorKind::InvalidArtifact => "InvalidArtifact",
            ErrorKind::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            PipelineError::source_unavailable("a.jsonl", "missing").kind(),
            ErrorKind::SourceUnavailable
        );
        assert_eq!(PipelineError::EmptyResult.kind(), ErrorKind::PipelineEmptyResult);
        assert_eq!(
            PipelineError::write_failure("/out", "denied").kind(),
            ErrorKind::WriteFailure
        );
        let timeout = PipelineError::Timeout {
            stage: RunState::Loading,
            limit: Duration::from_secs(1),
        };
        assert_eq!(timeout.kind(), ErrorKind::Timeout);
        assert_eq!(timeout.to_string(), "Loading stage timed out after 1s");
    }

    #[test]
    fn test_messages_name_location() {
        let err = PipelineError::source_unavailable("logs/a.jsonl", "No such file");
        assert!(err.to_string().contains("logs/a.jsonl"));
        assert_eq!(ErrorKind::WriteFailure.to_string(), "WriteFailure");
    }
}
