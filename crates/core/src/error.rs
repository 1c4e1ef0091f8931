use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure categories shared by every stage. Serialized into artifacts as the
/// failure marker of an element whose evidence could not be determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RetrievalUnavailable,
    RetrievalTimeout,
    JudgeUnavailable,
    JudgeTimeout,
    MalformedProviderResponse,
    ExtractionFailure,
    ArtifactIoFailure,
    InvalidConfig,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RetrievalUnavailable => "retrieval_unavailable",
            ErrorKind::RetrievalTimeout => "retrieval_timeout",
            ErrorKind::JudgeUnavailable => "judge_unavailable",
            ErrorKind::JudgeTimeout => "judge_timeout",
            ErrorKind::MalformedProviderResponse => "malformed_provider_response",
            ErrorKind::ExtractionFailure => "extraction_failure",
            ErrorKind::ArtifactIoFailure => "artifact_io_failure",
            ErrorKind::InvalidConfig => "invalid_config",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ErrorKind::RetrievalTimeout | ErrorKind::JudgeTimeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum RemedyError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot extract elements from {path:?}: {reason}")]
    Extraction { path: PathBuf, reason: String },
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("invalid profile: {0}")]
    InvalidProfile(String),
}

impl RemedyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RemedyError::Read { .. } | RemedyError::Extraction { .. } => {
                ErrorKind::ExtractionFailure
            }
            RemedyError::SerdeJson(_) | RemedyError::InvalidProfile(_) => ErrorKind::InvalidConfig,
        }
    }
}

pub type Result<T> = std::result::Result<T, RemedyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::MalformedProviderResponse).unwrap();
        assert_eq!(json, "\"malformed_provider_response\"");
        let parsed: ErrorKind = serde_json::from_str("\"judge_timeout\"").unwrap();
        assert_eq!(parsed, ErrorKind::JudgeTimeout);
        assert!(parsed.is_timeout());
        assert_eq!(parsed.to_string(), "judge_timeout");
    }

    #[test]
    fn extraction_errors_map_to_extraction_failure() {
        let err = RemedyError::Extraction {
            path: PathBuf::from("page.html"),
            reason: "binary content".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::ExtractionFailure);
    }
}
