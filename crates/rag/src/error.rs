use thiserror::Error;

use remedy_core::ErrorKind;
use remedy_llm::LlmError;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("embedding index unavailable: {0}")]
    IndexUnavailable(String),
    #[error("embedding index did not answer within {0} ms")]
    IndexTimeout(u64),
    #[error("judge unavailable: {0}")]
    JudgeUnavailable(String),
    #[error("judge did not answer within {0} ms")]
    JudgeTimeout(u64),
    #[error("malformed provider response: {0}")]
    Malformed(String),
    #[error("invalid retrieval config: {0}")]
    InvalidConfig(String),
}

impl RetrievalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RetrievalError::IndexUnavailable(_) => ErrorKind::RetrievalUnavailable,
            RetrievalError::IndexTimeout(_) => ErrorKind::RetrievalTimeout,
            RetrievalError::JudgeUnavailable(_) => ErrorKind::JudgeUnavailable,
            RetrievalError::JudgeTimeout(_) => ErrorKind::JudgeTimeout,
            RetrievalError::Malformed(_) => ErrorKind::MalformedProviderResponse,
            RetrievalError::InvalidConfig(_) => ErrorKind::InvalidConfig,
        }
    }

    /// Failures raised while reranking, as opposed to fetching candidates.
    pub fn is_judge_failure(&self) -> bool {
        matches!(
            self,
            RetrievalError::JudgeUnavailable(_)
                | RetrievalError::JudgeTimeout(_)
                | RetrievalError::Malformed(_)
        )
    }
}

impl From<LlmError> for RetrievalError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::MissingApiKey { .. } | LlmError::InvalidApiKey { .. } => {
                RetrievalError::InvalidConfig(err.to_string())
            }
            err if err.is_malformed() => RetrievalError::Malformed(err.to_string()),
            err => RetrievalError::JudgeUnavailable(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RetrievalError>;
