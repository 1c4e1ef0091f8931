use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ErrorKind;

/// One scored reference passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub text: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl RetrievalHit {
    pub fn new(text: impl Into<String>, score: f32) -> Self {
        Self {
            text: text.into(),
            score,
            metadata: Map::new(),
            embedding: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// The query issued for an element and the hits it produced, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub query: String,
    pub hits: Vec<RetrievalHit>,
}

/// Result of enriching one element. `Empty` is a legitimate answer ("nothing
/// relevant enough"), `Failed` means the answer could not be determined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EvidenceOutcome {
    Found(EvidenceBundle),
    Empty {
        query: String,
    },
    Failed {
        query: String,
        kind: ErrorKind,
        message: String,
    },
}

impl EvidenceOutcome {
    pub fn from_hits(query: String, hits: Vec<RetrievalHit>) -> Self {
        if hits.is_empty() {
            EvidenceOutcome::Empty { query }
        } else {
            EvidenceOutcome::Found(EvidenceBundle { query, hits })
        }
    }

    pub fn query(&self) -> &str {
        match self {
            EvidenceOutcome::Found(bundle) => &bundle.query,
            EvidenceOutcome::Empty { query } | EvidenceOutcome::Failed { query, .. } => query,
        }
    }

    /// Hits backing downstream decisions; no hits for `Empty` and `Failed`.
    pub fn hits(&self) -> &[RetrievalHit] {
        match self {
            EvidenceOutcome::Found(bundle) => &bundle.hits,
            _ => &[],
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, EvidenceOutcome::Failed { .. })
    }

    pub fn status(&self) -> &'static str {
        match self {
            EvidenceOutcome::Found(_) => "found",
            EvidenceOutcome::Empty { .. } => "empty",
            EvidenceOutcome::Failed { .. } => "failed",
        }
    }
}
