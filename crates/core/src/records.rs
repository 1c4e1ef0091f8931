use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::evidence::RetrievalHit;
use crate::normalization::truncate_chars;

pub const SUPPORT_SNIPPET_CHARS: usize = 350;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Minor,
    Major,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Info => "info",
            Severity::Minor => "minor",
            Severity::Major => "major",
            Severity::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// A rule violation found on an element. `evidence_ref` names the element whose
/// evidence bundle supports the issue; the bundle itself is not copied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub element_id: String,
    pub rule_id: String,
    pub severity: Severity,
    pub message: String,
    pub evidence: String,
    pub evidence_ref: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportingHit {
    pub score: f32,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub text_snippet: String,
}

impl From<&RetrievalHit> for SupportingHit {
    fn from(hit: &RetrievalHit) -> Self {
        Self {
            score: hit.score,
            metadata: hit.metadata.clone(),
            text_snippet: truncate_chars(&hit.text, SUPPORT_SNIPPET_CHARS).to_string(),
        }
    }
}

/// Proposed fix for one (element, issue) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectionCandidate {
    pub candidate_id: String,
    pub element_id: String,
    pub source_path: String,
    pub rule_id: String,
    pub message: String,
    pub script: String,
    pub element_content: String,
    #[serde(default)]
    pub supporting: Vec<SupportingHit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub candidate_id: String,
    pub approved: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supporting_hit_truncates_text() {
        let hit = RetrievalHit::new("x".repeat(400), 0.8);
        let support = SupportingHit::from(&hit);
        assert_eq!(support.text_snippet.chars().count(), SUPPORT_SNIPPET_CHARS);
        assert_eq!(support.score, 0.8);
    }

    #[test]
    fn severity_orders_by_impact() {
        assert!(Severity::Critical > Severity::Major);
        assert_eq!(serde_json::to_string(&Severity::Minor).unwrap(), "\"minor\"");
        assert_eq!(Severity::Info.to_string(), "info");
    }
}
