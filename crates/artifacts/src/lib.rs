//! On-disk stage artifacts. Every stage writes exactly one self-contained JSON
//! document and the next stage reads exactly that document back.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use remedy_core::{
    Element, ErrorKind, EvidenceOutcome, InjectionCandidate, Issue, ReviewDecision,
};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Enrichment,
    IssueDetection,
    CandidateGeneration,
    Review,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Enrichment => "enrichment",
            Stage::IssueDetection => "issue_detection",
            Stage::CandidateGeneration => "candidate_generation",
            Stage::Review => "review",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            Stage::Enrichment => "rag_elements.json",
            Stage::IssueDetection => "wcag_issues.json",
            Stage::CandidateGeneration => "injection_candidates.json",
            Stage::Review => "final_injections.json",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub stage: Stage,
    pub schema_version: u32,
    pub source_path: String,
    #[serde(default)]
    pub counts: BTreeMap<String, usize>,
}

impl ArtifactMetadata {
    pub fn new(stage: Stage, source_path: impl Into<String>) -> Self {
        Self {
            stage,
            schema_version: SCHEMA_VERSION,
            source_path: source_path.into(),
            counts: BTreeMap::new(),
        }
    }

    pub fn with_count(mut self, key: &str, value: usize) -> Self {
        self.counts.insert(key.to_string(), value);
        self
    }

    pub fn count(&self, key: &str) -> usize {
        self.counts.get(key).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementEvidence {
    pub element: Element,
    pub evidence: EvidenceOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementsArtifact {
    pub metadata: ArtifactMetadata,
    pub elements: Vec<ElementEvidence>,
}

/// Issues plus the element records they were derived from, so the next stage
/// can resolve `Issue::evidence_ref` without reading another artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuesArtifact {
    pub metadata: ArtifactMetadata,
    pub elements: Vec<ElementEvidence>,
    pub issues: Vec<Issue>,
}

impl IssuesArtifact {
    pub fn element(&self, element_id: &str) -> Option<&ElementEvidence> {
        self.elements
            .iter()
            .find(|entry| entry.element.id == element_id)
    }

    pub fn evidence_for(&self, issue: &Issue) -> Option<&EvidenceOutcome> {
        self.element(&issue.evidence_ref).map(|entry| &entry.evidence)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatesArtifact {
    pub metadata: ArtifactMetadata,
    pub candidates: Vec<InjectionCandidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalArtifact {
    pub metadata: ArtifactMetadata,
    pub decisions: Vec<ReviewDecision>,
    pub accepted: Vec<InjectionCandidate>,
}

pub trait Artifact: Serialize + DeserializeOwned {
    const STAGE: Stage;

    fn metadata(&self) -> &ArtifactMetadata;
}

impl Artifact for ElementsArtifact {
    const STAGE: Stage = Stage::Enrichment;

    fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }
}

impl Artifact for IssuesArtifact {
    const STAGE: Stage = Stage::IssueDetection;

    fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }
}

impl Artifact for CandidatesArtifact {
    const STAGE: Stage = Stage::CandidateGeneration;

    fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }
}

impl Artifact for FinalArtifact {
    const STAGE: Stage = Stage::Review;

    fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }
}

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("artifact json error at {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("artifact {path:?} belongs to stage {found}, expected {expected}")]
    StageMismatch {
        path: PathBuf,
        expected: Stage,
        found: Stage,
    },
    #[error("artifact {path:?} has schema version {found}, expected {expected}")]
    SchemaVersion {
        path: PathBuf,
        expected: u32,
        found: u32,
    },
}

impl ArtifactError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ArtifactIoFailure
    }
}

pub type Result<T> = std::result::Result<T, ArtifactError>;

pub fn artifact_path<A: Artifact>(dir: &Path) -> PathBuf {
    dir.join(A::STAGE.file_name())
}

/// Writes the artifact through a temp file in the same directory and renames
/// it into place, so readers see either the previous file or the full new one.
pub fn write_artifact<A: Artifact>(dir: &Path, artifact: &A) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(io_err(dir))?;
    let path = artifact_path::<A>(dir);
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err(dir))?;
    serde_json::to_writer_pretty(&mut tmp, artifact).map_err(|source| ArtifactError::Json {
        path: path.clone(),
        source,
    })?;
    tmp.write_all(b"\n").map_err(io_err(path.as_path()))?;
    tmp.as_file().sync_all().map_err(io_err(path.as_path()))?;
    tmp.persist(&path)
        .map_err(|err| ArtifactError::Io {
            path: path.clone(),
            source: err.error,
        })?;
    debug!(stage = %A::STAGE, path = %path.display(), "artifact written");
    Ok(path)
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ArtifactError {
    let path = path.to_path_buf();
    move |source| ArtifactError::Io { path, source }
}

pub fn read_artifact<A: Artifact>(dir: &Path) -> Result<A> {
    let path = artifact_path::<A>(dir);
    let raw = fs::read_to_string(&path).map_err(|source| ArtifactError::Io {
        path: path.clone(),
        source,
    })?;
    let artifact: A = serde_json::from_str(&raw).map_err(|source| ArtifactError::Json {
        path: path.clone(),
        source,
    })?;
    let metadata = artifact.metadata();
    if metadata.stage != A::STAGE {
        return Err(ArtifactError::StageMismatch {
            path,
            expected: A::STAGE,
            found: metadata.stage,
        });
    }
    if metadata.schema_version != SCHEMA_VERSION {
        return Err(ArtifactError::SchemaVersion {
            path,
            expected: SCHEMA_VERSION,
            found: metadata.schema_version,
        });
    }
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use remedy_core::{ElementKind, RetrievalHit, Severity, SourceRef};
    use tempfile::tempdir;

    fn element(content: &str, line: usize) -> Element {
        Element::new(
            ElementKind::Line,
            content,
            SourceRef {
                source_path: "page.html".to_string(),
                start_line: line,
                end_line: line,
            },
        )
    }

    fn elements_artifact() -> ElementsArtifact {
        let img = element("<img src=\"hero.png\" class=\"banner\">", 2);
        let hits = vec![RetrievalHit::new("F65: missing alt attribute", 0.82)];
        ElementsArtifact {
            metadata: ArtifactMetadata::new(Stage::Enrichment, "page.html")
                .with_count("elements", 1),
            elements: vec![ElementEvidence {
                element: img,
                evidence: EvidenceOutcome::from_hits("query".to_string(), hits),
            }],
        }
    }

    #[test]
    fn write_then_read_keeps_the_artifact() {
        let dir = tempdir().unwrap();
        let artifact = elements_artifact();
        let path = write_artifact(dir.path(), &artifact).unwrap();
        assert!(path.ends_with("rag_elements.json"));
        let back: ElementsArtifact = read_artifact(dir.path()).unwrap();
        assert_eq!(back, artifact);
        assert_eq!(back.metadata.count("elements"), 1);
        assert_eq!(back.metadata.count("missing"), 0);
    }

    #[test]
    fn write_leaves_no_temp_files_behind() {
        let dir = tempdir().unwrap();
        write_artifact(dir.path(), &elements_artifact()).unwrap();
        write_artifact(dir.path(), &elements_artifact()).unwrap();
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn reading_wrong_stage_is_rejected() {
        let dir = tempdir().unwrap();
        let mut artifact = elements_artifact();
        artifact.metadata.stage = Stage::Review;
        let raw = serde_json::to_string(&artifact).unwrap();
        fs::write(dir.path().join("rag_elements.json"), raw).unwrap();
        let err = read_artifact::<ElementsArtifact>(dir.path()).unwrap_err();
        assert!(matches!(err, ArtifactError::StageMismatch { .. }));
        assert_eq!(err.kind(), ErrorKind::ArtifactIoFailure);
    }

    #[test]
    fn truncated_file_is_a_json_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("rag_elements.json"), "{\"metadata\": {").unwrap();
        let err = read_artifact::<ElementsArtifact>(dir.path()).unwrap_err();
        assert!(matches!(err, ArtifactError::Json { .. }));
    }

    #[test]
    fn missing_artifact_is_an_io_error() {
        let dir = tempdir().unwrap();
        let err = read_artifact::<IssuesArtifact>(dir.path()).unwrap_err();
        assert!(matches!(err, ArtifactError::Io { .. }));
    }

    #[test]
    fn issues_resolve_evidence_by_reference() {
        let elements = elements_artifact().elements;
        let element_id = elements[0].element.id.clone();
        let issue = Issue {
            element_id: element_id.clone(),
            rule_id: "1.1.1".to_string(),
            severity: Severity::Major,
            message: "Image appears to be missing alt text.".to_string(),
            evidence: "<img src=\"hero.png\" class=\"banner\">".to_string(),
            evidence_ref: element_id,
        };
        let artifact = IssuesArtifact {
            metadata: ArtifactMetadata::new(Stage::IssueDetection, "page.html"),
            elements,
            issues: vec![issue.clone()],
        };
        let evidence = artifact.evidence_for(&issue).unwrap();
        assert_eq!(evidence.hits()[0].score, 0.82);
    }
}
