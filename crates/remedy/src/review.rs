use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use remedy_core::{truncate_chars, ErrorKind, InjectionCandidate, ReviewDecision};

const PREVIEW_CHARS: usize = 300;

#[derive(Error, Debug)]
pub enum ReviewError {
    #[error("reviewer input failed: {0}")]
    Io(#[from] io::Error),
    #[error("reviewer input ended before candidate {0} was decided")]
    InputClosed(String),
    #[error("failed to read decisions file {path:?}: {reason}")]
    DecisionsFile { path: PathBuf, reason: String },
    #[error("decisions file has no entry for candidate {0}")]
    MissingDecision(String),
}

impl ReviewError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReviewError::Io(_) | ReviewError::InputClosed(_) => ErrorKind::ArtifactIoFailure,
            ReviewError::DecisionsFile { .. } | ReviewError::MissingDecision(_) => {
                ErrorKind::InvalidConfig
            }
        }
    }
}

/// Where approvals come from. The pipeline never talks to a terminal itself.
pub trait DecisionSource {
    fn approve(
        &mut self,
        candidate: &InjectionCandidate,
        position: usize,
        total: usize,
    ) -> Result<bool, ReviewError>;
}

/// Decides one candidate.
pub fn review(
    candidate: &InjectionCandidate,
    position: usize,
    total: usize,
    source: &mut dyn DecisionSource,
) -> Result<ReviewDecision, ReviewError> {
    let approved = source.approve(candidate, position, total)?;
    Ok(ReviewDecision {
        candidate_id: candidate.candidate_id.clone(),
        approved,
    })
}

pub struct ApproveAll;

impl DecisionSource for ApproveAll {
    fn approve(&mut self, _: &InjectionCandidate, _: usize, _: usize) -> Result<bool, ReviewError> {
        Ok(true)
    }
}

/// Decisions prepared ahead of time, keyed by candidate id.
pub struct DecisionFile {
    decisions: HashMap<String, bool>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DecisionsDocument {
    List(Vec<ReviewDecision>),
    Map(HashMap<String, bool>),
}

impl DecisionFile {
    pub fn load(path: &Path) -> Result<Self, ReviewError> {
        let file_error = |reason: String| ReviewError::DecisionsFile {
            path: path.to_path_buf(),
            reason,
        };
        let raw = fs::read_to_string(path).map_err(|err| file_error(err.to_string()))?;
        let document: DecisionsDocument =
            serde_json::from_str(&raw).map_err(|err| file_error(err.to_string()))?;
        Ok(Self::from_document(document))
    }

    fn from_document(document: DecisionsDocument) -> Self {
        let decisions = match document {
            DecisionsDocument::List(list) => list
                .into_iter()
                .map(|decision| (decision.candidate_id, decision.approved))
                .collect(),
            DecisionsDocument::Map(map) => map,
        };
        Self { decisions }
    }
}

impl DecisionSource for DecisionFile {
    fn approve(
        &mut self,
        candidate: &InjectionCandidate,
        _: usize,
        _: usize,
    ) -> Result<bool, ReviewError> {
        self.decisions
            .get(&candidate.candidate_id)
            .copied()
            .ok_or_else(|| ReviewError::MissingDecision(candidate.candidate_id.clone()))
    }
}

/// Shows each candidate and asks y/n until it gets one.
pub struct Interactive<R, W> {
    input: R,
    output: W,
}

impl Interactive<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> Interactive<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn show(
        &mut self,
        candidate: &InjectionCandidate,
        position: usize,
        total: usize,
    ) -> io::Result<()> {
        let rule = "=".repeat(80);
        let thin = "-".repeat(80);
        writeln!(self.output, "\n{rule}")?;
        writeln!(
            self.output,
            "[{position}/{total}] Element: {}  Rule: {}",
            candidate.element_id, candidate.rule_id
        )?;
        writeln!(self.output, "Issue: {}", candidate.message)?;
        writeln!(self.output, "{thin}")?;
        writeln!(self.output, "Website content snippet:")?;
        writeln!(
            self.output,
            "{}",
            truncate_chars(&candidate.element_content, PREVIEW_CHARS)
        )?;
        writeln!(self.output, "{thin}")?;
        writeln!(self.output, "Injection script:")?;
        writeln!(self.output, "{}", candidate.script)?;
        writeln!(self.output, "{rule}")?;
        Ok(())
    }
}

impl<R: BufRead, W: Write> DecisionSource for Interactive<R, W> {
    fn approve(
        &mut self,
        candidate: &InjectionCandidate,
        position: usize,
        total: usize,
    ) -> Result<bool, ReviewError> {
        self.show(candidate, position, total)?;
        loop {
            write!(self.output, "Include this injection? (y/n) ")?;
            self.output.flush()?;
            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Err(ReviewError::InputClosed(candidate.candidate_id.clone()));
            }
            match line.trim().to_lowercase().as_str() {
                "y" => return Ok(true),
                "n" => return Ok(false),
                _ => writeln!(self.output, "Please enter 'y' or 'n'.")?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn candidate(id: &str) -> InjectionCandidate {
        InjectionCandidate {
            candidate_id: id.to_string(),
            element_id: "e1".to_string(),
            source_path: "page.html".to_string(),
            rule_id: "1.1.1".to_string(),
            message: "Image appears to be missing alt text.".to_string(),
            script: "(() => {})();".to_string(),
            element_content: "<img src=\"a.png\">".to_string(),
            supporting: Vec::new(),
        }
    }

    #[test]
    fn interactive_reprompts_until_yes_or_no() {
        let mut output = Vec::new();
        let mut source = Interactive::new(Cursor::new("maybe\nY\n"), &mut output);
        let decision = review(&candidate("c1"), 1, 2, &mut source).unwrap();
        assert!(decision.approved);
        assert_eq!(decision.candidate_id, "c1");
        let shown = String::from_utf8(output).unwrap();
        assert!(shown.contains("[1/2] Element: e1  Rule: 1.1.1"));
        assert!(shown.contains("Please enter 'y' or 'n'."));
    }

    #[test]
    fn interactive_fails_when_input_ends() {
        let mut source = Interactive::new(Cursor::new(""), Vec::new());
        let err = review(&candidate("c1"), 1, 1, &mut source).unwrap_err();
        assert!(matches!(err, ReviewError::InputClosed(_)));
    }

    #[test]
    fn decision_file_accepts_list_and_map() {
        let list: DecisionsDocument =
            serde_json::from_str(r#"[{"candidate_id": "c1", "approved": false}]"#).unwrap();
        let mut source = DecisionFile::from_document(list);
        assert!(!review(&candidate("c1"), 1, 1, &mut source).unwrap().approved);

        let map: DecisionsDocument = serde_json::from_str(r#"{"c2": true}"#).unwrap();
        let mut source = DecisionFile::from_document(map);
        assert!(review(&candidate("c2"), 1, 1, &mut source).unwrap().approved);
        let err = review(&candidate("c3"), 1, 1, &mut source).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn missing_decisions_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = DecisionFile::load(&dir.path().join("absent.json")).err().unwrap();
        assert!(matches!(err, ReviewError::DecisionsFile { .. }));
    }

    #[test]
    fn approve_all_approves() {
        assert!(review(&candidate("c1"), 1, 1, &mut ApproveAll).unwrap().approved);
    }
}
