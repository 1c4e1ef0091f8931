use std::collections::HashSet;

use tracing::debug;

use remedy_artifacts::IssuesArtifact;
use remedy_core::{candidate_id, InjectionCandidate, SupportingHit};

/// Hits of the element's evidence bundle copied onto each candidate.
pub const SUPPORTING_HITS: usize = 3;

const ALT_TEXT_SCRIPT: &str = r#"(() => {
  const imgs = document.querySelectorAll('img:not([alt])');
  imgs.forEach(img => {
    // Placeholder; replace with alt text derived from the surrounding context.
    img.setAttribute('alt', 'Image');
  });
})();"#;

const FORM_LABEL_SCRIPT: &str = r#"(() => {
  const fields = document.querySelectorAll('input, select, textarea');
  fields.forEach(el => {
    const hasLabel = el.id && document.querySelector(`label[for="${el.id}"]`);
    const hasAria = el.getAttribute('aria-label') || el.getAttribute('aria-labelledby');
    if (!hasLabel && !hasAria) {
      // Placeholder; replace with a label taken from nearby text.
      el.setAttribute('aria-label', 'Input');
    }
  });
})();"#;

const BUTTON_NAME_SCRIPT: &str = r#"(() => {
  const buttons = document.querySelectorAll('button');
  buttons.forEach(btn => {
    const hasText = (btn.textContent || '').trim().length > 0;
    const hasAria = !!btn.getAttribute('aria-label');
    if (!hasText && !hasAria) {
      // Placeholder; replace with a meaningful accessible name.
      btn.setAttribute('aria-label', 'Button');
    }
  });
})();"#;

const NO_SCRIPT: &str = "// No injection rule implemented for this issue.\n";

pub fn script_for_rule(rule_id: &str) -> &'static str {
    match rule_id {
        "1.1.1" => ALT_TEXT_SCRIPT,
        "1.3.1" => FORM_LABEL_SCRIPT,
        "4.1.2" => BUTTON_NAME_SCRIPT,
        _ => NO_SCRIPT,
    }
}

/// One candidate per issue, in issue order. Issues whose element is not in
/// the artifact are skipped. Repeated content shares an element id, so only
/// the first issue per (element, rule) pair becomes a candidate.
pub fn build_candidates(artifact: &IssuesArtifact) -> Vec<InjectionCandidate> {
    let mut seen = HashSet::new();
    artifact
        .issues
        .iter()
        .filter_map(|issue| {
            let entry = artifact.element(&issue.element_id)?;
            let id = candidate_id(&issue.element_id, &issue.rule_id);
            if !seen.insert(id.clone()) {
                debug!(candidate = %id, rule = %issue.rule_id, "duplicate candidate skipped");
                return None;
            }
            let supporting = artifact
                .evidence_for(issue)
                .map(|evidence| {
                    evidence
                        .hits()
                        .iter()
                        .take(SUPPORTING_HITS)
                        .map(SupportingHit::from)
                        .collect()
                })
                .unwrap_or_default();
            Some(InjectionCandidate {
                candidate_id: id,
                element_id: issue.element_id.clone(),
                source_path: entry.element.source_path().to_string(),
                rule_id: issue.rule_id.clone(),
                message: issue.message.clone(),
                script: script_for_rule(&issue.rule_id).to_string(),
                element_content: entry.element.raw_content.clone(),
                supporting,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use remedy_artifacts::{ArtifactMetadata, ElementEvidence, Stage};
    use remedy_core::{
        Element, ElementKind, EvidenceOutcome, Issue, RetrievalHit, Severity, SourceRef,
    };

    fn artifact(hits: Vec<RetrievalHit>) -> IssuesArtifact {
        let element = Element::new(
            ElementKind::Line,
            "<img src=\"hero.png\" class=\"banner\">",
            SourceRef {
                source_path: "page.html".to_string(),
                start_line: 3,
                end_line: 3,
            },
        );
        let issue = Issue {
            element_id: element.id.clone(),
            rule_id: "1.1.1".to_string(),
            severity: Severity::Major,
            message: "Image appears to be missing alt text.".to_string(),
            evidence: element.raw_content.clone(),
            evidence_ref: element.id.clone(),
        };
        IssuesArtifact {
            metadata: ArtifactMetadata::new(Stage::IssueDetection, "page.html"),
            elements: vec![ElementEvidence {
                element,
                evidence: EvidenceOutcome::from_hits("q".to_string(), hits),
            }],
            issues: vec![issue],
        }
    }

    #[test]
    fn known_rules_get_their_template() {
        assert!(script_for_rule("1.1.1").contains("img:not([alt])"));
        assert!(script_for_rule("1.3.1").contains("aria-labelledby"));
        assert!(script_for_rule("4.1.2").contains("querySelectorAll('button')"));
        assert_eq!(script_for_rule("2.4.4"), NO_SCRIPT);
    }

    #[test]
    fn candidates_carry_top_three_supporting_hits() {
        let hits = (0..5)
            .map(|idx| RetrievalHit::new(format!("F65 passage {idx}"), 0.9 - idx as f32 * 0.1))
            .collect();
        let artifact = artifact(hits);
        let candidates = build_candidates(&artifact);
        assert_eq!(candidates.len(), 1);
        let candidate = &candidates[0];
        assert_eq!(candidate.supporting.len(), SUPPORTING_HITS);
        assert_eq!(candidate.supporting[0].text_snippet, "F65 passage 0");
        assert_eq!(candidate.source_path, "page.html");
        assert_eq!(
            candidate.candidate_id,
            candidate_id(&candidate.element_id, "1.1.1")
        );
    }

    #[test]
    fn empty_evidence_still_yields_a_candidate() {
        let candidates = build_candidates(&artifact(Vec::new()));
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].supporting.is_empty());
    }

    #[test]
    fn repeated_elements_yield_one_candidate() {
        let elements: Vec<Element> = [1, 3]
            .into_iter()
            .map(|line| {
                Element::new(
                    ElementKind::Line,
                    "<img src=\"spacer.png\" class=\"x\">",
                    SourceRef {
                        source_path: "page.html".to_string(),
                        start_line: line,
                        end_line: line,
                    },
                )
            })
            .collect();
        assert_eq!(elements[0].id, elements[1].id);
        let issues = elements
            .iter()
            .map(|element| Issue {
                element_id: element.id.clone(),
                rule_id: "1.1.1".to_string(),
                severity: Severity::Major,
                message: "Image appears to be missing alt text.".to_string(),
                evidence: element.raw_content.clone(),
                evidence_ref: element.id.clone(),
            })
            .collect();
        let artifact = IssuesArtifact {
            metadata: ArtifactMetadata::new(Stage::IssueDetection, "page.html"),
            elements: elements
                .into_iter()
                .map(|element| ElementEvidence {
                    element,
                    evidence: EvidenceOutcome::from_hits("q".to_string(), Vec::new()),
                })
                .collect(),
            issues,
        };
        let candidates = build_candidates(&artifact);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].rule_id, "1.1.1");
    }

    #[test]
    fn candidate_ids_are_stable_across_builds() {
        let first = build_candidates(&artifact(Vec::new()));
        let second = build_candidates(&artifact(Vec::new()));
        assert_eq!(first[0].candidate_id, second[0].candidate_id);
    }
}
