use remedy_core::{truncate_chars, Element, Issue, Severity};

pub const EVIDENCE_CHARS: usize = 240;

/// Heuristic WCAG checks over one element's markup. Each finding points back
/// at the element's own evidence bundle.
pub fn detect_issues(element: &Element) -> Vec<Issue> {
    let content = element.raw_content.as_str();
    let lower = content.to_ascii_lowercase();
    let mut issues = Vec::new();

    if lower.contains("<img") && !lower.contains("alt=") {
        issues.push(issue(
            element,
            "1.1.1",
            "Image appears to be missing alt text.",
        ));
    }

    if lower.contains("<input")
        && !lower.contains("aria-label")
        && !lower.contains("aria-labelledby")
        && !lower.contains("label")
    {
        issues.push(issue(
            element,
            "1.3.1",
            "Form control may be missing an accessible label.",
        ));
    }

    if let Some(inner) = button_inner_text(&lower) {
        if inner.trim().is_empty() && !lower.contains("aria-label") {
            issues.push(issue(
                element,
                "4.1.2",
                "Button may be missing an accessible name (no text and no aria-label).",
            ));
        }
    }

    issues
}

/// Text between the first `<button ...>` opening tag and the last `</button>`.
fn button_inner_text(lower: &str) -> Option<&str> {
    let open = lower.find("<button")?;
    let close = lower.rfind("</button>")?;
    let tag_end = open + lower[open..].find('>')? + 1;
    if tag_end > close {
        return None;
    }
    Some(&lower[tag_end..close])
}

fn issue(element: &Element, rule_id: &str, message: &str) -> Issue {
    Issue {
        element_id: element.id.clone(),
        rule_id: rule_id.to_string(),
        severity: Severity::Major,
        message: message.to_string(),
        evidence: truncate_chars(element.raw_content.trim(), EVIDENCE_CHARS).to_string(),
        evidence_ref: element.id.clone(),
    }
}
