use std::fs;
use std::path::Path;

use serde_json::Value;

use remedy_core::{flatten_whitespace, truncate_chars, RemedyError};

pub const ELEMENT_SNIPPET_CHARS: usize = 500;

const PROFILE_KEYS: [&str; 2] = ["intial_profile", "initial_profile"];

/// Reads a user profile document; it must be a JSON object.
pub fn load_profile(path: &Path) -> remedy_core::Result<Value> {
    let raw = fs::read_to_string(path).map_err(|source| RemedyError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let profile: Value = serde_json::from_str(&raw)?;
    if !profile.is_object() {
        return Err(RemedyError::InvalidProfile(format!(
            "{} does not hold a JSON object",
            path.display()
        )));
    }
    Ok(profile)
}

/// Turns `{"intial_profile": {"user_description": [..]}}` into a single
/// retrieval query. Missing sections yield an empty description.
pub fn build_query_from_profile(profile: &Value) -> String {
    let description = PROFILE_KEYS
        .iter()
        .find_map(|key| profile.get(*key))
        .and_then(|section| section.get("user_description"));
    let described = match description {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", "),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    format!("User has the following accessibility needs: {described}")
}

/// Query issued for one element: the user context, the guidance question and
/// the element flattened to one line.
pub fn build_element_query(context: &str, content: &str) -> String {
    let flat = flatten_whitespace(content);
    let snippet = if flat.chars().count() > ELEMENT_SNIPPET_CHARS {
        format!("{}...", truncate_chars(&flat, ELEMENT_SNIPPET_CHARS))
    } else {
        flat
    };
    let question = format!(
        "Given this UI/code element, what WCAG guidance applies and what fixes are recommended?\nElement:\n{snippet}"
    );
    if context.trim().is_empty() {
        question
    } else {
        format!("{context}\n\n{question}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn profile_descriptions_are_joined() {
        let profile = json!({
            "intial_profile": {"user_description": ["low vision", "screen reader user"]}
        });
        assert_eq!(
            build_query_from_profile(&profile),
            "User has the following accessibility needs: low vision, screen reader user"
        );
    }

    #[test]
    fn corrected_key_and_single_string_are_accepted() {
        let profile = json!({"initial_profile": {"user_description": "color blind"}});
        assert_eq!(
            build_query_from_profile(&profile),
            "User has the following accessibility needs: color blind"
        );
        assert_eq!(
            build_query_from_profile(&json!({})),
            "User has the following accessibility needs: "
        );
    }

    #[test]
    fn element_query_is_flattened_and_capped() {
        let query = build_element_query("ctx", "<button>\n  Go\n</button>");
        assert!(query.starts_with("ctx\n\n"));
        assert!(query.ends_with("Element:\n<button> Go </button>"));

        let long = "a".repeat(700);
        let query = build_element_query("ctx", &long);
        let snippet = query.rsplit("Element:\n").next().unwrap();
        assert_eq!(snippet.len(), ELEMENT_SNIPPET_CHARS + 3);
        assert!(snippet.ends_with("..."));
    }

    #[test]
    fn blank_context_is_left_out() {
        let query = build_element_query("  ", "<img src=\"a.png\">");
        assert!(query.starts_with("Given this UI/code element"));
    }

    #[test]
    fn profile_must_be_an_object() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("profile.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(
            load_profile(&path).unwrap_err(),
            RemedyError::InvalidProfile(_)
        ));
        std::fs::write(&path, r#"{"intial_profile": {}}"#).unwrap();
        assert!(load_profile(&path).unwrap().is_object());
    }
}
