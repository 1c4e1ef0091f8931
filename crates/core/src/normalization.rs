use unicode_normalization::UnicodeNormalization;

/// Canonical form used for identity: NFKC, control characters dropped,
/// whitespace runs collapsed to one space, trimmed and lowercased.
pub fn normalize_content(raw: &str) -> String {
    let nfkc = raw.nfkc().collect::<String>();
    let mut result = String::with_capacity(nfkc.len());
    let mut prev_space = true;
    for ch in nfkc.chars() {
        if ch.is_whitespace() {
            if !prev_space {
                result.push(' ');
                prev_space = true;
            }
            continue;
        }
        if ch.is_control() {
            continue;
        }
        result.extend(ch.to_lowercase());
        prev_space = false;
    }
    result.trim_end().to_string()
}

/// Joins all lines into one and collapses whitespace, keeping the original casing.
pub fn flatten_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<&str>>().join(" ")
}

/// Cuts `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_case() {
        assert_eq!(normalize_content("  Click\t\tME \n"), "click me");
        assert_eq!(normalize_content("click me"), "click me");
    }

    #[test]
    fn applies_nfkc() {
        // fullwidth letters and the "fi" ligature fold to ASCII
        assert_eq!(normalize_content("Ｃｌｉｃｋ ﬁle"), "click file");
    }

    #[test]
    fn drops_control_characters() {
        assert_eq!(normalize_content("a\u{0007}b"), "ab");
        assert_eq!(normalize_content("\u{0000}\n"), "");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn flatten_keeps_case() {
        assert_eq!(flatten_whitespace(" <img\n  src=\"A.png\">"), "<img src=\"A.png\">");
    }
}
