use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::element::{Element, ElementKind, SourceRef};
use crate::error::{RemedyError, Result};

pub const DEFAULT_MIN_LINE_CHARS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractMode {
    #[default]
    Line,
    Block,
}

impl FromStr for ExtractMode {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "line" => Ok(ExtractMode::Line),
            "block" | "file_block" => Ok(ExtractMode::Block),
            other => Err(format!("unknown extract mode {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractOptions {
    #[serde(default)]
    pub mode: ExtractMode,
    /// Lines shorter than this (in characters, after trimming) are skipped in line mode.
    #[serde(default = "default_min_len")]
    pub min_len: usize,
}

fn default_min_len() -> usize {
    DEFAULT_MIN_LINE_CHARS
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            mode: ExtractMode::Line,
            min_len: DEFAULT_MIN_LINE_CHARS,
        }
    }
}

/// Reads a document for extraction. Invalid UTF-8 sequences are replaced;
/// content with NUL bytes is treated as binary and rejected.
pub fn read_document(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|source| RemedyError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if bytes.contains(&0) {
        return Err(RemedyError::Extraction {
            path: path.to_path_buf(),
            reason: "document contains NUL bytes and does not look like text".to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Splits `text` on `\n`, `\r\n` or a lone `\r`. A trailing terminator does
/// not open an extra empty line.
fn split_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let bytes = text.as_bytes();
    let mut start = 0;
    let mut idx = 0;
    while idx < bytes.len() {
        match bytes[idx] {
            b'\n' => {
                lines.push(&text[start..idx]);
                start = idx + 1;
            }
            b'\r' => {
                lines.push(&text[start..idx]);
                if bytes.get(idx + 1) == Some(&b'\n') {
                    idx += 1;
                }
                start = idx + 1;
            }
            _ => {}
        }
        idx += 1;
    }
    if start < bytes.len() {
        lines.push(&text[start..]);
    }
    lines
}

/// Splits `text` into elements in document order.
pub fn extract_elements(text: &str, source_path: &str, options: &ExtractOptions) -> Vec<Element> {
    let lines = split_lines(text);
    let elements = match options.mode {
        ExtractMode::Line => lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line.trim().chars().count() >= options.min_len)
            .map(|(idx, line)| {
                Element::new(
                    ElementKind::Line,
                    *line,
                    SourceRef {
                        source_path: source_path.to_string(),
                        start_line: idx + 1,
                        end_line: idx + 1,
                    },
                )
            })
            .collect::<Vec<_>>(),
        ExtractMode::Block => {
            if text.trim().is_empty() {
                Vec::new()
            } else {
                vec![Element::new(
                    ElementKind::Block,
                    text,
                    SourceRef {
                        source_path: source_path.to_string(),
                        start_line: 1,
                        end_line: lines.len(),
                    },
                )]
            }
        }
    };
    debug!(
        source = source_path,
        mode = ?options.mode,
        lines = lines.len(),
        elements = elements.len(),
        "extracted elements"
    );
    elements
}
