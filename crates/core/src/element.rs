use serde::{Deserialize, Serialize};

use crate::identity::id_for_normalized;
use crate::normalization::normalize_content;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Line,
    Block,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Line => "line",
            ElementKind::Block => "block",
        }
    }
}

/// Where an element came from, for patching it later. Lines are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub source_path: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// An addressable unit of extracted content. Built once during extraction;
/// later stages reference it by `id` and never rewrite it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub id: String,
    pub kind: ElementKind,
    pub raw_content: String,
    pub normalized_content: String,
    pub source_ref: SourceRef,
}

impl Element {
    pub fn new(kind: ElementKind, raw_content: impl Into<String>, source_ref: SourceRef) -> Self {
        let raw_content = raw_content.into();
        let normalized_content = normalize_content(&raw_content);
        Self {
            id: id_for_normalized(&normalized_content),
            kind,
            raw_content,
            normalized_content,
            source_ref,
        }
    }

    pub fn source_path(&self) -> &str {
        &self.source_ref.source_path
    }
}
