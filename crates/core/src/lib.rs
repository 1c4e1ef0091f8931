mod element;
mod embedding;
mod error;
mod evidence;
mod extract;
mod identity;
mod normalization;
mod records;

pub use element::{Element, ElementKind, SourceRef};
pub use embedding::{tokens, HashEmbedder, HashEmbedderConfig};
pub use error::{ErrorKind, RemedyError, Result};
pub use evidence::{EvidenceBundle, EvidenceOutcome, RetrievalHit};
pub use extract::{
    extract_elements, read_document, ExtractMode, ExtractOptions, DEFAULT_MIN_LINE_CHARS,
};
pub use identity::{candidate_id, content_id, id_for_normalized, ID_NAMESPACE};
pub use normalization::{flatten_whitespace, normalize_content, truncate_chars};
pub use records::{
    InjectionCandidate, Issue, ReviewDecision, Severity, SupportingHit, SUPPORT_SNIPPET_CHARS,
};
