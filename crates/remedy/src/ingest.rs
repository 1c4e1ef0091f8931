use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, info};
use walkdir::WalkDir;

use remedy_rag::{EmbeddingClient, PassageInsert, RagStore};

use crate::cli::{FilterMode, IndexArgs};

static FAILURE_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(F\d+)").expect("valid failure code regex"));

const NON_FUNCTIONAL: &[&str] = &["F7", "F25", "F26", "F32"];

const FUNCTIONAL: &[&str] = &[
    "F10", "F12", "F16", "F19", "F20", "F21", "F40", "F42", "F54", "F55", "F56", "F63", "F65",
    "F66", "F67", "F69", "F70", "F73", "F75", "F78", "F79", "F80", "F84",
];

/// A WCAG technique file picked for indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct TechniqueFile {
    pub path: PathBuf,
    pub code: String,
    pub rule_id: String,
    pub error_class: &'static str,
}

/// Upper-cased failure code at the start of a file name (`f65_img.html` -> `F65`).
pub fn failure_code(file_name: &str) -> Option<String> {
    FAILURE_CODE
        .captures(file_name)
        .map(|caps| caps[1].to_ascii_uppercase())
}

fn code_number(code: &str) -> u32 {
    code[1..].parse().unwrap_or(u32::MAX)
}

fn first_k(codes: &[&'static str], k: usize) -> Vec<&'static str> {
    let mut sorted = codes.to_vec();
    sorted.sort_by_key(|code| code_number(code));
    if k > 0 {
        sorted.truncate(k);
    }
    sorted
}

/// Codes admitted by the filter, numerically ordered within each class.
pub fn allowed_codes(
    mode: FilterMode,
    first_k_non_functional: usize,
    first_k_functional: usize,
) -> BTreeSet<&'static str> {
    let non_functional = first_k(NON_FUNCTIONAL, first_k_non_functional);
    let functional = first_k(FUNCTIONAL, first_k_functional);
    match mode {
        FilterMode::NonFunctional => non_functional.into_iter().collect(),
        FilterMode::Functional => functional.into_iter().collect(),
        FilterMode::Both => non_functional.into_iter().chain(functional).collect(),
    }
}

fn error_class(code: &str) -> &'static str {
    if NON_FUNCTIONAL.contains(&code) {
        "non_functional"
    } else {
        "functional"
    }
}

pub fn select_files(root: &Path, allowed: &BTreeSet<&'static str>) -> Result<Vec<TechniqueFile>> {
    if !root.is_dir() {
        return Err(anyhow!("WCAG directory {} does not exist", root.display()));
    }
    let mut picked = Vec::new();
    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        let Some(code) = failure_code(&name) else {
            continue;
        };
        if !allowed.contains(code.as_str()) {
            debug!(file = %name, code = %code, "failure code filtered out");
            continue;
        }
        let rule_id = entry
            .path()
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());
        picked.push(TechniqueFile {
            path: entry.path().to_path_buf(),
            error_class: error_class(&code),
            code,
            rule_id,
        });
    }
    Ok(picked)
}

fn passage_metadata(file: &TechniqueFile) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("rule_id".into(), Value::String(file.rule_id.clone()));
    metadata.insert("code".into(), Value::String(file.code.clone()));
    metadata.insert("error_class".into(), Value::String(file.error_class.into()));
    let file_name = file
        .path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    metadata.insert("file".into(), Value::String(file_name));
    metadata.insert(
        "path".into(),
        Value::String(file.path.to_string_lossy().replace('\\', "/")),
    );
    metadata
}

pub async fn run(args: IndexArgs) -> Result<()> {
    let embeddings = EmbeddingClient::from_env()?;
    let written = index_directory(&args, &embeddings).await?;
    println!(
        "[remedy] indexed {written} techniques into '{}' at {}",
        args.collection,
        args.db.display()
    );
    Ok(())
}

/// Embeds the selected technique files and upserts them into the collection,
/// keyed by rule id so re-indexing the same directory replaces in place.
pub async fn index_directory(args: &IndexArgs, embeddings: &EmbeddingClient) -> Result<usize> {
    let allowed = allowed_codes(
        args.filter_mode,
        args.first_k_non_functional,
        args.first_k_functional,
    );
    let files = select_files(&args.wcag_dir, &allowed)?;
    info!(
        dir = %args.wcag_dir.display(),
        filter = args.filter_mode.as_str(),
        allowed = allowed.len(),
        files = files.len(),
        "technique files selected"
    );
    if files.is_empty() {
        return Ok(0);
    }
    let mut texts = Vec::with_capacity(files.len());
    for file in &files {
        let bytes =
            fs::read(&file.path).with_context(|| format!("failed to read {}", file.path.display()))?;
        texts.push(String::from_utf8_lossy(&bytes).into_owned());
    }
    let vectors = embeddings
        .embed_batch(&texts)
        .await
        .context("failed to embed technique files")?;
    let passages: Vec<PassageInsert> = files
        .iter()
        .zip(texts)
        .zip(vectors)
        .map(|((file, text), embedding)| PassageInsert {
            key: file.rule_id.clone(),
            text,
            metadata: passage_metadata(file),
            embedding,
        })
        .collect();

    if let Some(parent) = args.db.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let db = args.db.clone();
    let collection = args.collection.clone();
    let written = tokio::task::spawn_blocking(move || -> Result<usize> {
        let store = RagStore::open(&db)?;
        let collection_id = store.ensure_collection(&collection)?;
        Ok(store.add_passages(collection_id, &passages)?)
    })
    .await
    .context("indexing task panicked")??;
    info!(
        collection = %args.collection,
        backend = embeddings.backend_name(),
        written,
        "collection updated"
    );
    Ok(written)
}
