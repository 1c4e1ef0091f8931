use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use remedy_llm::LlmProvider;

use crate::error::{Result, RetrievalError};
use crate::index::IndexSource;

/// Engine settings, fixed for the lifetime of a `RetrievalEngine`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub similarity_cutoff: f32,
    pub top_k: usize,
    pub rerank_enabled: bool,
    pub rerank_top_n: usize,
    pub judge_provider: LlmProvider,
    /// Falls back to the provider's default model when unset.
    pub judge_model: Option<String>,
    pub judge_batch_size: usize,
    /// Serve the unreranked list when the judge fails instead of failing the query.
    pub judge_fallback: bool,
    pub include_embeddings: bool,
    /// Per provider call. A judge pass may wait this long for each batch.
    pub timeout_ms: u64,
    pub concurrency: usize,
    pub source: IndexSource,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_cutoff: 0.3,
            top_k: 30,
            rerank_enabled: true,
            rerank_top_n: 10,
            judge_provider: LlmProvider::OpenAi,
            judge_model: None,
            judge_batch_size: 5,
            judge_fallback: false,
            include_embeddings: false,
            timeout_ms: 30_000,
            concurrency: 4,
            source: IndexSource::default(),
        }
    }
}

impl RetrievalConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Applies `REMEDY_*` overrides read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("REMEDY_SIMILARITY_CUTOFF") {
            self.similarity_cutoff = parse_var("REMEDY_SIMILARITY_CUTOFF", &v)?;
        }
        if let Some(v) = lookup("REMEDY_TOP_K") {
            self.top_k = parse_var("REMEDY_TOP_K", &v)?;
        }
        if let Some(v) = lookup("REMEDY_RERANK") {
            self.rerank_enabled = parse_flag("REMEDY_RERANK", &v)?;
        }
        if let Some(v) = lookup("REMEDY_RERANK_TOP_N") {
            self.rerank_top_n = parse_var("REMEDY_RERANK_TOP_N", &v)?;
        }
        if let Some(v) = lookup("REMEDY_JUDGE_PROVIDER") {
            self.judge_provider = LlmProvider::from_str(&v).ok_or_else(|| {
                RetrievalError::InvalidConfig(format!("unknown judge provider '{v}'"))
            })?;
        }
        if let Some(v) = lookup("REMEDY_JUDGE_MODEL") {
            self.judge_model = Some(v);
        }
        if let Some(v) = lookup("REMEDY_JUDGE_BATCH_SIZE") {
            self.judge_batch_size = parse_var("REMEDY_JUDGE_BATCH_SIZE", &v)?;
        }
        if let Some(v) = lookup("REMEDY_JUDGE_FALLBACK") {
            self.judge_fallback = parse_flag("REMEDY_JUDGE_FALLBACK", &v)?;
        }
        if let Some(v) = lookup("REMEDY_TIMEOUT_MS") {
            self.timeout_ms = parse_var("REMEDY_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("REMEDY_CONCURRENCY") {
            self.concurrency = parse_var("REMEDY_CONCURRENCY", &v)?;
        }
        let db_path = lookup("REMEDY_DB_PATH");
        let collection = lookup("REMEDY_COLLECTION");
        if db_path.is_some() || collection.is_some() {
            let (current_db, current_name) = match &self.source {
                IndexSource::Collection { db_path, name } => (db_path.clone(), name.clone()),
                IndexSource::Memory { .. } => {
                    (PathBuf::from("remedy.db"), "wcag_docs".to_string())
                }
            };
            self.source = IndexSource::Collection {
                db_path: db_path.map(PathBuf::from).unwrap_or(current_db),
                name: collection.unwrap_or(current_name),
            };
        }
        Ok(())
    }

    pub fn judge_model(&self) -> &str {
        self.judge_model
            .as_deref()
            .unwrap_or_else(|| self.judge_provider.default_model())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(RetrievalError::InvalidConfig(msg));
        if !self.similarity_cutoff.is_finite() || !(-1.0..=1.0).contains(&self.similarity_cutoff) {
            return invalid(format!(
                "similarity_cutoff must be within [-1, 1], got {}",
                self.similarity_cutoff
            ));
        }
        if self.top_k == 0 {
            return invalid("top_k must be greater than zero".to_string());
        }
        if self.rerank_top_n == 0 {
            return invalid("rerank_top_n must be greater than zero".to_string());
        }
        if self.judge_batch_size == 0 {
            return invalid("judge_batch_size must be greater than zero".to_string());
        }
        if self.timeout_ms == 0 {
            return invalid("timeout_ms must be greater than zero".to_string());
        }
        if self.concurrency == 0 {
            return invalid("concurrency must be greater than zero".to_string());
        }
        if let IndexSource::Memory { texts, file } = &self.source {
            if texts.is_empty() && file.is_none() {
                return invalid("memory source needs texts or a file".to_string());
            }
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| RetrievalError::InvalidConfig(format!("{key}: cannot parse '{value}'")))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(RetrievalError::InvalidConfig(format!(
            "{key}: expected a boolean, got '{value}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = RetrievalConfig::default();
        assert_eq!(config.similarity_cutoff, 0.3);
        assert_eq!(config.top_k, 30);
        assert!(config.rerank_enabled);
        assert_eq!(config.rerank_top_n, 10);
        assert_eq!(config.judge_model(), "gpt-4.1-mini");
        assert!(!config.judge_fallback);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        config.validate().unwrap();
    }

    #[test]
    fn overrides_apply_and_reject_garbage() {
        let mut config = RetrievalConfig::default();
        config
            .apply_overrides(lookup(&[
                ("REMEDY_SIMILARITY_CUTOFF", "0.75"),
                ("REMEDY_RERANK", "off"),
                ("REMEDY_JUDGE_PROVIDER", "gemini"),
                ("REMEDY_COLLECTION", "techniques"),
            ]))
            .unwrap();
        assert_eq!(config.similarity_cutoff, 0.75);
        assert!(!config.rerank_enabled);
        assert_eq!(config.judge_model(), "gemini-1.5-flash");
        assert_eq!(
            config.source,
            IndexSource::Collection {
                db_path: PathBuf::from("remedy.db"),
                name: "techniques".to_string(),
            }
        );

        let err = config
            .apply_overrides(lookup(&[("REMEDY_TOP_K", "many")]))
            .unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidConfig(_)));
    }

    #[test]
    fn validation_rejects_out_of_range_values() {
        let mut config = RetrievalConfig {
            similarity_cutoff: 1.5,
            ..RetrievalConfig::default()
        };
        assert!(config.validate().is_err());
        config.similarity_cutoff = -0.2;
        config.validate().unwrap();
        config.rerank_top_n = 0;
        assert!(config.validate().is_err());
        config.rerank_top_n = 3;
        config.source = IndexSource::Memory {
            texts: Vec::new(),
            file: None,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config: RetrievalConfig = serde_json::from_str(
            r#"{"similarity_cutoff": 0.5, "judge_provider": "local", "source": {"type": "memory", "texts": ["x"]}}"#,
        )
        .unwrap();
        assert_eq!(config.similarity_cutoff, 0.5);
        assert_eq!(config.top_k, 30);
        assert_eq!(config.judge_provider, LlmProvider::Local);
        config.validate().unwrap();
    }
}
