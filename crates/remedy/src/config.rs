use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use remedy_core::ExtractOptions;
use remedy_rag::RetrievalConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewMode {
    #[default]
    Interactive,
    ApproveAll,
    File,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewConfig {
    #[serde(default)]
    pub mode: ReviewMode,
    #[serde(default)]
    pub decisions: Option<PathBuf>,
}

/// Everything one pipeline run needs, as read from `remedy.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub input: PathBuf,
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
    #[serde(default)]
    pub profile: Option<PathBuf>,
    #[serde(default)]
    pub extract: ExtractOptions,
    #[serde(default)]
    pub review: ReviewConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

pub fn default_out_dir() -> PathBuf {
    PathBuf::from("outputs")
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut cfg: RunConfig = serde_yaml::from_str(&raw).context("invalid remedy config")?;
        cfg.retrieval.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.review.mode == ReviewMode::File && self.review.decisions.is_none() {
            return Err(anyhow!("review mode 'file' needs a decisions path"));
        }
        if self.extract.min_len == 0 {
            return Err(anyhow!("extract.min_len must be greater than zero"));
        }
        self.retrieval.validate()?;
        Ok(())
    }
}
