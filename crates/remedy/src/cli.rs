use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use remedy_core::ExtractMode;
use remedy_rag::{IndexSource, LlmProvider, RetrievalConfig};

#[derive(Parser, Debug)]
#[command(
    name = "remedy",
    about = "Evidence-backed accessibility remediation pipeline"
)]
pub struct Cli {
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the whole pipeline from a YAML config.
    Run {
        #[arg(long, default_value = "remedy.yaml")]
        config: PathBuf,
    },
    /// Run the whole pipeline over one document.
    Analyze(AnalyzeArgs),
    /// Load WCAG failure techniques into a passage collection.
    Index(IndexArgs),
    /// Retrieve passages for the user profile alone.
    Query(QueryArgs),
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    pub input: PathBuf,
    #[arg(long, default_value = "outputs")]
    pub out_dir: PathBuf,
    #[arg(long, value_enum, default_value_t = ExtractModeArg::Line)]
    pub extract_mode: ExtractModeArg,
    #[arg(long, default_value_t = remedy_core::DEFAULT_MIN_LINE_CHARS)]
    pub min_len: usize,
    /// Accept every candidate without asking.
    #[arg(long, action = ArgAction::SetTrue, conflicts_with = "decisions")]
    pub no_review: bool,
    /// JSON file with prepared review decisions.
    #[arg(long)]
    pub decisions: Option<PathBuf>,
    #[arg(long)]
    pub profile: Option<PathBuf>,
    #[command(flatten)]
    pub retrieval: RetrievalArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExtractModeArg {
    Line,
    Block,
}

impl From<ExtractModeArg> for ExtractMode {
    fn from(value: ExtractModeArg) -> Self {
        match value {
            ExtractModeArg::Line => ExtractMode::Line,
            ExtractModeArg::Block => ExtractMode::Block,
        }
    }
}

#[derive(Args, Debug)]
pub struct IndexArgs {
    pub collection: String,
    pub wcag_dir: PathBuf,
    #[arg(long, default_value = "remedy.db")]
    pub db: PathBuf,
    #[arg(long, value_enum, default_value_t = FilterMode::NonFunctional)]
    pub filter_mode: FilterMode,
    /// Keep only the first N non-functional codes (0 keeps all).
    #[arg(long, default_value_t = 0)]
    pub first_k_non_functional: usize,
    /// Keep only the first N functional codes (0 keeps all).
    #[arg(long, default_value_t = 0)]
    pub first_k_functional: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum FilterMode {
    NonFunctional,
    Functional,
    Both,
}

impl FilterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterMode::NonFunctional => "non_functional",
            FilterMode::Functional => "functional",
            FilterMode::Both => "both",
        }
    }
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    #[arg(long, default_value = "init_profile.json")]
    pub profile: PathBuf,
    #[arg(long, default_value = "rag_output.json")]
    pub out: PathBuf,
    #[command(flatten)]
    pub retrieval: RetrievalArgs,
}

/// Retrieval overrides; anything left unset keeps the environment/default value.
#[derive(Args, Debug, Default)]
pub struct RetrievalArgs {
    /// SQLite passage store to search.
    #[arg(long)]
    pub db: Option<PathBuf>,
    #[arg(long)]
    pub collection: Option<String>,
    /// JSON array of passages to search in memory instead of a collection.
    #[arg(long, conflicts_with_all = ["db", "collection"])]
    pub passages: Option<PathBuf>,
    #[arg(long)]
    pub similarity_cutoff: Option<f32>,
    #[arg(long)]
    pub top_k: Option<usize>,
    #[arg(long)]
    pub rerank_top_n: Option<usize>,
    #[arg(long, action = ArgAction::SetTrue)]
    pub no_rerank: bool,
    #[arg(long, value_parser = parse_provider)]
    pub judge_provider: Option<LlmProvider>,
    #[arg(long)]
    pub judge_model: Option<String>,
    #[arg(long, action = ArgAction::SetTrue)]
    pub judge_fallback: bool,
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    #[arg(long)]
    pub concurrency: Option<usize>,
    #[arg(long, action = ArgAction::SetTrue)]
    pub include_embeddings: bool,
}

fn parse_provider(value: &str) -> Result<LlmProvider, String> {
    LlmProvider::from_str(value).ok_or_else(|| {
        format!("unknown provider '{value}' (openai, gemini, anthropic, deepseek, local)")
    })
}

impl RetrievalArgs {
    pub fn apply(&self, config: &mut RetrievalConfig) {
        if let Some(path) = &self.passages {
            config.source = IndexSource::Memory {
                texts: Vec::new(),
                file: Some(path.clone()),
            };
        } else if self.db.is_some() || self.collection.is_some() {
            let (db_path, name) = match &config.source {
                IndexSource::Collection { db_path, name } => (db_path.clone(), name.clone()),
                IndexSource::Memory { .. } => {
                    (PathBuf::from("remedy.db"), "wcag_docs".to_string())
                }
            };
            config.source = IndexSource::Collection {
                db_path: self.db.clone().unwrap_or(db_path),
                name: self.collection.clone().unwrap_or(name),
            };
        }
        if let Some(v) = self.similarity_cutoff {
            config.similarity_cutoff = v;
        }
        if let Some(v) = self.top_k {
            config.top_k = v;
        }
        if let Some(v) = self.rerank_top_n {
            config.rerank_top_n = v;
        }
        if self.no_rerank {
            config.rerank_enabled = false;
        }
        if let Some(v) = self.judge_provider {
            config.judge_provider = v;
        }
        if let Some(v) = &self.judge_model {
            config.judge_model = Some(v.clone());
        }
        if self.judge_fallback {
            config.judge_fallback = true;
        }
        if let Some(v) = self.timeout_ms {
            config.timeout_ms = v;
        }
        if let Some(v) = self.concurrency {
            config.concurrency = v;
        }
        if self.include_embeddings {
            config.include_embeddings = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyze_flags_override_retrieval_defaults() {
        let cli = Cli::parse_from([
            "remedy",
            "analyze",
            "page.html",
            "--extract-mode",
            "block",
            "--no-review",
            "--similarity-cutoff",
            "0.75",
            "--no-rerank",
            "--collection",
            "techniques",
            "--judge-provider",
            "gemini",
        ]);
        let Command::Analyze(args) = cli.command else {
            panic!("expected analyze");
        };
        assert_eq!(ExtractMode::from(args.extract_mode), ExtractMode::Block);
        assert!(args.no_review);
        let mut config = RetrievalConfig::default();
        args.retrieval.apply(&mut config);
        assert_eq!(config.similarity_cutoff, 0.75);
        assert!(!config.rerank_enabled);
        assert_eq!(config.judge_provider, LlmProvider::Gemini);
        assert_eq!(
            config.source,
            IndexSource::Collection {
                db_path: PathBuf::from("remedy.db"),
                name: "techniques".to_string(),
            }
        );
    }

    #[test]
    fn index_accepts_filter_modes() {
        let cli = Cli::parse_from([
            "remedy",
            "--verbose",
            "index",
            "wcag_docs",
            "wcag_techniques",
            "--filter-mode",
            "both",
            "--first-k-functional",
            "3",
        ]);
        assert!(cli.verbose);
        let Command::Index(args) = cli.command else {
            panic!("expected index");
        };
        assert_eq!(args.filter_mode, FilterMode::Both);
        assert_eq!(args.first_k_functional, 3);
        assert_eq!(args.db, PathBuf::from("remedy.db"));
    }

    #[test]
    fn passages_switch_to_memory_source() {
        let args = RetrievalArgs {
            passages: Some(PathBuf::from("passages.json")),
            ..RetrievalArgs::default()
        };
        let mut config = RetrievalConfig::default();
        args.apply(&mut config);
        assert!(matches!(config.source, IndexSource::Memory { file: Some(_), .. }));
    }

    #[test]
    fn no_review_conflicts_with_decisions() {
        let result = Cli::try_parse_from([
            "remedy",
            "analyze",
            "page.html",
            "--no-review",
            "--decisions",
            "d.json",
        ]);
        assert!(result.is_err());
    }
}
