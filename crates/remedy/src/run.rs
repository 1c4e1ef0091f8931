use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{error, info};

use remedy_artifacts::{
    read_artifact, write_artifact, ArtifactError, ArtifactMetadata, CandidatesArtifact,
    ElementEvidence, ElementsArtifact, FinalArtifact, IssuesArtifact, Stage,
};
use remedy_core::{extract_elements, read_document, ErrorKind, ExtractOptions, Issue};
use remedy_rag::{
    build_engine, build_query_from_profile, enrich_elements, load_profile, EmbeddingClient,
    EmbeddingIndex, Judge, RetrievalConfig, RetrievalEngine,
};

use crate::cli::AnalyzeArgs;
use crate::config::{ReviewConfig, ReviewMode, RunConfig};
use crate::detect::detect_issues;
use crate::review::{review, ApproveAll, DecisionFile, DecisionSource, Interactive};
use crate::scripts::build_candidates;

#[derive(Error, Debug)]
#[error("stage '{stage}' failed ({kind}): {message}")]
pub struct StageError {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
}

impl StageError {
    pub fn new(stage: Stage, kind: ErrorKind, err: impl fmt::Display) -> Self {
        Self {
            stage,
            kind,
            message: err.to_string(),
        }
    }
}

fn artifact_failure(stage: Stage) -> impl FnOnce(ArtifactError) -> StageError {
    move |err| StageError::new(stage, err.kind(), err)
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    pub stage: Stage,
    pub path: PathBuf,
    pub records: usize,
}

pub async fn run_from_config(path: &Path) -> Result<()> {
    let cfg = RunConfig::load(path)?;
    execute(cfg).await
}

/// `analyze` builds the same run config from flags and the environment.
pub async fn analyze(args: AnalyzeArgs) -> Result<()> {
    let mut retrieval = RetrievalConfig::from_env()?;
    args.retrieval.apply(&mut retrieval);
    let review = if args.no_review {
        ReviewConfig {
            mode: ReviewMode::ApproveAll,
            decisions: None,
        }
    } else if let Some(path) = args.decisions {
        ReviewConfig {
            mode: ReviewMode::File,
            decisions: Some(path),
        }
    } else {
        ReviewConfig::default()
    };
    let cfg = RunConfig {
        input: args.input,
        out_dir: args.out_dir,
        profile: args.profile,
        extract: ExtractOptions {
            mode: args.extract_mode.into(),
            min_len: args.min_len,
        },
        review,
        retrieval,
    };
    cfg.validate()?;
    execute(cfg).await
}

async fn execute(cfg: RunConfig) -> Result<()> {
    let context = match &cfg.profile {
        Some(path) => build_query_from_profile(
            &load_profile(path).with_context(|| format!("failed to load {}", path.display()))?,
        ),
        None => String::new(),
    };
    let mut decisions = decision_source(&cfg.review)?;
    let embeddings = EmbeddingClient::from_env()?;
    let engine = build_engine(cfg.retrieval.clone(), embeddings)
        .await
        .context("failed to build retrieval engine")?;
    info!(
        input = %cfg.input.display(),
        out_dir = %cfg.out_dir.display(),
        judge = judge_label(&cfg),
        "pipeline starting"
    );
    let reports = run_pipeline(
        || enrich_stage(&engine, &cfg.input, &cfg.extract, &context, &cfg.out_dir),
        || detect_stage(&cfg.out_dir),
        || generate_stage(&cfg.out_dir),
        || review_stage(&cfg.out_dir, decisions.as_mut()),
    )
    .await?;
    for report in &reports {
        println!(
            "[remedy] {} -> {} ({} records)",
            report.stage,
            report.path.display(),
            report.records
        );
    }
    Ok(())
}

fn judge_label(cfg: &RunConfig) -> &'static str {
    if cfg.retrieval.rerank_enabled {
        cfg.retrieval.judge_provider.as_str()
    } else {
        "none"
    }
}

fn decision_source(review: &ReviewConfig) -> Result<Box<dyn DecisionSource>> {
    Ok(match review.mode {
        ReviewMode::Interactive => Box::new(Interactive::stdio()),
        ReviewMode::ApproveAll => Box::new(ApproveAll),
        ReviewMode::File => {
            let path = review
                .decisions
                .as_deref()
                .context("review mode 'file' needs a decisions path")?;
            Box::new(DecisionFile::load(path)?)
        }
    })
}

/// Runs the four stages in order. The first failing stage stops the run and
/// later stages are never invoked.
pub async fn run_pipeline<FEnrich, FutEnrich, FDetect, FGenerate, FReview>(
    enrich_fn: FEnrich,
    detect_fn: FDetect,
    generate_fn: FGenerate,
    review_fn: FReview,
) -> std::result::Result<Vec<StageReport>, StageError>
where
    FEnrich: FnOnce() -> FutEnrich,
    FutEnrich: Future<Output = std::result::Result<StageReport, StageError>>,
    FDetect: FnOnce() -> std::result::Result<StageReport, StageError>,
    FGenerate: FnOnce() -> std::result::Result<StageReport, StageError>,
    FReview: FnOnce() -> std::result::Result<StageReport, StageError>,
{
    let mut reports = Vec::with_capacity(4);
    info!(stage = %Stage::Enrichment, "stage started");
    reports.push(finish(enrich_fn().await)?);
    info!(stage = %Stage::IssueDetection, "stage started");
    reports.push(finish(detect_fn())?);
    info!(stage = %Stage::CandidateGeneration, "stage started");
    reports.push(finish(generate_fn())?);
    info!(stage = %Stage::Review, "stage started");
    reports.push(finish(review_fn())?);
    Ok(reports)
}

fn finish(
    result: std::result::Result<StageReport, StageError>,
) -> std::result::Result<StageReport, StageError> {
    match &result {
        Ok(report) => info!(
            stage = %report.stage,
            path = %report.path.display(),
            records = report.records,
            "stage finished"
        ),
        Err(err) => error!(
            stage = %err.stage,
            kind = %err.kind,
            error = %err.message,
            "stage failed"
        ),
    }
    result
}

pub async fn enrich_stage<I: EmbeddingIndex, J: Judge>(
    engine: &RetrievalEngine<I, J>,
    input: &Path,
    extract: &ExtractOptions,
    context: &str,
    out_dir: &Path,
) -> std::result::Result<StageReport, StageError> {
    let stage = Stage::Enrichment;
    let source_path = input.display().to_string();
    let text = read_document(input).map_err(|err| StageError::new(stage, err.kind(), err))?;
    let elements = extract_elements(&text, &source_path, extract);
    info!(stage = %stage, elements = elements.len(), mode = ?extract.mode, "elements extracted");
    let outcomes = enrich_elements(engine, context, &elements).await;
    let count = |status: &str| outcomes.iter().filter(|o| o.status() == status).count();
    let metadata = ArtifactMetadata::new(stage, &source_path)
        .with_count("elements", elements.len())
        .with_count("found", count("found"))
        .with_count("empty", count("empty"))
        .with_count("failed", count("failed"));
    let records = elements.len();
    let artifact = ElementsArtifact {
        metadata,
        elements: elements
            .into_iter()
            .zip(outcomes)
            .map(|(element, evidence)| ElementEvidence { element, evidence })
            .collect(),
    };
    let path = write_artifact(out_dir, &artifact).map_err(artifact_failure(stage))?;
    Ok(StageReport {
        stage,
        path,
        records,
    })
}

pub fn detect_stage(out_dir: &Path) -> std::result::Result<StageReport, StageError> {
    let stage = Stage::IssueDetection;
    let upstream: ElementsArtifact = read_artifact(out_dir).map_err(artifact_failure(stage))?;
    let issues: Vec<Issue> = upstream
        .elements
        .iter()
        .flat_map(|entry| detect_issues(&entry.element))
        .collect();
    let metadata = ArtifactMetadata::new(stage, upstream.metadata.source_path.clone())
        .with_count("elements", upstream.elements.len())
        .with_count("issues", issues.len());
    let records = issues.len();
    let artifact = IssuesArtifact {
        metadata,
        elements: upstream.elements,
        issues,
    };
    let path = write_artifact(out_dir, &artifact).map_err(artifact_failure(stage))?;
    Ok(StageReport {
        stage,
        path,
        records,
    })
}

pub fn generate_stage(out_dir: &Path) -> std::result::Result<StageReport, StageError> {
    let stage = Stage::CandidateGeneration;
    let upstream: IssuesArtifact = read_artifact(out_dir).map_err(artifact_failure(stage))?;
    let candidates = build_candidates(&upstream);
    let metadata = ArtifactMetadata::new(stage, upstream.metadata.source_path.clone())
        .with_count("issues", upstream.issues.len())
        .with_count("candidates", candidates.len());
    let records = candidates.len();
    let artifact = CandidatesArtifact {
        metadata,
        candidates,
    };
    let path = write_artifact(out_dir, &artifact).map_err(artifact_failure(stage))?;
    Ok(StageReport {
        stage,
        path,
        records,
    })
}

pub fn review_stage(
    out_dir: &Path,
    source: &mut dyn DecisionSource,
) -> std::result::Result<StageReport, StageError> {
    let stage = Stage::Review;
    let upstream: CandidatesArtifact = read_artifact(out_dir).map_err(artifact_failure(stage))?;
    let total = upstream.candidates.len();
    let mut decisions = Vec::with_capacity(total);
    for (idx, candidate) in upstream.candidates.iter().enumerate() {
        let decision = review(candidate, idx + 1, total, source)
            .map_err(|err| StageError::new(stage, err.kind(), err))?;
        decisions.push(decision);
    }
    let accepted: Vec<_> = upstream
        .candidates
        .into_iter()
        .zip(&decisions)
        .filter(|(_, decision)| decision.approved)
        .map(|(candidate, _)| candidate)
        .collect();
    let metadata = ArtifactMetadata::new(stage, upstream.metadata.source_path.clone())
        .with_count("candidates", total)
        .with_count("accepted", accepted.len())
        .with_count("rejected", total - accepted.len());
    let records = accepted.len();
    let artifact = FinalArtifact {
        metadata,
        decisions,
        accepted,
    };
    let path = write_artifact(out_dir, &artifact).map_err(artifact_failure(stage))?;
    Ok(StageReport {
        stage,
        path,
        records,
    })
}
