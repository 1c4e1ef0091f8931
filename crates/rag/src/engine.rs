use std::collections::HashSet;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use remedy_core::RetrievalHit;
use remedy_llm::LlmClient;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingClient;
use crate::error::{Result, RetrievalError};
use crate::index::{EmbeddingIndex, SourceIndex};
use crate::judge::{Judge, JudgedCandidate, LlmJudge};
use crate::store::sort_by_score;

/// Thresholded retrieval with optional reranking.
///
/// A query fetches up to `top_k` passages, drops everything scoring below the
/// similarity cutoff and, when anything survives, lets the judge reorder and
/// rescore the survivors. "Nothing relevant" is `Ok(vec![])`; provider
/// failures are errors.
pub struct RetrievalEngine<I, J> {
    index: I,
    judge: Option<J>,
    config: RetrievalConfig,
}

impl<I: EmbeddingIndex, J: Judge> RetrievalEngine<I, J> {
    pub fn new(index: I, judge: Option<J>, config: RetrievalConfig) -> Result<Self> {
        config.validate()?;
        if config.rerank_enabled && judge.is_none() {
            return Err(RetrievalError::InvalidConfig(
                "reranking is enabled but no judge was configured".to_string(),
            ));
        }
        Ok(Self {
            index,
            judge,
            config,
        })
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub async fn query(&self, query: &str) -> Result<Vec<RetrievalHit>> {
        let cfg = &self.config;
        let mut hits = timeout(cfg.timeout(), self.index.search(query, cfg.top_k))
            .await
            .map_err(|_| RetrievalError::IndexTimeout(cfg.timeout_ms))??;
        sort_by_score(&mut hits, |hit| hit.score);
        hits.truncate(cfg.top_k);
        let fetched = hits.len();
        hits.retain(|hit| hit.score >= cfg.similarity_cutoff);
        debug!(
            fetched,
            kept = hits.len(),
            cutoff = cfg.similarity_cutoff,
            "thresholded retrieval"
        );
        if hits.is_empty() {
            return Ok(Vec::new());
        }
        if !cfg.include_embeddings {
            for hit in hits.iter_mut() {
                hit.embedding = None;
            }
        }

        let judge = match (&self.judge, cfg.rerank_enabled) {
            (Some(judge), true) => judge,
            _ => {
                hits.truncate(cfg.top_k.min(cfg.rerank_top_n));
                return Ok(hits);
            }
        };

        match self.rerank(judge, query, &hits).await {
            Ok(reranked) => Ok(reranked),
            Err(err) if cfg.judge_fallback && err.is_judge_failure() => {
                warn!(
                    kind = %err.kind(),
                    error = %err,
                    "judge failed, serving thresholded results"
                );
                hits.truncate(cfg.top_k.min(cfg.rerank_top_n));
                Ok(hits)
            }
            Err(err) => Err(err),
        }
    }

    async fn rerank(
        &self,
        judge: &J,
        query: &str,
        candidates: &[RetrievalHit],
    ) -> Result<Vec<RetrievalHit>> {
        let cfg = &self.config;
        let budget = judge_budget(cfg, candidates.len());
        let judged = timeout(budget, judge.rerank(query, candidates))
            .await
            .map_err(|_| RetrievalError::JudgeTimeout(budget.as_millis() as u64))??;
        let mut reranked = select_judged(candidates, &judged)?;
        sort_by_score(&mut reranked, |hit| hit.score);
        reranked.truncate(cfg.rerank_top_n);
        debug!(
            submitted = candidates.len(),
            budget_ms = budget.as_millis() as u64,
            returned = reranked.len(),
            "judge reranked candidates"
        );
        Ok(reranked)
    }
}

/// Overall wait for a judge pass: one `timeout_ms` per batch the judge sends.
fn judge_budget(cfg: &RetrievalConfig, candidates: usize) -> Duration {
    let batches = candidates.div_ceil(cfg.judge_batch_size.max(1)).max(1);
    cfg.timeout().saturating_mul(u32::try_from(batches).unwrap_or(u32::MAX))
}

/// Engine over the index and judge variants a `RetrievalConfig` selects.
pub type ConfiguredEngine = RetrievalEngine<SourceIndex, LlmJudge>;

pub async fn build_engine(
    config: RetrievalConfig,
    embeddings: EmbeddingClient,
) -> Result<ConfiguredEngine> {
    config.validate()?;
    let index = config.source.open(embeddings).await?;
    let judge = if config.rerank_enabled {
        let client = LlmClient::new(config.judge_provider, config.judge_model())?;
        Some(LlmJudge::new(client, config.judge_batch_size, config.timeout()))
    } else {
        None
    };
    info!(
        source = %config.source.describe(),
        rerank = config.rerank_enabled,
        judge = config.judge_provider.as_str(),
        cutoff = config.similarity_cutoff,
        "retrieval engine ready"
    );
    RetrievalEngine::new(index, judge, config)
}

/// Maps judge verdicts back onto the submitted candidates in the judge's
/// order, replacing similarity scores with the judge's. The caller re-sorts by
/// the new scores; ties keep the judge's order.
fn select_judged(
    candidates: &[RetrievalHit],
    judged: &[JudgedCandidate],
) -> Result<Vec<RetrievalHit>> {
    let mut seen = HashSet::new();
    let mut selected = Vec::with_capacity(judged.len());
    for verdict in judged {
        let candidate = candidates.get(verdict.index).ok_or_else(|| {
            RetrievalError::Malformed(format!(
                "judge returned candidate {} of {}",
                verdict.index,
                candidates.len()
            ))
        })?;
        if !seen.insert(verdict.index) {
            return Err(RetrievalError::Malformed(format!(
                "judge returned candidate {} twice",
                verdict.index
            )));
        }
        let mut hit = candidate.clone();
        hit.score = verdict.score;
        selected.push(hit);
    }
    Ok(selected)
}
