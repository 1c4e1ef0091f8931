use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use remedy_core::{Element, EvidenceOutcome};

use crate::engine::RetrievalEngine;
use crate::index::EmbeddingIndex;
use crate::judge::Judge;
use crate::query::build_element_query;

/// Runs one engine query per element, at most `concurrency` at a time.
/// Outcomes line up with `elements` by position; a failed query becomes a
/// `Failed` outcome for that element only.
pub async fn enrich_elements<I: EmbeddingIndex, J: Judge>(
    engine: &RetrievalEngine<I, J>,
    context: &str,
    elements: &[Element],
) -> Vec<EvidenceOutcome> {
    let concurrency = engine.config().concurrency.max(1);
    let outcomes: Vec<EvidenceOutcome> = stream::iter(elements.iter().map(|element| {
        let query = build_element_query(context, &element.raw_content);
        async move {
            match engine.query(&query).await {
                Ok(hits) => EvidenceOutcome::from_hits(query, hits),
                Err(err) => {
                    warn!(
                        element_id = %element.id,
                        kind = %err.kind(),
                        error = %err,
                        "evidence retrieval failed"
                    );
                    EvidenceOutcome::Failed {
                        query,
                        kind: err.kind(),
                        message: err.to_string(),
                    }
                }
            }
        }
    }))
    .buffered(concurrency)
    .collect()
    .await;
    let failed = outcomes.iter().filter(|o| o.is_failed()).count();
    let empty = outcomes.iter().filter(|o| o.status() == "empty").count();
    info!(
        elements = elements.len(),
        failed,
        empty,
        concurrency,
        "enrichment finished"
    );
    outcomes
}
