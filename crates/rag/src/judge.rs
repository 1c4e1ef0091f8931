use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::time::timeout;
use tracing::debug;

use remedy_core::{flatten_whitespace, RetrievalHit};
use remedy_llm::{LlmClient, LlmRequest, RERANK_PROMPT_MARKER};

use crate::error::{Result, RetrievalError};

/// A judge's verdict on one submitted candidate, addressed by its position in
/// the submitted slice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JudgedCandidate {
    pub index: usize,
    pub score: f32,
}

/// Second-opinion relevance scoring. Returns an ordered subset of the
/// submitted candidates; it may reorder, rescore and drop, never add.
pub trait Judge: Send + Sync {
    fn rerank(
        &self,
        query: &str,
        candidates: &[RetrievalHit],
    ) -> impl Future<Output = Result<Vec<JudgedCandidate>>> + Send;
}

static ANSWER_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)doc(?:ument)?\s*:?\s*(\d+)\s*,\s*relevance\s*:?\s*(-?\d+(?:\.\d+)?)")
        .expect("valid answer regex")
});

const PASSAGE_PROMPT_CHARS: usize = 1500;

/// Chat-model judge. Candidates are sent in numbered batches and the model
/// answers with `Doc: <n>, Relevance: <score>` lines. Each batch call gets
/// its own `call_timeout`.
#[derive(Debug, Clone)]
pub struct LlmJudge {
    client: LlmClient,
    batch_size: usize,
    call_timeout: Duration,
}

impl LlmJudge {
    pub fn new(client: LlmClient, batch_size: usize, call_timeout: Duration) -> Self {
        Self {
            client,
            batch_size: batch_size.max(1),
            call_timeout,
        }
    }
}

impl Judge for LlmJudge {
    async fn rerank(&self, query: &str, candidates: &[RetrievalHit]) -> Result<Vec<JudgedCandidate>> {
        let mut judged = Vec::new();
        for (batch_idx, batch) in candidates.chunks(self.batch_size).enumerate() {
            let offset = batch_idx * self.batch_size;
            let request = LlmRequest {
                system: None,
                user: build_rerank_prompt(query, batch),
            };
            let response = timeout(self.call_timeout, self.client.chat(&request))
                .await
                .map_err(|_| RetrievalError::JudgeTimeout(self.call_timeout.as_millis() as u64))??;
            let answers = parse_rerank_answer(&response.content, batch.len())?;
            debug!(
                provider = self.client.provider().as_str(),
                batch = batch_idx,
                submitted = batch.len(),
                kept = answers.len(),
                tokens = response.total_tokens(),
                "judge batch scored"
            );
            judged.extend(answers.into_iter().map(|(number, score)| JudgedCandidate {
                index: offset + number - 1,
                score,
            }));
        }
        judged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(judged)
    }
}

pub fn build_rerank_prompt(query: &str, batch: &[RetrievalHit]) -> String {
    let mut prompt = String::from(
        "A list of documents is shown below. Each document has a number next to it along \
         with its text. A question is also provided.\n\
         Respond with the numbers of the documents you should consult to answer the question, \
         in order of relevance, as well as the relevance score. The relevance score is a number \
         from 1-10 based on how relevant you think the document is to the question.\n\
         Do not include any documents that are not relevant to the question. \
         If no document is relevant, answer None.\n\
         Example format:\n\
         Document 1:\n<text of document 1>\n\n\
         Document 2:\n<text of document 2>\n\n\
         ...\n\n\
         Document 10:\n<text of document 10>\n\n\
         Question: <question>\n\
         Answer:\n\
         Doc: 9, Relevance: 7\n\
         Doc: 3, Relevance: 4\n\
         Doc: 7, Relevance: 3\n\n",
    );
    prompt.push_str(RERANK_PROMPT_MARKER);
    prompt.push_str("\n\n");
    for (idx, hit) in batch.iter().enumerate() {
        let text = flatten_whitespace(&hit.text);
        let text: String = text.chars().take(PASSAGE_PROMPT_CHARS).collect();
        prompt.push_str(&format!("Document {}:\n{}\n\n", idx + 1, text));
    }
    prompt.push_str(&format!("Question: {}\nAnswer:\n", flatten_whitespace(query)));
    prompt
}

/// Parses `Doc: n, Relevance: s` lines into 1-based document numbers and
/// scores. Repeated numbers keep their first score. `None` means no document
/// is relevant.
pub fn parse_rerank_answer(answer: &str, batch_len: usize) -> Result<Vec<(usize, f32)>> {
    let trimmed = answer.trim();
    if trimmed.trim_end_matches('.').eq_ignore_ascii_case("none") {
        return Ok(Vec::new());
    }
    let mut seen = HashSet::new();
    let mut parsed = Vec::new();
    for captures in trimmed.lines().filter_map(|line| ANSWER_LINE_RE.captures(line)) {
        let number: usize = captures[1].parse().map_err(|_| {
            RetrievalError::Malformed(format!("document number '{}' is not valid", &captures[1]))
        })?;
        let score: f32 = captures[2].parse().map_err(|_| {
            RetrievalError::Malformed(format!("relevance '{}' is not a number", &captures[2]))
        })?;
        if number == 0 || number > batch_len {
            return Err(RetrievalError::Malformed(format!(
                "judge referenced document {number} but only {batch_len} were submitted"
            )));
        }
        if seen.insert(number) {
            parsed.push((number, score));
        }
    }
    if parsed.is_empty() && batch_len > 0 {
        return Err(RetrievalError::Malformed(format!(
            "no relevance lines in judge answer: {}",
            trimmed.chars().take(120).collect::<String>()
        )));
    }
    Ok(parsed)
}
