use std::collections::HashSet;
use std::env;

use reqwest::{header::HeaderValue, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use remedy_core::tokens;

/// Marks the part of a rerank prompt that holds the real documents and question.
/// Everything before it is instructions and a worked example.
pub const RERANK_PROMPT_MARKER: &str = "Let's try this now:";

const MAX_RETRIES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Gemini,
    Deepseek,
    Local,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::Gemini => "gemini",
            LlmProvider::Deepseek => "deepseek",
            LlmProvider::Local => "local",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "openai" => Some(LlmProvider::OpenAi),
            "anthropic" => Some(LlmProvider::Anthropic),
            "gemini" => Some(LlmProvider::Gemini),
            "deepseek" => Some(LlmProvider::Deepseek),
            "local" => Some(LlmProvider::Local),
            _ => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "gpt-4.1-mini",
            LlmProvider::Anthropic => "claude-3-5-sonnet",
            LlmProvider::Gemini => "gemini-1.5-flash",
            LlmProvider::Deepseek => "deepseek-chat",
            LlmProvider::Local => "local",
        }
    }
}

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("{var} is not set")]
    MissingApiKey { var: String },
    #[error("{var} is invalid: {reason}")]
    InvalidApiKey { var: String, reason: String },
    #[error("{provider} request failed: {message}")]
    Request {
        provider: &'static str,
        message: String,
    },
    #[error("{provider} returned error (status {status}): {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },
    #[error("{provider} rate limited after {retries} retries")]
    RateLimited {
        provider: &'static str,
        retries: usize,
    },
    #[error("failed to decode {provider} response: {message}")]
    Decode {
        provider: &'static str,
        message: String,
    },
}

impl LlmError {
    /// The provider answered, but not with anything usable.
    pub fn is_malformed(&self) -> bool {
        matches!(self, LlmError::Decode { .. })
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub user: String,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl LlmResponse {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    provider: LlmProvider,
    model: String,
    config: ProviderConfig,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Clone)]
enum ProviderConfig {
    OpenAi(OpenAiConfig),
    Anthropic(AnthropicConfig),
    Gemini(GeminiConfig),
    Deepseek(DeepseekConfig),
    Local,
}

#[derive(Clone)]
struct OpenAiConfig {
    api_key: String,
    base_url: String,
}

#[derive(Clone)]
struct AnthropicConfig {
    api_key: String,
    max_tokens: u32,
}

#[derive(Clone)]
struct GeminiConfig {
    api_key: String,
}

#[derive(Clone)]
struct DeepseekConfig {
    api_key: String,
}

impl LlmClient {
    pub fn new(provider: LlmProvider, model: impl Into<String>) -> Result<Self> {
        let model = model.into();
        let config = match provider {
            LlmProvider::OpenAi => ProviderConfig::OpenAi(OpenAiConfig {
                api_key: read_api_key("OPENAI_API_KEY")?,
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            }),
            LlmProvider::Anthropic => ProviderConfig::Anthropic(AnthropicConfig {
                api_key: read_api_key("ANTHROPIC_API_KEY")?,
                max_tokens: env::var("ANTHROPIC_MAX_TOKENS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(512),
            }),
            LlmProvider::Gemini => ProviderConfig::Gemini(GeminiConfig {
                api_key: read_api_key("GEMINI_API_KEY")?,
            }),
            LlmProvider::Deepseek => ProviderConfig::Deepseek(DeepseekConfig {
                api_key: read_api_key("DEEPSEEK_API_KEY")?,
            }),
            LlmProvider::Local => ProviderConfig::Local,
        };
        Ok(Self {
            http: Client::new(),
            provider,
            model,
            config,
        })
    }

    /// Offline client; needs no key and answers deterministically.
    pub fn local() -> Self {
        Self {
            http: Client::new(),
            provider: LlmProvider::Local,
            model: LlmProvider::Local.default_model().to_string(),
            config: ProviderConfig::Local,
        }
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn chat(&self, req: &LlmRequest) -> Result<LlmResponse> {
        debug!(
            provider = self.provider.as_str(),
            model = %self.model,
            prompt_chars = req.user.len(),
            "llm chat"
        );
        match &self.config {
            ProviderConfig::OpenAi(cfg) => self.chat_openai(cfg, req).await,
            ProviderConfig::Anthropic(cfg) => self.chat_anthropic(cfg, req).await,
            ProviderConfig::Gemini(cfg) => self.chat_gemini(cfg, req).await,
            ProviderConfig::Deepseek(cfg) => self.chat_deepseek(cfg, req).await,
            ProviderConfig::Local => Ok(self.chat_local(req)),
        }
    }

    async fn chat_openai(&self, cfg: &OpenAiConfig, req: &LlmRequest) -> Result<LlmResponse> {
        let base = cfg.base_url.trim_end_matches('/');
        let (url, payload) = if openai_uses_responses(&self.model) {
            let mut input = Vec::new();
            if let Some(system) = &req.system {
                input.push(json!({
                    "role": "system",
                    "content": [{ "type": "input_text", "text": system }],
                }));
            }
            input.push(json!({
                "role": "user",
                "content": [{ "type": "input_text", "text": req.user }],
            }));
            (
                format!("{base}/responses"),
                json!({ "model": self.model, "input": input }),
            )
        } else {
            (
                format!("{base}/chat/completions"),
                json!({ "model": self.model, "messages": chat_messages(req) }),
            )
        };
        let value = self.post_openai_with_retry(cfg, &url, &payload).await?;
        let content = extract_openai_text(&value).ok_or_else(|| LlmError::Decode {
            provider: "openai",
            message: "missing text in OpenAI response".to_string(),
        })?;
        let (prompt_tokens, completion_tokens) = parse_openai_usage(&value);
        Ok(LlmResponse {
            content,
            prompt_tokens,
            completion_tokens,
        })
    }

    async fn post_openai_with_retry(
        &self,
        cfg: &OpenAiConfig,
        url: &str,
        payload: &Value,
    ) -> Result<Value> {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let response = match self
                .http
                .post(url)
                .bearer_auth(&cfg.api_key)
                .json(payload)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(err) => {
                    if attempt > MAX_RETRIES {
                        return Err(LlmError::Request {
                            provider: "openai",
                            message: err.to_string(),
                        });
                    }
                    warn!(attempt, error = %err, "openai request failed, retrying");
                    sleep(backoff_delay(attempt, None)).await;
                    continue;
                }
            };
            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                if attempt > MAX_RETRIES {
                    return Err(LlmError::RateLimited {
                        provider: "openai",
                        retries: MAX_RETRIES,
                    });
                }
                let wait = backoff_delay(attempt, response.headers().get("retry-after"));
                warn!(attempt, wait_secs = wait.as_secs(), "openai rate limited");
                sleep(wait).await;
                continue;
            }
            return decode_json_body("openai", response).await;
        }
    }

    async fn chat_anthropic(&self, cfg: &AnthropicConfig, req: &LlmRequest) -> Result<LlmResponse> {
        let mut payload = json!({
            "model": self.model,
            "max_tokens": cfg.max_tokens,
            "messages": [ { "role": "user", "content": req.user } ],
        });
        if let Some(system) = &req.system {
            payload["system"] = json!(system);
        }
        let response = self
            .http
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &cfg.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&payload)
            .send()
            .await
            .map_err(|err| request_error("anthropic", err))?;
        let value = decode_json_body("anthropic", response).await?;
        let parsed: AnthropicResponse = from_value("anthropic", value)?;
        let text = parsed
            .content
            .into_iter()
            .find_map(|part| part.text)
            .ok_or_else(|| LlmError::Decode {
                provider: "anthropic",
                message: "missing text in Anthropic response".to_string(),
            })?;
        let usage = parsed.usage.unwrap_or_default();
        Ok(LlmResponse {
            content: text,
            prompt_tokens: usage.input_tokens.unwrap_or(0),
            completion_tokens: usage.output_tokens.unwrap_or(0),
        })
    }

    async fn chat_gemini(&self, cfg: &GeminiConfig, req: &LlmRequest) -> Result<LlmResponse> {
        let mut prompt = String::new();
        if let Some(system) = &req.system {
            prompt.push_str("[SYSTEM]\n");
            prompt.push_str(system.trim());
            prompt.push_str("\n\n");
        }
        prompt.push_str(&req.user);
        let payload = json!({
            "contents": [ { "parts": [ { "text": prompt } ] } ]
        });
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        );
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &cfg.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| request_error("gemini", err))?;
        let value = decode_json_body("gemini", response).await?;
        let parsed: GeminiResponse = from_value("gemini", value)?;
        let text = parsed
            .candidates
            .and_then(|mut c| c.pop())
            .and_then(|candidate| {
                candidate
                    .content
                    .parts
                    .into_iter()
                    .find_map(|part| part.text)
            })
            .ok_or_else(|| LlmError::Decode {
                provider: "gemini",
                message: "missing text in Gemini response".to_string(),
            })?;
        let usage = parsed.usage.unwrap_or_default();
        Ok(LlmResponse {
            content: text,
            prompt_tokens: usage.prompt_tokens.unwrap_or(0),
            completion_tokens: usage.completion_tokens.unwrap_or(0),
        })
    }

    async fn chat_deepseek(&self, cfg: &DeepseekConfig, req: &LlmRequest) -> Result<LlmResponse> {
        let payload = json!({
            "model": self.model,
            "messages": chat_messages(req),
        });
        let response = self
            .http
            .post("https://api.deepseek.com/v1/chat/completions")
            .bearer_auth(&cfg.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| request_error("deepseek", err))?;
        let value = decode_json_body("deepseek", response).await?;
        let parsed: ChatResponse = from_value("deepseek", value)?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| LlmError::Decode {
                provider: "deepseek",
                message: "missing text in DeepSeek response".to_string(),
            })?;
        let usage = parsed.usage.unwrap_or_default();
        Ok(LlmResponse {
            content: text,
            prompt_tokens: usage.prompt_tokens.unwrap_or(0),
            completion_tokens: usage.completion_tokens.unwrap_or(0),
        })
    }

    fn chat_local(&self, req: &LlmRequest) -> LlmResponse {
        LlmResponse {
            content: synthesize_local_response(req),
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }
}

fn chat_messages(req: &LlmRequest) -> Vec<Value> {
    let mut messages = Vec::new();
    if let Some(system) = &req.system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.push(json!({ "role": "user", "content": req.user }));
    messages
}

fn request_error(provider: &'static str, err: reqwest::Error) -> LlmError {
    LlmError::Request {
        provider,
        message: err.to_string(),
    }
}

fn from_value<T: serde::de::DeserializeOwned>(provider: &'static str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|err| LlmError::Decode {
        provider,
        message: err.to_string(),
    })
}

async fn decode_json_body(provider: &'static str, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await.map_err(|err| request_error(provider, err))?;
    if !status.is_success() {
        return Err(LlmError::Status {
            provider,
            status: status.as_u16(),
            body,
        });
    }
    serde_json::from_str(&body).map_err(|err| LlmError::Decode {
        provider,
        message: err.to_string(),
    })
}

fn backoff_delay(attempt: usize, retry_after: Option<&HeaderValue>) -> Duration {
    if let Some(value) = retry_after {
        if let Ok(text) = value.to_str() {
            if let Ok(secs) = text.parse::<u64>() {
                return Duration::from_secs(secs.max(1));
            }
        }
    }
    let capped = attempt.min(6) as u32;
    Duration::from_secs(1u64 << capped)
}

fn openai_uses_responses(model: &str) -> bool {
    let lower = model.to_lowercase();
    lower.starts_with("gpt-4.1") || lower.starts_with("gpt-4o") || lower.starts_with("o1")
}

fn parse_openai_usage(value: &Value) -> (u32, u32) {
    let Some(usage) = value.get("usage") else {
        return (0, 0);
    };
    let read = |keys: [&str; 2]| {
        keys.iter()
            .find_map(|key| usage.get(*key).and_then(|v| v.as_u64()))
            .unwrap_or(0) as u32
    };
    (
        read(["input_tokens", "prompt_tokens"]),
        read(["output_tokens", "completion_tokens"]),
    )
}

fn extract_openai_text(value: &Value) -> Option<String> {
    if let Some(outputs) = value.get("output").and_then(|v| v.as_array()) {
        for output in outputs {
            if let Some(content) = output.get("content").and_then(|v| v.as_array()) {
                for block in content {
                    if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                        return Some(text.to_string());
                    }
                }
            }
        }
    }
    if let Some(text) = value.get("output_text").and_then(|t| t.as_str()) {
        return Some(text.to_string());
    }
    let choice = value
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|choices| choices.first())?;
    if let Some(text) = choice.get("text").and_then(|t| t.as_str()) {
        return Some(text.to_string());
    }
    let content = choice.get("message")?.get("content")?;
    if let Some(text) = content.as_str() {
        return Some(text.to_string());
    }
    content
        .as_array()?
        .iter()
        .find_map(|part| part.get("text").and_then(|t| t.as_str()))
        .map(|text| text.to_string())
}

fn read_api_key(var: &str) -> Result<String> {
    let value = env::var(var).map_err(|_| LlmError::MissingApiKey {
        var: var.to_string(),
    })?;
    validate_api_key(var, &value)?;
    Ok(value)
}

fn validate_api_key(var: &str, value: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(LlmError::InvalidApiKey {
            var: var.to_string(),
            reason: reason.to_string(),
        })
    };
    if var.contains("ANTHROPIC") && !value.starts_with("sk-ant-") {
        return invalid("must start with 'sk-ant-'");
    }
    if (var.contains("OPENAI") || var.contains("DEEPSEEK")) && !value.starts_with("sk-") {
        return invalid("must start with 'sk-'");
    }
    if var.contains("GEMINI") && !value.starts_with("AI") {
        return invalid("must be a Gemini API key (starts with 'AI...')");
    }
    Ok(())
}

fn synthesize_local_response(req: &LlmRequest) -> String {
    if let Some(idx) = req.user.find(RERANK_PROMPT_MARKER) {
        return local_rerank_answer(&req.user[idx + RERANK_PROMPT_MARKER.len()..]);
    }
    summarize_text(&req.user, 40)
}

/// Scores each numbered document by the share of question tokens it contains
/// and answers in the `Doc: n, Relevance: r` format.
fn local_rerank_answer(section: &str) -> String {
    let (documents_part, question) = match section.rfind("Question:") {
        Some(idx) => (&section[..idx], &section[idx + "Question:".len()..]),
        None => (section, ""),
    };
    let question = question.split("Answer:").next().unwrap_or_default();
    let question_tokens: HashSet<String> = tokens(question).collect();
    if question_tokens.is_empty() {
        return "None".to_string();
    }
    let mut scored = Vec::new();
    for (number, text) in split_documents(documents_part) {
        let doc_tokens: HashSet<String> = tokens(&text).collect();
        let overlap = question_tokens.intersection(&doc_tokens).count();
        if overlap == 0 {
            continue;
        }
        let ratio = overlap as f32 / question_tokens.len() as f32;
        let relevance = 1 + (ratio * 9.0).round() as u32;
        scored.push((number, relevance));
    }
    if scored.is_empty() {
        return "None".to_string();
    }
    scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    scored
        .iter()
        .map(|(number, relevance)| format!("Doc: {number}, Relevance: {relevance}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn split_documents(text: &str) -> Vec<(usize, String)> {
    let mut documents: Vec<(usize, String)> = Vec::new();
    for line in text.lines() {
        let header = line
            .trim()
            .strip_prefix("Document ")
            .and_then(|rest| rest.strip_suffix(':'))
            .and_then(|number| number.trim().parse::<usize>().ok());
        match header {
            Some(number) => documents.push((number, String::new())),
            None => {
                if let Some((_, body)) = documents.last_mut() {
                    body.push_str(line);
                    body.push('\n');
                }
            }
        }
    }
    documents
}

fn summarize_text(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<&str>>()
        .join(" ")
}

#[derive(Default, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[derive(Default, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    #[serde(rename = "usageMetadata")]
    usage: Option<GeminiUsage>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Default, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_tokens: Option<u32>,
    #[serde(rename = "candidatesTokenCount")]
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}
