use reqwest::Client;
use serde::Deserialize;
use std::env;

use remedy_core::{HashEmbedder, HashEmbedderConfig};

use crate::error::{Result, RetrievalError};

#[derive(Clone)]
pub enum EmbeddingBackend {
    Hash(HashEmbedder),
    OpenAi(OpenAiEmbeddingClient),
}

/// Turns text into vectors. The same backend must be used to index a
/// collection and to query it.
#[derive(Clone)]
pub struct EmbeddingClient {
    backend: EmbeddingBackend,
}

impl EmbeddingClient {
    pub fn from_env() -> Result<Self> {
        match env::var("EMBEDDING_PROVIDER")
            .unwrap_or_else(|_| "hash".to_string())
            .to_lowercase()
            .as_str()
        {
            "openai" => {
                let model = env::var("EMBEDDING_MODEL")
                    .unwrap_or_else(|_| "text-embedding-3-small".to_string());
                Ok(Self {
                    backend: EmbeddingBackend::OpenAi(OpenAiEmbeddingClient::new(&model)?),
                })
            }
            "hash" => {
                let dims = env::var("HASH_EMBED_DIMENSIONS")
                    .ok()
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(64);
                Ok(Self::hash_with(HashEmbedderConfig {
                    dimensions: dims,
                    seed: 1337,
                }))
            }
            other => Err(RetrievalError::InvalidConfig(format!(
                "unknown EMBEDDING_PROVIDER '{other}' (expected hash or openai)"
            ))),
        }
    }

    pub fn hash() -> Self {
        Self::hash_with(HashEmbedderConfig::default())
    }

    pub fn hash_with(config: HashEmbedderConfig) -> Self {
        Self {
            backend: EmbeddingBackend::Hash(HashEmbedder::new(config)),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match &self.backend {
            EmbeddingBackend::Hash(_) => "hash",
            EmbeddingBackend::OpenAi(_) => "openai",
        }
    }

    pub async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        match &self.backend {
            EmbeddingBackend::Hash(embedder) => Ok(inputs
                .iter()
                .map(|text| embedder.embed_text(text))
                .collect()),
            EmbeddingBackend::OpenAi(client) => client.embed_batch(inputs).await,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let inputs = vec![text.to_string()];
        let mut output = self.embed_batch(&inputs).await?;
        output.pop().ok_or_else(|| {
            RetrievalError::Malformed("embedding backend returned no vector".to_string())
        })
    }
}

#[derive(Clone)]
pub struct OpenAiEmbeddingClient {
    http: Client,
    model: String,
    api_key: String,
}

impl OpenAiEmbeddingClient {
    pub fn new(model: &str) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY").map_err(|_| {
            RetrievalError::InvalidConfig(
                "OPENAI_API_KEY is required for openai embeddings".to_string(),
            )
        })?;
        Ok(Self {
            http: Client::new(),
            model: model.to_string(),
            api_key,
        })
    }

    pub async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let url = "https://api.openai.com/v1/embeddings";
        let payload = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                RetrievalError::IndexUnavailable(format!("openai embeddings request: {err}"))
            })?;
        if !response.status().is_success() {
            return Err(RetrievalError::IndexUnavailable(format!(
                "openai embeddings request failed: {}",
                response.status()
            )));
        }
        let parsed: OpenAiEmbeddingResponse = response
            .json()
            .await
            .map_err(|err| RetrievalError::Malformed(format!("openai embeddings: {err}")))?;
        if parsed.data.len() != inputs.len() {
            return Err(RetrievalError::Malformed(format!(
                "openai embeddings returned {} vectors for {} inputs",
                parsed.data.len(),
                inputs.len()
            )));
        }
        Ok(parsed.data.into_iter().map(|data| data.embedding).collect())
    }
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
}
