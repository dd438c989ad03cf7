//! Embedding providers.
//!
//! Concrete implementations of [`Embedder`]:
//! - **[`OpenAIEmbedder`]**: `POST /v1/embeddings`, batched, with retry and backoff.
//! - **[`OllamaEmbedder`]**: `POST /api/embed` on a local Ollama instance.
//! - **[`HashEmbedder`]**: deterministic feature-hashing vectors; offline, used in tests.
//! - **[`DisabledEmbedder`]**: always errors.
//!
//! # Provider Selection
//!
//! Use [`create_embedder`] to instantiate the provider named by
//! `embedding.provider`.
//!
//! # Retry Strategy
//!
//! The OpenAI and Ollama embedders use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use strudel_rag_core::embedding::Embedder;

use crate::config::{EmbeddingConfig, HttpConfig, RateLimitConfig};
use crate::error::ConfigError;
use crate::http;
use crate::rate_limit::{limiter_for, TokenBucket};

/// Instantiate the embedder named in `config.provider`.
pub fn create_embedder(
    config: &EmbeddingConfig,
    http_config: &HttpConfig,
    rate_limit: &RateLimitConfig,
) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config, http_config, rate_limit)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config, http_config)?)),
        "hash" => Ok(Arc::new(HashEmbedder::new(config.dims))),
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled ============

/// An embedder that refuses to embed. Used when `embedding.provider = "disabled"`.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ Hash ============

/// Deterministic bag-of-words embedder.
///
/// Each lowercase alphanumeric token is hashed into one of `dims` buckets
/// and the resulting count vector is L2-normalized, so cosine similarity
/// tracks token overlap. No network, no model download.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dims];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() % self.dims as u64) as usize;
            embedding[bucket] += 1.0;
        }

        let norm_sq: f32 = embedding.iter().map(|v| v * v).sum();
        if norm_sq > 0.0 {
            let inv = 1.0 / norm_sq.sqrt();
            for v in &mut embedding {
                *v *= inv;
            }
        }
        embedding
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

// ============ OpenAI ============

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Embedder backed by the OpenAI embeddings API.
///
/// Requires `OPENAI_API_KEY` in the environment.
pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    max_retries: u32,
    api_key: String,
    client: Client,
    limiter: Arc<TokenBucket>,
}

impl OpenAIEmbedder {
    pub fn new(
        config: &EmbeddingConfig,
        http_config: &HttpConfig,
        rate_limit: &RateLimitConfig,
    ) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| ConfigError::MissingApiKey {
            var: "OPENAI_API_KEY",
        })?;
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            max_retries: config.max_retries,
            api_key,
            client: http::shared_client(http_config)?,
            limiter: limiter_for("openai", rate_limit)?,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(http::backoff(attempt)).await;
            }
            self.limiter.acquire().await;

            let resp = self
                .client
                .post(OPENAI_EMBEDDINGS_URL)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_openai_response(&json, texts.len());
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    if http::is_retryable(status) {
                        warn!(attempt, %status, "OpenAI embeddings request failed, retrying");
                        last_err = Some(anyhow!("OpenAI API error {}: {}", status, body_text));
                        continue;
                    }
                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "OpenAI embeddings connection error");
                    last_err = Some(e.into());
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Embedding failed after retries")))
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        indexed.push((index, vec));
    }
    indexed.sort_by_key(|(index, _)| *index);

    if indexed.len() != expected {
        bail!(
            "Invalid OpenAI response: expected {} embeddings, got {}",
            expected,
            indexed.len()
        );
    }
    Ok(indexed.into_iter().map(|(_, vec)| vec).collect())
}

// ============ Ollama ============

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Embedder backed by a local Ollama instance.
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    max_retries: u32,
    url: String,
    client: Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig, http_config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            max_retries: config.max_retries,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            client: http::shared_client(http_config)?,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(http::backoff(attempt)).await;
            }

            let resp = self
                .client
                .post(format!("{}/api/embed", self.url))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_ollama_response(&json);
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    if http::is_retryable(status) {
                        last_err = Some(anyhow!("Ollama API error {}: {}", status, body_text));
                        continue;
                    }
                    bail!("Ollama API error {}: {}", status, body_text);
                }
                Err(e) => {
                    debug!(attempt, error = %e, "Ollama connection error");
                    last_err = Some(anyhow!(
                        "Ollama connection error (is Ollama running at {}?): {}",
                        self.url,
                        e
                    ));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Ollama embedding failed after retries")))
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            Ok(embedding
                .as_array()
                .ok_or_else(|| anyhow!("Invalid Ollama response: embedding is not an array"))?
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect())
        })
        .collect()
}
