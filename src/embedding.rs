//! Embedding provider implementations.
//!
//! Two backends share the [`EmbeddingProvider`] trait:
//!
//! - **[`HashEmbedder`]** — deterministic bag-of-tokens hashing into a
//!   fixed number of buckets, L2-normalized. No network, no model files;
//!   good enough for demos and the default for tests.
//! - **[`OpenAIEmbedder`]** — calls an OpenAI-compatible `/v1/embeddings`
//!   endpoint with batching, retry, and backoff.
//!
//! # Retry Strategy
//!
//! The OpenAI provider uses exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use docvault_core::embedding::{normalize, EmbeddingProvider};
use docvault_core::{Error, Result};

use crate::config::EmbeddingConfig;

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Instantiate the provider selected by the configuration.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(config.dims))),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        other => Err(Error::validation(format!(
            "Unknown embedding provider: '{}'. Must be hash or openai.",
            other
        ))),
    }
}

// ============ Hash Provider ============

/// Deterministic token-hashing embedder.
///
/// Each token is hashed into one of `dims` buckets; the bucket counts
/// form the vector, which is then L2-normalized. Texts sharing vocabulary
/// land near each other, which is all the demo corpus needs.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for token in tokenize(text) {
            vector[token_bucket(&token, self.dims)] += 1.0;
        }
        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn token_bucket(token: &str, dims: usize) -> usize {
    let digest = Sha256::digest(token.as_bytes());
    let value = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
    (value as usize) % dims
}

// ============ OpenAI Provider ============

/// Embedding provider using an OpenAI-compatible embeddings API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::validation("embedding.model required for OpenAI provider"))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(Error::validation(
                "OPENAI_API_KEY environment variable not set",
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::embedding(e.to_string()))?;

        Ok(Self {
            model,
            dims: config.dims,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            client,
        })
    }

    async fn embed_one_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::embedding("OPENAI_API_KEY not set"))?;

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(OPENAI_EMBEDDINGS_URL)
                .bearer_auth(&api_key)
                .json(&body)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: EmbeddingsResponse = resp
                            .json()
                            .await
                            .map_err(|e| Error::embedding(e.to_string()))?;
                        let mut items = parsed.data;
                        items.sort_by_key(|item| item.index);
                        let mut vectors: Vec<Vec<f32>> =
                            items.into_iter().map(|item| item.embedding).collect();
                        if vectors.len() != texts.len() {
                            return Err(Error::embedding(format!(
                                "expected {} embeddings, got {}",
                                texts.len(),
                                vectors.len()
                            )));
                        }
                        for vector in &mut vectors {
                            normalize(vector);
                        }
                        return Ok(vectors);
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(Error::embedding(format!(
                            "embeddings API returned {}",
                            status
                        )));
                        continue;
                    }
                    let detail = resp.text().await.unwrap_or_default();
                    return Err(Error::embedding(format!(
                        "embeddings API returned {}: {}",
                        status, detail
                    )));
                }
                Err(err) => {
                    last_err = Some(Error::embedding(err.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::embedding("retries exhausted")))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_one_batch(batch).await?);
        }
        Ok(vectors)
    }
}
