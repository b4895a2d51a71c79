//! Embedding capability: `embed(text) -> vector` of fixed dimension.
//!
//! [`EmbeddingClient`] is the seam tests inject fakes through; the real
//! implementation calls an OpenAI-compatible `/v1/embeddings` endpoint.
//!
//! # Retry strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! A response whose vectors do not match the configured dimensionality is a
//! configuration error (wrong model wired up), never retried.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Capability interface for text embedding.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model(&self) -> &str;

    /// Fixed vector dimensionality.
    fn dims(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text (e.g. a question).
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(std::slice::from_ref(&text.to_string())).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::transient("embedding", "empty embedding response"))
    }
}

/// Client for an OpenAI-compatible embeddings endpoint.
pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OpenAiEmbeddings {
    /// Build from configuration, resolving `OPENAI_API_KEY` from the
    /// environment. Fails fast when the key is absent.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Configuration("OPENAI_API_KEY not set".to_string()))?;
        Self::new(
            "https://api.openai.com".to_string(),
            api_key,
            config.model.clone(),
            config.dims,
            config.max_retries,
            config.timeout_secs,
        )
    }

    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        dims: usize,
        max_retries: u32,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            dims,
            max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddings {
    fn model(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/v1/embeddings", self.base_url);
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

            let resp = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| Error::transient("embedding", e.to_string()))?;
                        let vectors = parse_embedding_response(&json)?;
                        return verify_dims(vectors, texts.len(), self.dims);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(Error::transient(
                            "embedding",
                            format!("{status}: {body_text}"),
                        ));
                        continue;
                    }

                    return Err(Error::rejected(
                        "embedding",
                        format!("{status}: {body_text}"),
                    ));
                }
                Err(e) => {
                    last_err = Some(Error::transient("embedding", e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::transient("embedding", "embedding failed after retries")))
    }
}

fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| Error::transient("embedding", "response missing data array"))?;

    let mut vectors = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| Error::transient("embedding", "response item missing embedding"))?;
        let vector: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        vectors.push(vector);
    }
    Ok(vectors)
}

fn verify_dims(vectors: Vec<Vec<f32>>, expected_count: usize, dims: usize) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != expected_count {
        return Err(Error::transient(
            "embedding",
            format!(
                "response carried {} vectors for {} inputs",
                vectors.len(),
                expected_count
            ),
        ));
    }
    for vector in &vectors {
        if vector.len() != dims {
            return Err(Error::Configuration(format!(
                "embedding dimension mismatch: expected {}, got {}",
                dims,
                vector.len()
            )));
        }
    }
    Ok(vectors)
}
