//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and the HTTP-backed providers:
//! - **[`OpenAiCompatibleEmbedder`]**: `POST /v1/embeddings` in the OpenAI
//!   wire format, used for both Mistral (`mistral-embed`) and OpenAI.
//! - **[`OllamaEmbedder`]**: a local Ollama instance's `/api/embed` endpoint.
//!
//! Use [`create_embedder`] to build the provider selected in configuration.
//!
//! Calls are single-shot: each request is bounded by the configured timeout
//! and a failure is returned to the caller without retrying.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{Config, EmbeddingProviderKind, Secrets};

/// A text embedding backend.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"mistral-embed"`).
    fn model_name(&self) -> &str;
    /// Vector dimensionality expected by the index.
    fn dims(&self) -> usize;
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    embedder
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Empty embedding response"))
}

// ============ OpenAI-compatible (Mistral, OpenAI) ============

/// Embedding provider speaking the OpenAI `/v1/embeddings` format.
pub struct OpenAiCompatibleEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl OpenAiCompatibleEmbedder {
    pub fn new(
        base_url: &str,
        api_key: String,
        model: String,
        dims: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build embedding HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/embeddings", base_url.trim_end_matches('/')),
            api_key,
            model,
            dims,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiCompatibleEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(model = %self.model, count = texts.len(), "requesting embeddings");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "input": texts,
            }))
            .send()
            .await
            .with_context(|| format!("embedding request to {} failed", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Embedding API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        let vectors = parse_openai_response(&json)?;
        check_shape(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index` when present.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid embedding response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| anyhow!("Invalid embedding response: missing embedding"))?;
        indexed.push((index, json_to_vec(embedding)?));
    }
    indexed.sort_by_key(|(i, _)| *i);

    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Embedding provider using a local Ollama instance.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn new(url: &str, model: String, dims: usize, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build embedding HTTP client")?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            model,
            dims,
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

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&serde_json::json!({
                "model": self.model,
                "input": texts,
            }))
            .send()
            .await
            .with_context(|| format!("Ollama connection error (is Ollama running at {}?)", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        let embeddings = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?;
        let vectors = embeddings
            .iter()
            .map(json_to_vec)
            .collect::<Result<Vec<_>>>()?;
        check_shape(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
    }
}

fn json_to_vec(value: &serde_json::Value) -> Result<Vec<f32>> {
    Ok(value
        .as_array()
        .ok_or_else(|| anyhow!("Invalid embedding response: embedding is not an array"))?
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

fn check_shape(vectors: &[Vec<f32>], expected: usize, dims: usize) -> Result<()> {
    if vectors.len() != expected {
        bail!("Embedding count mismatch: sent {}, received {}", expected, vectors.len());
    }
    if let Some(v) = vectors.iter().find(|v| v.len() != dims) {
        bail!(
            "Embedding dimension mismatch: configured {}, received {}",
            dims,
            v.len()
        );
    }
    Ok(())
}

/// Build the embedder selected by `[embedding].provider`.
///
/// The Mistral provider reuses the LLM base URL and API key; OpenAI needs
/// `OPENAI_API_KEY`.
pub fn create_embedder(config: &Config, secrets: &Secrets) -> Result<Arc<dyn Embedder>> {
    let e = &config.embedding;
    let timeout = Duration::from_secs(e.timeout_secs);

    let embedder: Arc<dyn Embedder> = match e.provider {
        EmbeddingProviderKind::Mistral => Arc::new(OpenAiCompatibleEmbedder::new(
            &config.llm.base_url,
            secrets.llm_api_key.clone(),
            e.model.clone(),
            e.dims,
            timeout,
        )?),
        EmbeddingProviderKind::OpenAi => {
            let key = secrets
                .openai_api_key
                .clone()
                .ok_or_else(|| anyhow!("OPENAI_API_KEY environment variable not set"))?;
            Arc::new(OpenAiCompatibleEmbedder::new(
                "https://api.openai.com",
                key,
                e.model.clone(),
                e.dims,
                timeout,
            )?)
        }
        EmbeddingProviderKind::Ollama => Arc::new(OllamaEmbedder::new(
            e.url.as_deref().unwrap_or("http://localhost:11434"),
            e.model.clone(),
            e.dims,
            timeout,
        )?),
    };
    Ok(embedder)
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors or vectors
/// of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
