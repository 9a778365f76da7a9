//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and the HTTP-backed providers:
//! - **[`GeminiEmbedder`]** calls Google's `batchEmbedContents` endpoint
//!   (default model `models/embedding-001`).
//! - **[`OpenAIEmbedder`]** calls `POST /v1/embeddings`.
//! - **[`OllamaEmbedder`]** calls a local Ollama instance's `/api/embed`.
//!
//! All three retry transient failures through [`RetryingClient`].
//!
//! Also provides vector utilities:
//! - [`cosine_similarity`] computes similarity between two vectors
//! - [`vec_to_blob`] encodes a `Vec<f32>` as little-endian bytes for SQLite
//! - [`blob_to_vec`] decodes a SQLite BLOB back into a `Vec<f32>`

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::Config;
use crate::http::RetryingClient;

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const OPENAI_BASE: &str = "https://api.openai.com";
const OLLAMA_BASE: &str = "http://localhost:11434";

/// Turns text into vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier recorded in the index metadata.
    fn model_name(&self) -> &str;

    /// Embed a batch of documents. One vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single search query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }
}

// ============ Gemini ============

pub struct GeminiEmbedder {
    model: String,
    api_key: String,
    base_url: String,
    http: RetryingClient,
}

impl GeminiEmbedder {
    pub fn new(config: &Config) -> Result<Self> {
        let key_var = config
            .embedding_api_key_env()
            .unwrap_or_else(|| config.llm.api_key_env.clone());
        let api_key = std::env::var(&key_var)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", key_var))?;

        Ok(Self {
            model: normalize_gemini_model(&config.embedding.model),
            api_key,
            base_url: config
                .embedding
                .url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE.to_string()),
            http: RetryingClient::new(
                "Gemini",
                config.embedding.timeout_secs,
                config.embedding.max_retries,
            )?,
        })
    }

    async fn embed_with_task(&self, texts: &[String], task: &str) -> Result<Vec<Vec<f32>>> {
        let requests: Vec<serde_json::Value> = texts
            .iter()
            .map(|t| {
                serde_json::json!({
                    "model": self.model,
                    "content": { "parts": [{ "text": t }] },
                    "taskType": task,
                })
            })
            .collect();
        let body = serde_json::json!({ "requests": requests });
        let url = format!("{}/{}:batchEmbedContents", self.base_url, self.model);

        let json = self
            .http
            .post_json(&url, &[("x-goog-api-key", self.api_key.clone())], &body)
            .await?;
        let vectors = parse_gemini_response(&json)?;
        check_count(texts.len(), vectors.len())?;
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_with_task(texts, "RETRIEVAL_DOCUMENT").await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_with_task(&[text.to_string()], "RETRIEVAL_QUERY")
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }
}

/// Gemini model names are addressed as `models/<name>`.
pub(crate) fn normalize_gemini_model(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

fn parse_gemini_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let items = json
        .get("embeddings")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response: missing embeddings array"))?;

    items
        .iter()
        .map(|item| {
            item.get("values")
                .and_then(|v| v.as_array())
                .map(|values| to_f32(values))
                .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response: missing values"))
        })
        .collect()
}

// ============ OpenAI ============

pub struct OpenAIEmbedder {
    model: String,
    api_key: String,
    base_url: String,
    http: RetryingClient,
}

impl OpenAIEmbedder {
    pub fn new(config: &Config) -> Result<Self> {
        let key_var = config
            .embedding_api_key_env()
            .unwrap_or_else(|| "OPENAI_API_KEY".to_string());
        let api_key = std::env::var(&key_var)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", key_var))?;

        Ok(Self {
            model: config.embedding.model.clone(),
            api_key,
            base_url: config
                .embedding
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE.to_string()),
            http: RetryingClient::new(
                "OpenAI",
                config.embedding.timeout_secs,
                config.embedding.max_retries,
            )?,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let url = format!("{}/v1/embeddings", self.base_url);
        let json = self
            .http
            .post_json(
                &url,
                &[("Authorization", format!("Bearer {}", self.api_key))],
                &body,
            )
            .await?;
        let vectors = parse_openai_response(&json)?;
        check_count(texts.len(), vectors.len())?;
        Ok(vectors)
    }
}

/// Extracts `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(pos as u64);
        indexed.push((index, to_f32(embedding)));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

pub struct OllamaEmbedder {
    model: String,
    base_url: String,
    http: RetryingClient,
}

impl OllamaEmbedder {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            model: config.embedding.model.clone(),
            base_url: config
                .embedding
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_BASE.to_string()),
            http: RetryingClient::new(
                "Ollama",
                config.embedding.timeout_secs,
                config.embedding.max_retries,
            )?,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let url = format!("{}/api/embed", self.base_url);
        let json = self.http.post_json(&url, &[], &body).await?;
        let vectors = parse_ollama_response(&json)?;
        check_count(texts.len(), vectors.len())?;
        Ok(vectors)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|emb| {
            emb.as_array()
                .map(|values| to_f32(values))
                .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

// ============ Selection ============

/// Create the [`Embedder`] named by `[embedding].provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"gemini"` | [`GeminiEmbedder`] |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
pub fn create_embedder(config: &Config) -> Result<Box<dyn Embedder>> {
    match config.embedding.provider.as_str() {
        "gemini" => Ok(Box::new(GeminiEmbedder::new(config)?)),
        "openai" => Ok(Box::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Box::new(OllamaEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

fn to_f32(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

fn check_count(expected: usize, got: usize) -> Result<()> {
    if expected != got {
        bail!(
            "Embedding provider returned {} vectors for {} inputs",
            got,
            expected
        );
    }
    Ok(())
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity of two vectors, in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-length vector.
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
