//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]** — returns errors; used when embeddings are not configured.
//! - **[`OpenAIProvider`]** — calls the OpenAI embeddings API with retry and backoff.
//! - **[`OllamaProvider`]** — calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`HashProvider`]** — deterministic token-bucket vectors; no network, no model
//!   runtime. Meant for tests and offline runs, not semantic quality.
//!
//! Also hosts [`cosine_similarity`], shared with the in-memory index backend.
//!
//! # Retry Strategy
//!
//! The OpenAI and Ollama providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! The pipelines themselves never retry; this module is the only layer
//! that does.

use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};

/// Trait for embedding providers.
///
/// Carries provider metadata for reporting; the embedding computation
/// itself goes through [`embed_texts`] (a free function, dispatched on
/// the config's `provider` field).
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (e.g. `"all-minilm"`).
    fn model_name(&self) -> &str;
    /// Embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
}

/// Embed a batch of texts using the configured provider.
///
/// Inputs are processed in batches of `config.batch_size`; the output
/// has one vector per input text, in input order. Every vector is
/// checked against `config.dims` so a misconfigured model surfaces
/// here rather than as garbage search results later.
pub async fn embed_texts(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(config.batch_size.max(1)) {
        let vectors = match config.provider.as_str() {
            "openai" => embed_openai(config, batch).await?,
            "ollama" => embed_ollama(config, batch).await?,
            "hash" => embed_hash(config, batch),
            "disabled" => {
                return Err(RagError::Provider("embedding provider is disabled".into()))
            }
            other => {
                return Err(RagError::Provider(format!(
                    "unknown embedding provider: {}",
                    other
                )))
            }
        };
        out.extend(vectors);
    }

    if out.len() != texts.len() {
        return Err(RagError::Provider(format!(
            "embedding count mismatch: {} texts, {} vectors",
            texts.len(),
            out.len()
        )));
    }
    for vector in &out {
        if vector.len() != config.dims {
            return Err(RagError::Provider(format!(
                "model returned {} dims, embedding.dims is {}",
                vector.len(),
                config.dims
            )));
        }
    }
    Ok(out)
}

/// Embed a single query text.
pub async fn embed_query(config: &EmbeddingConfig, text: &str) -> Result<Vec<f32>> {
    let results = embed_texts(config, &[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| RagError::Provider("empty embedding response".into()))
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
pub struct DisabledProvider;

impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls `POST /v1/embeddings` with the configured model. Requires the
/// `OPENAI_API_KEY` environment variable.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(RagError::Config(
                "OPENAI_API_KEY environment variable not set".into(),
            ));
        }
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
        })
    }
}

impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

async fn embed_openai(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let api_key = std::env::var("OPENAI_API_KEY")
        .map_err(|_| RagError::Provider("OPENAI_API_KEY not set".into()))?;

    let client = http_client(config.timeout_secs)?;
    let body = serde_json::json!({
        "model": config.model,
        "input": texts,
    });

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::warn!(
                "OpenAI embedding attempt {}/{} failed, retrying in {:?}",
                attempt,
                config.max_retries,
                delay
            );
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
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
                        .map_err(|e| RagError::Provider(format!("OpenAI response: {}", e)))?;
                    return parse_openai_response(&json);
                }

                // Rate limited or server error, worth retrying
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(RagError::Provider(format!(
                        "OpenAI API error {}: {}",
                        status, body_text
                    )));
                    continue;
                }

                // Client error (not 429), don't retry
                let body_text = response.text().await.unwrap_or_default();
                return Err(RagError::Provider(format!(
                    "OpenAI API error {}: {}",
                    status, body_text
                )));
            }
            Err(e) => {
                last_err = Some(RagError::Provider(format!("OpenAI request failed: {}", e)));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| RagError::Provider("embedding failed after retries".into())))
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RagError::Provider("invalid OpenAI response: missing data array".into()))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                RagError::Provider("invalid OpenAI response: missing embedding".into())
            })?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }
    Ok(embeddings)
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL. Requires Ollama to be
/// running with an embedding model pulled (e.g. `ollama pull all-minilm`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
        })
    }
}

impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

async fn embed_ollama(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let client = http_client(config.timeout_secs)?;
    let body = serde_json::json!({
        "model": config.model,
        "input": texts,
    });

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::warn!(
                "Ollama embedding attempt {}/{} failed, retrying in {:?}",
                attempt,
                config.max_retries,
                delay
            );
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post(format!("{}/api/embed", config.url))
            .header("Content-Type", "application/json")
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
                        .map_err(|e| RagError::Provider(format!("Ollama response: {}", e)))?;
                    return parse_ollama_response(&json);
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(RagError::Provider(format!(
                        "Ollama API error {}: {}",
                        status, body_text
                    )));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                return Err(RagError::Provider(format!(
                    "Ollama API error {}: {}",
                    status, body_text
                )));
            }
            Err(e) => {
                last_err = Some(RagError::Provider(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    config.url, e
                )));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| RagError::Provider("embedding failed after retries".into())))
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            RagError::Provider("invalid Ollama response: missing embeddings array".into())
        })?;

    let mut result = Vec::with_capacity(embeddings.len());
    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| {
                RagError::Provider("invalid Ollama response: embedding is not an array".into())
            })?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }
    Ok(result)
}

// ============ Hash Provider ============

/// Deterministic token-bucket embedding.
///
/// Each whitespace token is lowercased, hashed with a fixed seed, and
/// counted into one of `dims` buckets; the result is L2-normalized.
/// Identical texts always produce identical vectors, across runs and
/// processes, which is what the test suite and offline smoke runs need.
pub struct HashProvider {
    dims: usize,
}

/// Fixed seed so hash vectors are stable across processes.
const HASH_SEED: u64 = 1337;

impl HashProvider {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self { dims: config.dims }
    }
}

impl EmbeddingProvider for HashProvider {
    fn model_name(&self) -> &str {
        "hash"
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

fn embed_hash(config: &EmbeddingConfig, texts: &[String]) -> Vec<Vec<f32>> {
    texts
        .iter()
        .map(|t| hash_embed(t, config.dims.max(1)))
        .collect()
}

fn hash_embed(text: &str, dims: usize) -> Vec<f32> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut vector = vec![0f32; dims];
    for token in text.split_whitespace() {
        let mut hasher = DefaultHasher::new();
        hasher.write_u64(HASH_SEED);
        token.to_lowercase().hash(&mut hasher);
        let bucket = (hasher.finish() as usize) % dims;
        vector[bucket] += 1.0;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
    vector
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"hash"` | [`HashProvider`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Box::new(OllamaProvider::new(config)?)),
        "hash" => Ok(Box::new(HashProvider::new(config))),
        other => Err(RagError::Provider(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| RagError::Provider(format!("http client: {}", e)))
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors or
/// vectors of different lengths.
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

    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_config(dims: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "hash".to_string(),
            dims,
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn test_hash_embedding_is_deterministic() {
        let a = hash_embed("the quick brown fox", 64);
        let b = hash_embed("the quick brown fox", 64);
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_embedding_dims_and_norm() {
        let v = hash_embed("some words to bucket", 32);
        assert_eq!(v.len(), 32);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_embedding_case_insensitive_tokens() {
        assert_eq!(hash_embed("Hello World", 64), hash_embed("hello world", 64));
    }

    #[test]
    fn test_hash_embedding_separates_texts() {
        let a = hash_embed("database replication strategies", 128);
        let b = hash_embed("gardening in early spring", 128);
        assert!(cosine_similarity(&a, &a) > 0.999);
        assert!(cosine_similarity(&a, &b) < 0.9);
    }

    #[test]
    fn test_cosine_similarity_edges() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_create_provider() {
        let provider = create_provider(&hash_config(384)).unwrap();
        assert_eq!(provider.model_name(), "hash");
        assert_eq!(provider.dims(), 384);

        let disabled = create_provider(&EmbeddingConfig {
            provider: "disabled".to_string(),
            ..EmbeddingConfig::default()
        })
        .unwrap();
        assert_eq!(disabled.model_name(), "disabled");

        assert!(create_provider(&EmbeddingConfig {
            provider: "sbert".to_string(),
            ..EmbeddingConfig::default()
        })
        .is_err());
    }

    #[tokio::test]
    async fn test_embed_texts_hash_provider() {
        let config = hash_config(48);
        let texts: Vec<String> = (0..130).map(|i| format!("text number {}", i)).collect();
        let vectors = embed_texts(&config, &texts).await.unwrap();
        assert_eq!(vectors.len(), 130);
        for v in &vectors {
            assert_eq!(v.len(), 48);
        }
    }

    #[tokio::test]
    async fn test_embed_texts_disabled_errors() {
        let config = EmbeddingConfig {
            provider: "disabled".to_string(),
            ..EmbeddingConfig::default()
        };
        let err = embed_texts(&config, &["x".to_string()]).await.unwrap_err();
        assert_eq!(err.category(), "provider");
    }

    #[tokio::test]
    async fn test_embed_query_matches_batch() {
        let config = hash_config(64);
        let single = embed_query(&config, "alpha beta").await.unwrap();
        let batch = embed_texts(&config, &["alpha beta".to_string()])
            .await
            .unwrap();
        assert_eq!(single, batch[0]);
    }
}
