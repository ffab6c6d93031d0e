use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EncryptionConfig {
    /// File holding the raw 32-byte key, created by `vrag setup-key`.
    #[serde(default = "default_key_file")]
    pub key_file: PathBuf,
    /// Name of an environment variable holding the key as base64.
    /// Takes precedence over `key_file` when set.
    #[serde(default)]
    pub key_env: Option<String>,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            key_file: default_key_file(),
            key_env: None,
        }
    }
}

fn default_key_file() -> PathBuf {
    PathBuf::from("config/vault.key")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embed_provider")]
    pub provider: String,
    #[serde(default = "default_embed_model")]
    pub model: String,
    #[serde(default = "default_embed_dims")]
    pub dims: usize,
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embed_provider(),
            model: default_embed_model(),
            dims: default_embed_dims(),
            url: default_ollama_url(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embed_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embed_provider() -> String {
    "ollama".to_string()
}
fn default_embed_model() -> String {
    "all-minilm".to_string()
}
fn default_embed_dims() -> usize {
    384
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_embed_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_gen_provider")]
    pub provider: String,
    #[serde(default = "default_gen_model")]
    pub model: String,
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_gen_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_gen_provider(),
            model: default_gen_model(),
            url: default_ollama_url(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            timeout_secs: default_gen_timeout_secs(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_gen_provider() -> String {
    "ollama".to_string()
}
fn default_gen_model() -> String {
    "llama3.2:3b".to_string()
}
fn default_temperature() -> f64 {
    0.7
}
fn default_max_tokens() -> u32 {
    512
}
fn default_top_p() -> f64 {
    0.9
}
fn default_gen_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_backend")]
    pub backend: String,
    #[serde(default = "default_index_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_distance")]
    pub distance: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_index_backend(),
            url: default_index_url(),
            collection: default_collection(),
            distance: default_distance(),
        }
    }
}

fn default_index_backend() -> String {
    "qdrant".to_string()
}
fn default_index_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_collection() -> String {
    "encrypted_documents".to_string()
}
fn default_distance() -> String {
    "Cosine".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    #[serde(default = "default_max_context_length")]
    pub max_context_length: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            score_threshold: default_score_threshold(),
            max_context_length: default_max_context_length(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_score_threshold() -> f32 {
    0.5
}
fn default_max_context_length() -> usize {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuditConfig {
    #[serde(default = "default_audit_log")]
    pub log_file: PathBuf,
    /// When true, metadata keys matching `blocked_fields` are stripped
    /// before a record is hashed and written.
    #[serde(default = "default_exclude_sensitive")]
    pub exclude_sensitive: bool,
    #[serde(default = "default_blocked_fields")]
    pub blocked_fields: Vec<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_file: default_audit_log(),
            exclude_sensitive: default_exclude_sensitive(),
            blocked_fields: default_blocked_fields(),
        }
    }
}

fn default_audit_log() -> PathBuf {
    PathBuf::from("logs/audit.jsonl")
}
fn default_exclude_sensitive() -> bool {
    true
}
fn default_blocked_fields() -> Vec<String> {
    [
        "text", "plaintext", "content", "query", "question", "answer", "key", "token", "secret",
        "password",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }

    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "ollama" | "openai" | "hash" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, ollama, openai, or hash.",
            other
        ),
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims == 0 {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_empty() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    // Validate generation
    match config.generation.provider.as_str() {
        "disabled" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled or ollama.",
            other
        ),
    }

    // Validate index
    match config.index.backend.as_str() {
        "memory" | "qdrant" => {}
        other => anyhow::bail!("Unknown index backend: '{}'. Must be memory or qdrant.", other),
    }

    match config.index.distance.as_str() {
        "Cosine" | "Euclid" | "Dot" => {}
        other => anyhow::bail!(
            "Unknown index distance: '{}'. Must be Cosine, Euclid, or Dot.",
            other
        ),
    }

    if config.index.collection.is_empty() {
        anyhow::bail!("index.collection must not be empty");
    }

    // Validate query
    if config.query.top_k < 1 {
        anyhow::bail!("query.top_k must be >= 1");
    }

    if !(0.0..=1.0).contains(&config.query.score_threshold) {
        anyhow::bail!("query.score_threshold must be in [0.0, 1.0]");
    }

    if config.query.max_context_length == 0 {
        anyhow::bail!("query.max_context_length must be > 0");
    }

    // Validate encryption
    if let Some(var) = &config.encryption.key_env {
        if var.is_empty() {
            anyhow::bail!("encryption.key_env must name an environment variable");
        }
    }

    Ok(config)
}

/// Starter configuration written by `vrag init`.
const STARTER_CONFIG: &str = r#"# vault-rag configuration

[encryption]
# Raw 32-byte key file, created by `vrag setup-key`.
key_file = "config/vault.key"
# Or supply the key as base64 via an environment variable:
# key_env = "VRAG_KEY"

[chunking]
chunk_size = 500
chunk_overlap = 50

[embedding]
# disabled | ollama | openai | hash
provider = "ollama"
model = "all-minilm"
dims = 384
url = "http://localhost:11434"

[generation]
# disabled | ollama
provider = "ollama"
model = "llama3.2:3b"
url = "http://localhost:11434"
temperature = 0.7
max_tokens = 512
top_p = 0.9

[index]
# memory | qdrant
backend = "qdrant"
url = "http://localhost:6333"
collection = "encrypted_documents"
distance = "Cosine"

[query]
top_k = 3
score_threshold = 0.5
max_context_length = 2000

[audit]
log_file = "logs/audit.jsonl"
exclude_sensitive = true
"#;

/// Write a commented starter config at `path`.
///
/// Refuses to overwrite an existing file unless `force` is set.
pub fn write_starter_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Config already exists: {}. Use --force to overwrite.",
            path.display()
        );
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    std::fs::write(path, STARTER_CONFIG)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_str(content: &str) -> Result<Config> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vrag.toml");
        std::fs::write(&path, content).unwrap();
        load_config(&path)
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = load_str("").unwrap();
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.chunk_overlap, 50);
        assert_eq!(config.query.top_k, 3);
        assert_eq!(config.index.collection, "encrypted_documents");
        assert!(config.audit.exclude_sensitive);
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        let err = load_str("[chunking]\nchunk_size = 100\nchunk_overlap = 100\n").unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn rejects_unknown_providers_and_backends() {
        assert!(load_str("[embedding]\nprovider = \"sbert\"\n").is_err());
        assert!(load_str("[generation]\nprovider = \"gpt\"\n").is_err());
        assert!(load_str("[index]\nbackend = \"pinecone\"\n").is_err());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let err = load_str("[query]\nscore_threshold = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("score_threshold"));
    }

    #[test]
    fn starter_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vrag.toml");
        write_starter_config(&path, false).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.embedding.provider, "ollama");
        assert!(write_starter_config(&path, false).is_err());
        assert!(write_starter_config(&path, true).is_ok());
    }
}
