//! Query pipeline: retrieval, decryption, and answer generation.
//!
//! A question is embedded, searched against the index, and each hit's
//! ciphertext token is decrypted in memory. Hits that fail
//! authentication are dropped individually (with a ledger event), never
//! failing the whole query. The decrypted chunks are assembled into a
//! bounded context and handed to the generator.
//!
//! The question text itself never reaches the ledger, any log line, or
//! any error message; queries are correlated by an opaque UUID only.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use uuid::Uuid;

use crate::audit::AuditLedger;
use crate::config::Config;
use crate::crypto::{self, EncryptionEngine};
use crate::embedding;
use crate::error::Result;
use crate::generation::{create_generator, LlmGenerator};
use crate::index::{open_index, VectorIndex};
use crate::ingest::encryption_meta;
use crate::models::{ContextChunk, QueryResult};

/// Fixed answer when retrieval produces nothing usable.
const NO_HITS_ANSWER: &str = "I couldn't find relevant information to answer your question.";

/// A partial chunk is only worth including when this much budget is left.
const PARTIAL_MIN_REMAINING: usize = 100;

pub struct QueryPipeline {
    config: Config,
    engine: EncryptionEngine,
    index: Arc<dyn VectorIndex>,
    ledger: Arc<AuditLedger>,
    generator: Box<dyn LlmGenerator>,
}

impl QueryPipeline {
    /// Build a pipeline over shared index and ledger handles.
    pub fn new(
        config: &Config,
        index: Arc<dyn VectorIndex>,
        ledger: Arc<AuditLedger>,
    ) -> Result<Self> {
        let key = crypto::load_key(&config.encryption)?;
        Ok(Self {
            engine: EncryptionEngine::new(&key)?,
            generator: create_generator(&config.generation)?,
            index,
            ledger,
            config: config.clone(),
        })
    }

    /// Build a pipeline that owns its index and ledger, straight from
    /// configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let index: Arc<dyn VectorIndex> = open_index(&config.index)?.into();
        let ledger = Arc::new(AuditLedger::open(&config.audit)?);
        Self::new(config, index, ledger)
    }

    pub fn ledger(&self) -> &AuditLedger {
        &self.ledger
    }

    pub fn generator(&self) -> &dyn LlmGenerator {
        self.generator.as_ref()
    }

    /// Answer one question.
    ///
    /// Retrieval, decryption, or generation failures are folded into a
    /// `success: false` result after being recorded in the ledger; only
    /// ledger write failures propagate as errors.
    pub async fn query(
        &self,
        question: &str,
        top_k: Option<usize>,
        return_context: bool,
    ) -> Result<QueryResult> {
        let query_id = Uuid::new_v4().to_string();
        let top_k = top_k.unwrap_or(self.config.query.top_k);
        let total_start = Instant::now();

        match self
            .run_query(&query_id, question, top_k, return_context)
            .await
        {
            Ok(result) => Ok(result),
            Err(err) => {
                self.ledger.append(
                    "query",
                    "query",
                    query_meta(&query_id, 0, 0.0, 0.0, false, Some(err.category())),
                    None,
                )?;
                Ok(QueryResult {
                    query_id,
                    answer: err.to_string(),
                    success: false,
                    retrieval_time: 0.0,
                    generation_time: 0.0,
                    total_time: total_start.elapsed().as_secs_f64(),
                    num_chunks_retrieved: 0,
                    context: None,
                })
            }
        }
    }

    async fn run_query(
        &self,
        query_id: &str,
        question: &str,
        top_k: usize,
        return_context: bool,
    ) -> Result<QueryResult> {
        let total_start = Instant::now();

        // Phase 1: retrieval
        let retrieval_start = Instant::now();
        let query_vector = embedding::embed_query(&self.config.embedding, question).await?;
        let hits = self
            .index
            .search(
                &query_vector,
                top_k,
                Some(self.config.query.score_threshold),
            )
            .await?;
        tracing::debug!("query {query_id}: {} hits above threshold", hits.len());

        let mut decrypted: Vec<ContextChunk> = Vec::with_capacity(hits.len());
        for hit in &hits {
            match self.engine.decrypt(&hit.encrypted_text) {
                Ok(text) => decrypted.push(ContextChunk {
                    score: hit.score,
                    text,
                    source: hit
                        .metadata
                        .get("source")
                        .cloned()
                        .unwrap_or_else(|| "unknown".to_string()),
                }),
                Err(err) => {
                    // Drop the hit; an unreadable point must not kill
                    // the query or surface ciphertext to the caller.
                    self.ledger.append(
                        "system",
                        "decryption_error",
                        decryption_error_meta(&hit.id, err.category()),
                        None,
                    )?;
                }
            }
        }
        let retrieval_time = retrieval_start.elapsed().as_secs_f64();

        self.ledger.append(
            "encryption",
            "encryption",
            encryption_meta("decrypt", decrypted.len(), true),
            None,
        )?;

        // Phase 2: generation
        let generation_start = Instant::now();
        let (answer, generation_time) = if decrypted.is_empty() {
            (NO_HITS_ANSWER.to_string(), 0.0)
        } else {
            let context = build_context(&decrypted, self.config.query.max_context_length);
            let prompt = build_prompt(&context, question);
            let answer = self.generator.generate(&prompt).await?;
            (answer, generation_start.elapsed().as_secs_f64())
        };

        self.ledger.append(
            "query",
            "query",
            query_meta(
                query_id,
                hits.len(),
                retrieval_time,
                generation_time,
                true,
                None,
            ),
            None,
        )?;

        Ok(QueryResult {
            query_id: query_id.to_string(),
            answer,
            success: true,
            retrieval_time,
            generation_time,
            total_time: total_start.elapsed().as_secs_f64(),
            num_chunks_retrieved: hits.len(),
            context: if return_context { Some(decrypted) } else { None },
        })
    }
}

/// Assemble the numbered context block, bounded by `max_context_length`
/// characters of chunk text. Chunks keep their retrieval order; a chunk
/// that would overflow is truncated with an ellipsis only when more
/// than [`PARTIAL_MIN_REMAINING`] characters of budget remain, and
/// nothing after it is included either way.
fn build_context(chunks: &[ContextChunk], max_context_length: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut total_length = 0usize;

    for (i, chunk) in chunks.iter().enumerate() {
        let text_len = chunk.text.chars().count();
        if total_length + text_len > max_context_length {
            let remaining = max_context_length - total_length;
            if remaining > PARTIAL_MIN_REMAINING {
                let truncated: String = chunk.text.chars().take(remaining).collect();
                parts.push(format!("[{}] {}...", i + 1, truncated));
            }
            break;
        }
        parts.push(format!("[{}] {}", i + 1, chunk.text));
        total_length += text_len;
    }

    parts.join("\n\n")
}

fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "Based on the following context, please answer the question.\n\n\
         Context:\n{}\n\nQuestion: {}\n\nAnswer:",
        context, question
    )
}

fn query_meta(
    query_id: &str,
    num_results: usize,
    retrieval_time: f64,
    generation_time: f64,
    success: bool,
    error: Option<&str>,
) -> BTreeMap<String, serde_json::Value> {
    let mut meta = BTreeMap::new();
    meta.insert("query_id".to_string(), json!(query_id));
    meta.insert("num_results".to_string(), json!(num_results));
    meta.insert("retrieval_time".to_string(), json!(retrieval_time));
    meta.insert("generation_time".to_string(), json!(generation_time));
    meta.insert("success".to_string(), json!(success));
    if let Some(error) = error {
        meta.insert("error".to_string(), json!(error));
    }
    meta
}

fn decryption_error_meta(point_id: &str, category: &str) -> BTreeMap<String, serde_json::Value> {
    let mut meta = BTreeMap::new();
    meta.insert("point_id".to_string(), json!(point_id));
    meta.insert("error".to_string(), json!(category));
    meta
}

/// CLI entry for `vrag query`.
pub async fn run_query(
    config: &Config,
    question: Option<String>,
    top_k: Option<usize>,
    show_context: bool,
) -> anyhow::Result<()> {
    let pipeline = QueryPipeline::from_config(config)?;

    match question {
        Some(q) => ask(&pipeline, &q, top_k, show_context).await,
        None => {
            println!("Interactive query mode (Ctrl+C to exit)");
            loop {
                print!("\nQuestion: ");
                std::io::stdout().flush()?;
                let mut line = String::new();
                if std::io::stdin().read_line(&mut line)? == 0 {
                    break;
                }
                let q = line.trim();
                if q.is_empty() {
                    break;
                }
                if let Err(err) = ask(&pipeline, q, top_k, show_context).await {
                    eprintln!("{}", err);
                }
            }
            Ok(())
        }
    }
}

async fn ask(
    pipeline: &QueryPipeline,
    question: &str,
    top_k: Option<usize>,
    show_context: bool,
) -> anyhow::Result<()> {
    println!("Processing...");
    let result = pipeline.query(question, top_k, show_context).await?;

    if !result.success {
        println!("Error: {}", result.answer);
        anyhow::bail!("query failed");
    }

    println!("\nAnswer: {}", result.answer);
    println!("\nMetrics:");
    println!("  Response time: {:.2}s", result.total_time);
    println!("  Generation time: {:.2}s", result.generation_time);
    println!("  Chunks retrieved: {}", result.num_chunks_retrieved);

    if show_context {
        if let Some(context) = &result.context {
            println!("\nRetrieved Context:");
            for (idx, chunk) in context.iter().enumerate() {
                println!("\n[{}] (Score: {:.4})", idx + 1, chunk.score);
                let preview: String = chunk.text.chars().take(200).collect();
                if chunk.text.chars().count() > 200 {
                    println!("{}...", preview);
                } else {
                    println!("{}", preview);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AuditConfig, ChunkingConfig, Config, EmbeddingConfig, EncryptionConfig, GenerationConfig,
        IndexConfig, QueryConfig,
    };
    use crate::ingest::IngestionPipeline;

    fn chunk(text: &str) -> ContextChunk {
        ContextChunk {
            score: 0.9,
            text: text.to_string(),
            source: "test.txt".to_string(),
        }
    }

    #[test]
    fn test_build_context_numbers_chunks() {
        let chunks = vec![chunk("first part"), chunk("second part")];
        let context = build_context(&chunks, 2000);
        assert_eq!(context, "[1] first part\n\n[2] second part");
    }

    #[test]
    fn test_build_context_truncates_with_ellipsis() {
        let chunks = vec![chunk(&"a".repeat(300)), chunk(&"b".repeat(300))];
        let context = build_context(&chunks, 450);
        let parts: Vec<&str> = context.split("\n\n").collect();
        assert_eq!(parts.len(), 2);
        // 150 characters of budget remain: the second chunk is cut.
        assert_eq!(parts[1], format!("[2] {}...", "b".repeat(150)));
    }

    #[test]
    fn test_build_context_skips_tiny_remainder() {
        let chunks = vec![chunk(&"a".repeat(300)), chunk(&"b".repeat(300))];
        // Only 50 characters of budget remain, below the minimum.
        let context = build_context(&chunks, 350);
        assert_eq!(context, format!("[1] {}", "a".repeat(300)));
    }

    #[test]
    fn test_build_context_stops_after_first_overflow() {
        let chunks = vec![
            chunk(&"a".repeat(100)),
            chunk(&"b".repeat(500)),
            chunk("short tail"),
        ];
        // The second chunk overflows; the third is never considered.
        let context = build_context(&chunks, 400);
        assert!(context.contains("[2] "));
        assert!(!context.contains("short tail"));
    }

    #[test]
    fn test_build_prompt_shape() {
        let prompt = build_prompt("[1] fact", "what is the fact?");
        assert!(prompt.starts_with("Based on the following context"));
        assert!(prompt.contains("Context:\n[1] fact"));
        assert!(prompt.contains("Question: what is the fact?"));
        assert!(prompt.ends_with("Answer:"));
    }

    struct CannedGenerator;

    #[async_trait::async_trait]
    impl LlmGenerator for CannedGenerator {
        fn model_name(&self) -> &str {
            "canned"
        }

        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok("canned answer".to_string())
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    fn test_config(dir: &std::path::Path, key_file: &std::path::Path) -> Config {
        Config {
            encryption: EncryptionConfig {
                key_file: key_file.to_path_buf(),
                key_env: None,
            },
            chunking: ChunkingConfig {
                chunk_size: 200,
                chunk_overlap: 20,
            },
            embedding: EmbeddingConfig {
                provider: "hash".to_string(),
                dims: 64,
                ..EmbeddingConfig::default()
            },
            generation: GenerationConfig {
                provider: "disabled".to_string(),
                ..GenerationConfig::default()
            },
            index: IndexConfig {
                backend: "memory".to_string(),
                ..IndexConfig::default()
            },
            query: QueryConfig {
                score_threshold: 0.0,
                ..QueryConfig::default()
            },
            audit: AuditConfig {
                log_file: dir.join("audit.jsonl"),
                ..AuditConfig::default()
            },
        }
    }

    fn write_key(path: &std::path::Path) {
        let key = crypto::generate_key();
        crypto::write_key_file(path, &key, false).unwrap();
    }

    /// Index and ledger handles shared between an ingestion and a query
    /// pipeline, the way a single process wires them.
    fn shared_handles(config: &Config) -> (Arc<dyn VectorIndex>, Arc<AuditLedger>) {
        let index: Arc<dyn VectorIndex> = open_index(&config.index).unwrap().into();
        let ledger = Arc::new(AuditLedger::open(&config.audit).unwrap());
        (index, ledger)
    }

    #[tokio::test]
    async fn test_query_empty_index_returns_fixed_answer() {
        let dir = tempfile::tempdir().unwrap();
        let key_file = dir.path().join("vault.key");
        write_key(&key_file);
        let config = test_config(dir.path(), &key_file);

        let pipeline = QueryPipeline::from_config(&config).unwrap();
        let result = pipeline.query("anything at all", None, false).await.unwrap();

        assert!(result.success);
        assert_eq!(result.answer, NO_HITS_ANSWER);
        assert_eq!(result.num_chunks_retrieved, 0);
        assert_eq!(result.generation_time, 0.0);
        assert!(result.context.is_none());
        assert!(!result.query_id.is_empty());

        let stats = pipeline.ledger().statistics().unwrap();
        assert_eq!(stats.by_type.get("query"), Some(&1));
    }

    #[tokio::test]
    async fn test_query_round_trip_decrypts_context() {
        let dir = tempfile::tempdir().unwrap();
        let key_file = dir.path().join("vault.key");
        write_key(&key_file);
        let config = test_config(dir.path(), &key_file);
        let (index, ledger) = shared_handles(&config);

        let doc = dir.path().join("notes.txt");
        std::fs::write(&doc, "The deployment freeze starts on Friday afternoon.").unwrap();
        let ingest = IngestionPipeline::new(&config, index.clone(), ledger.clone()).unwrap();
        ingest.ingest_file(&doc).await.unwrap();

        let mut pipeline = QueryPipeline::new(&config, index, ledger).unwrap();
        pipeline.generator = Box::new(CannedGenerator);

        let result = pipeline
            .query("when does the deployment freeze start", None, true)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.answer, "canned answer");
        assert!(result.num_chunks_retrieved >= 1);
        let context = result.context.unwrap();
        assert!(context[0].text.contains("deployment freeze"));
        assert_eq!(context[0].source, "notes.txt");

        let stats = pipeline.ledger().statistics().unwrap();
        assert_eq!(stats.by_type.get("query"), Some(&1));
        // One encrypt event from ingestion, one decrypt event from the query.
        assert_eq!(stats.by_type.get("encryption"), Some(&2));
    }

    #[tokio::test]
    async fn test_query_generation_failure_returns_failed_result() {
        let dir = tempfile::tempdir().unwrap();
        let key_file = dir.path().join("vault.key");
        write_key(&key_file);
        let config = test_config(dir.path(), &key_file);
        let (index, ledger) = shared_handles(&config);

        let doc = dir.path().join("notes.txt");
        std::fs::write(&doc, "The deployment freeze starts on Friday afternoon.").unwrap();
        let ingest = IngestionPipeline::new(&config, index.clone(), ledger.clone()).unwrap();
        ingest.ingest_file(&doc).await.unwrap();

        // Generation stays disabled: hits are found but the answer step fails.
        let pipeline = QueryPipeline::new(&config, index, ledger).unwrap();
        let result = pipeline
            .query("when does the deployment freeze start", None, false)
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.answer.contains("disabled"));
        assert_eq!(result.num_chunks_retrieved, 0);
        assert!(result.context.is_none());

        let records = std::fs::read_to_string(dir.path().join("audit.jsonl")).unwrap();
        assert!(records.contains("\"success\":false"));
        assert!(records.contains("\"error\":\"provider\""));
    }

    #[tokio::test]
    async fn test_query_wrong_key_drops_every_hit() {
        let dir = tempfile::tempdir().unwrap();
        let key_file = dir.path().join("vault.key");
        write_key(&key_file);
        let config = test_config(dir.path(), &key_file);
        let (index, ledger) = shared_handles(&config);

        let doc = dir.path().join("notes.txt");
        std::fs::write(&doc, "The deployment freeze starts on Friday afternoon.").unwrap();
        let ingest = IngestionPipeline::new(&config, index.clone(), ledger.clone()).unwrap();
        ingest.ingest_file(&doc).await.unwrap();

        // A pipeline holding a different key cannot authenticate the tokens.
        let other_key = dir.path().join("other.key");
        write_key(&other_key);
        let mut wrong_config = config.clone();
        wrong_config.encryption.key_file = other_key;

        let pipeline = QueryPipeline::new(&wrong_config, index, ledger).unwrap();
        let result = pipeline
            .query("when does the deployment freeze start", None, true)
            .await
            .unwrap();

        // Hits were found but none could be read, so the query degrades
        // to the no-information answer instead of erroring.
        assert!(result.success);
        assert_eq!(result.answer, NO_HITS_ANSWER);
        assert!(result.num_chunks_retrieved >= 1);
        assert!(result.context.unwrap().is_empty());

        let stats = pipeline.ledger().statistics().unwrap();
        assert!(stats.by_type.get("decryption_error").copied().unwrap_or(0) >= 1);
    }
}
