//! Document ingestion pipeline.
//!
//! Coordinates the full ingest flow: parse → chunk → embed → encrypt →
//! store. Plaintext chunk text exists only inside one ingestion call;
//! every chunk is sealed to a ciphertext token before anything reaches
//! the vector index. A failed step deletes the document's already
//! assigned points (best effort) and records a failed ingestion event
//! with the stage that broke, so a document is either fully present or
//! absent.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::audit::AuditLedger;
use crate::chunker::TextChunker;
use crate::config::Config;
use crate::crypto::{self, EncryptionEngine};
use crate::embedding;
use crate::error::{RagError, Result};
use crate::index::{open_index, VectorIndex};
use crate::models::{IngestOutcome, IngestReport, VectorRecord};
use crate::parser;

pub struct IngestionPipeline {
    config: Config,
    chunker: TextChunker,
    engine: EncryptionEngine,
    index: Arc<dyn VectorIndex>,
    ledger: Arc<AuditLedger>,
}

impl IngestionPipeline {
    /// Build a pipeline over shared index and ledger handles.
    ///
    /// Fails fast on key loading and chunker configuration; no network
    /// traffic happens here.
    pub fn new(
        config: &Config,
        index: Arc<dyn VectorIndex>,
        ledger: Arc<AuditLedger>,
    ) -> Result<Self> {
        let key = crypto::load_key(&config.encryption)?;
        Ok(Self {
            chunker: TextChunker::new(config.chunking.chunk_size, config.chunking.chunk_overlap)?,
            engine: EncryptionEngine::new(&key)?,
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

    pub fn index(&self) -> &dyn VectorIndex {
        self.index.as_ref()
    }

    pub fn ledger(&self) -> &AuditLedger {
        &self.ledger
    }

    /// Ingest one document. Returns the number of chunks stored.
    ///
    /// The ledger records the outcome either way; on failure the error
    /// also propagates to the caller after rollback.
    pub async fn ingest_file(&self, path: &Path) -> Result<usize> {
        let file_name = file_name_of(path);
        let mut stage = "parse";
        let mut point_ids: Vec<String> = Vec::new();

        match self
            .run_file(path, &file_name, &mut stage, &mut point_ids)
            .await
        {
            Ok(num_chunks) => {
                self.ledger.append(
                    "ingestion",
                    "document_ingestion",
                    ingest_meta(&file_name, num_chunks, true, None, None),
                    None,
                )?;
                Ok(num_chunks)
            }
            Err(err) => {
                if !point_ids.is_empty() {
                    if let Err(delete_err) = self.index.delete(&point_ids).await {
                        tracing::warn!("rollback delete failed for {file_name}: {delete_err}");
                    }
                }
                self.ledger.append(
                    "ingestion",
                    "document_ingestion",
                    ingest_meta(&file_name, 0, false, Some(err.category()), Some(stage)),
                    None,
                )?;
                Err(err)
            }
        }
    }

    async fn run_file(
        &self,
        path: &Path,
        file_name: &str,
        stage: &mut &'static str,
        point_ids: &mut Vec<String>,
    ) -> Result<usize> {
        *stage = "parse";
        let text = parser::parse_file(path)?;

        *stage = "chunk";
        let mut metadata = BTreeMap::new();
        metadata.insert("source".to_string(), file_name.to_string());
        metadata.insert("file_path".to_string(), path.display().to_string());
        let chunks = self.chunker.chunk(&text, &metadata);
        if chunks.is_empty() {
            return Err(RagError::Parse(format!(
                "no chunks produced from {}",
                file_name
            )));
        }
        tracing::debug!("{file_name}: split into {} chunks", chunks.len());

        *stage = "embed";
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embedding::embed_texts(&self.config.embedding, &texts).await?;

        *stage = "encrypt";
        let mut tokens = Vec::with_capacity(texts.len());
        for text in &texts {
            tokens.push(self.engine.encrypt(text)?);
        }
        self.ledger.append(
            "encryption",
            "encryption",
            encryption_meta("encrypt", tokens.len(), true),
            None,
        )?;

        *stage = "store";
        self.index
            .ensure_collection(self.config.embedding.dims, &self.config.index.distance)
            .await?;

        let mut records = Vec::with_capacity(chunks.len());
        for ((chunk, vector), token) in chunks.iter().zip(vectors).zip(tokens) {
            let id = Uuid::new_v4().to_string();
            point_ids.push(id.clone());
            let mut point_meta = chunk.metadata.clone();
            point_meta.insert("chunk_index".to_string(), chunk.chunk_index.to_string());
            records.push(VectorRecord {
                id,
                vector,
                encrypted_text: token,
                metadata: point_meta,
            });
        }
        self.index.upsert(records).await?;

        Ok(chunks.len())
    }

    /// Ingest every regular file in a directory (non-recursive), in
    /// sorted filename order. Per-file failures land in the report;
    /// only directory enumeration itself errors out.
    pub async fn ingest_directory(&self, dir: &Path) -> Result<IngestReport> {
        let mut files: Vec<PathBuf> = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();

        let mut report = IngestReport::default();
        for path in files {
            let file_name = file_name_of(&path);
            let outcome = match self.ingest_file(&path).await {
                Ok(chunks) => IngestOutcome {
                    success: true,
                    chunks,
                    error: None,
                },
                Err(err) => IngestOutcome {
                    success: false,
                    chunks: 0,
                    error: Some(err.to_string()),
                },
            };
            report.results.insert(file_name, outcome);
        }
        Ok(report)
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn ingest_meta(
    file_name: &str,
    num_chunks: usize,
    success: bool,
    error: Option<&str>,
    stage: Option<&str>,
) -> BTreeMap<String, serde_json::Value> {
    let mut meta = BTreeMap::new();
    meta.insert("file_name".to_string(), json!(file_name));
    meta.insert("num_chunks".to_string(), json!(num_chunks));
    meta.insert("success".to_string(), json!(success));
    if let Some(error) = error {
        meta.insert("error".to_string(), json!(error));
    }
    if let Some(stage) = stage {
        meta.insert("stage".to_string(), json!(stage));
    }
    meta
}

pub(crate) fn encryption_meta(
    operation: &str,
    num_items: usize,
    success: bool,
) -> BTreeMap<String, serde_json::Value> {
    let mut meta = BTreeMap::new();
    meta.insert("operation".to_string(), json!(operation));
    meta.insert("num_items".to_string(), json!(num_items));
    meta.insert("success".to_string(), json!(success));
    meta
}

/// CLI entry for `vrag ingest`.
pub async fn run_ingest(config: &Config, path: &Path, verbose: bool) -> anyhow::Result<()> {
    let pipeline = IngestionPipeline::from_config(config)?;

    if path.is_dir() {
        println!("Ingesting documents from directory: {}", path.display());
        let report = pipeline.ingest_directory(path).await?;

        println!();
        println!(
            "Ingested {}/{} documents successfully",
            report.succeeded(),
            report.results.len()
        );
        if verbose {
            for (file_name, outcome) in &report.results {
                if outcome.success {
                    println!("  ✓ {} ({} chunks)", file_name, outcome.chunks);
                } else {
                    let detail = outcome.error.as_deref().unwrap_or("unknown error");
                    println!("  ✗ {} ({})", file_name, detail);
                }
            }
        }
    } else {
        println!("Ingesting document: {}", path.display());
        match pipeline.ingest_file(path).await {
            Ok(chunks) => println!("✓ Document ingested successfully ({} chunks)", chunks),
            Err(err) => {
                println!("✗ Document ingestion failed: {}", err);
                anyhow::bail!("ingestion failed");
            }
        }
    }

    let info = pipeline.index().info().await?;
    println!();
    println!("System statistics:");
    println!("  Vector count: {}", info.vector_count);

    Ok(())
}
