//! Core data models used throughout vault-rag.
//!
//! These types represent the chunks, encrypted records, and query results
//! that flow through the ingestion and retrieval pipelines. Plaintext
//! types ([`Chunk`], [`ContextChunk`]) are ephemeral and never persisted;
//! only [`VectorRecord`]s, carrying ciphertext tokens, reach storage.

use serde::Serialize;
use std::collections::BTreeMap;

/// A bounded span of a document's text, produced by the chunker.
///
/// Exists only within one ingestion call; the text is encrypted before
/// anything is written.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub text: String,
    /// Position of this chunk within its document, starting at 0.
    pub chunk_index: usize,
    /// Byte offset of the chunk's window start in the cleaned text.
    pub start: usize,
    /// Byte offset one past the chunk's window end in the cleaned text.
    pub end: usize,
    /// Caller-supplied metadata, merged in verbatim (source, file path).
    pub metadata: BTreeMap<String, String>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// A point written to the vector index: embedding plus encrypted payload.
///
/// The only persisted form of chunk content. `encrypted_text` is the
/// opaque base64 token produced by the encryption engine.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub encrypted_text: String,
    pub metadata: BTreeMap<String, String>,
}

/// A search hit returned from the vector index, still encrypted.
#[derive(Debug, Clone)]
pub struct QueryHit {
    pub id: String,
    pub score: f32,
    pub encrypted_text: String,
    pub metadata: BTreeMap<String, String>,
}

/// Collection state in one normalized shape, regardless of backend.
#[derive(Debug, Clone)]
pub struct CollectionInfo {
    pub name: String,
    pub point_count: u64,
    pub vector_count: u64,
    pub status: String,
}

/// A decrypted chunk included in a query's assembled context.
#[derive(Debug, Clone, Serialize)]
pub struct ContextChunk {
    pub score: f32,
    pub text: String,
    pub source: String,
}

/// Outcome of one question through the query pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    /// Opaque identifier for correlating with the audit log. Never
    /// derived from the question text.
    pub query_id: String,
    pub answer: String,
    pub success: bool,
    pub retrieval_time: f64,
    pub generation_time: f64,
    pub total_time: f64,
    pub num_chunks_retrieved: usize,
    /// Decrypted context, present only when explicitly requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<ContextChunk>>,
}

/// Per-file outcome of an ingestion batch.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub success: bool,
    pub chunks: usize,
    /// Error category and short message for a failed file; never the
    /// file's content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result map of an ingestion call, keyed by file name in sorted order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub results: BTreeMap<String, IngestOutcome>,
}

impl IngestReport {
    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}
