//! Vector index abstraction for encrypted chunk storage.
//!
//! The [`VectorIndex`] trait defines every index operation the ingestion
//! and query pipelines need, enabling pluggable backends (Qdrant over
//! REST, in-memory for tests and offline runs).
//!
//! Backends store only what they are given: embedding vectors, opaque
//! ciphertext tokens, and non-sensitive metadata. No backend ever sees
//! plaintext chunk text or key material.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod qdrant;

use async_trait::async_trait;

use crate::config::IndexConfig;
use crate::error::{RagError, Result};
use crate::models::{CollectionInfo, QueryHit, VectorRecord};

/// Abstract vector index backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ensure_collection`](VectorIndex::ensure_collection) | Create the collection if it does not exist |
/// | [`upsert`](VectorIndex::upsert) | Write records; same id replaces |
/// | [`search`](VectorIndex::search) | Similarity search, scores descending |
/// | [`info`](VectorIndex::info) | Collection status and point counts |
/// | [`delete`](VectorIndex::delete) | Remove records by id |
/// | [`drop_collection`](VectorIndex::drop_collection) | Remove the whole collection |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection if it does not already exist.
    ///
    /// Idempotent; an existing collection is left untouched.
    async fn ensure_collection(&self, dims: usize, distance: &str) -> Result<()>;

    /// Write records to the collection. A record whose id already exists
    /// replaces the stored point. Returns the ids written, in input order.
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<Vec<String>>;

    /// Similarity search. Returns up to `top_k` hits with score at or
    /// above `score_threshold` (when given), in descending score order.
    ///
    /// A collection that has never been created yields no hits rather
    /// than an error, so querying before the first ingest is well-formed.
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<QueryHit>>;

    /// Collection status and point counts. A missing collection reports
    /// status `"missing"` with zero counts.
    async fn info(&self) -> Result<CollectionInfo>;

    /// Remove records by id. Unknown ids are ignored.
    async fn delete(&self, ids: &[String]) -> Result<()>;

    /// Remove the collection and everything in it.
    async fn drop_collection(&self) -> Result<()>;
}

impl std::fmt::Debug for dyn VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VectorIndex")
    }
}

/// Open the configured index backend.
///
/// | Config Value | Backend |
/// |-------------|---------|
/// | `"qdrant"` | [`qdrant::QdrantIndex`] |
/// | `"memory"` | [`memory::MemoryIndex`] |
pub fn open_index(config: &IndexConfig) -> Result<Box<dyn VectorIndex>> {
    match config.backend.as_str() {
        "qdrant" => Ok(Box::new(qdrant::QdrantIndex::new(config)?)),
        "memory" => Ok(Box::new(memory::MemoryIndex::new(&config.collection))),
        other => Err(RagError::Storage(format!(
            "unknown index backend: {}",
            other
        ))),
    }
}
