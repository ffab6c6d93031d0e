//! # Vault RAG
//!
//! Privacy-preserving retrieval-augmented generation over an encrypted
//! document corpus.
//!
//! Documents are parsed, chunked, and embedded locally; chunk text is
//! sealed with AES-256-GCM before it reaches the vector index, so the
//! index only ever stores ciphertext tokens next to the vectors.
//! Queries embed the question, search the index, decrypt the matching
//! chunks in memory, and feed a bounded context to a local LLM. Every
//! ingestion, encryption operation, and query lands in a hash-chained
//! audit ledger.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────────────────┐   ┌─────────────┐
//! │ Documents │──▶│ Parse ▸ Chunk ▸ Embed      │──▶│ Vector index │
//! │ txt/md/pdf│   │        ▸ Encrypt (AES-GCM) │   │ (ciphertext) │
//! └──────────┘   └───────────────────────────┘   └──────┬──────┘
//!                                                       │ search
//!                ┌───────────────────────────┐   ┌──────▼──────┐
//!                │ Decrypt ▸ Context ▸ LLM    │◀──│    Query     │
//!                └─────────────┬─────────────┘   └─────────────┘
//!                              ▼
//!                      ┌──────────────┐
//!                      │ Audit ledger  │ (hash-chained JSONL)
//!                      └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! vrag init                     # write a starter config
//! vrag setup-key                # generate the encryption key
//! vrag ingest ./docs            # parse, chunk, encrypt, index
//! vrag query -q "what changed?" # retrieve, decrypt, answer
//! vrag verify-audit             # check the ledger hash chain
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy shared by the pipelines |
//! | [`parser`] | Plaintext extraction from txt/md/pdf/docx |
//! | [`chunker`] | Overlapping text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`crypto`] | AES-256-GCM seal/open for chunk text |
//! | [`index`] | Vector index backends (Qdrant, in-memory) |
//! | [`generation`] | LLM answer generation |
//! | [`ingest`] | Document ingestion pipeline |
//! | [`query`] | Retrieval and answer pipeline |
//! | [`audit`] | Hash-chained audit ledger |
//! | [`stats`] | System statistics overview |

pub mod audit;
pub mod chunker;
pub mod config;
pub mod crypto;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod models;
pub mod parser;
pub mod query;
pub mod stats;
