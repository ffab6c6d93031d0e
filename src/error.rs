//! Error taxonomy for the pipeline.
//!
//! Every failure mode maps to one variant, and every variant maps to a
//! stable category string used in audit metadata. Messages carry
//! identifiers, filenames, and status codes only; no plaintext chunk
//! content, query text, or key material ever appears in an error.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RagError {
    /// Invalid configuration detected at construction time. Fail fast.
    #[error("config error: {0}")]
    Config(String),

    /// One document could not be parsed. Scoped to a single file; a
    /// directory batch reports it per-file and keeps going.
    #[error("parse error: {0}")]
    Parse(String),

    /// The AEAD primitive rejected an encryption input. Practically
    /// unreachable for chunk-sized plaintexts.
    #[error("encryption error")]
    Encryption,

    /// Ciphertext failed authentication: tampered data or wrong key.
    /// Deliberately carries no detail beyond the fact of failure.
    #[error("authentication error: ciphertext failed verification")]
    Authentication,

    /// The vector engine rejected or could not service a request.
    #[error("storage error: {0}")]
    Storage(String),

    /// An embedding or generation backend failed or is unreachable.
    #[error("provider error: {0}")]
    Provider(String),

    /// The audit hash chain does not replay; `position` is the index of
    /// the first record whose stored hash differs from the recomputed one.
    #[error("integrity error: audit chain broken at record {position}")]
    Integrity { position: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

impl RagError {
    /// Stable lower-case category for audit metadata and CLI summaries.
    pub fn category(&self) -> &'static str {
        match self {
            RagError::Config(_) => "config",
            RagError::Parse(_) => "parse",
            RagError::Encryption => "encryption",
            RagError::Authentication => "authentication",
            RagError::Storage(_) => "storage",
            RagError::Provider(_) => "provider",
            RagError::Integrity { .. } => "integrity",
            RagError::Io(_) => "io",
            RagError::SerdeJson(_) => "serde",
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_are_stable() {
        assert_eq!(RagError::Config("x".into()).category(), "config");
        assert_eq!(RagError::Authentication.category(), "authentication");
        assert_eq!(RagError::Integrity { position: 3 }.category(), "integrity");
    }

    #[test]
    fn authentication_error_carries_no_detail() {
        let msg = RagError::Authentication.to_string();
        assert!(msg.contains("authentication"));
        assert!(!msg.contains("key"));
    }
}
