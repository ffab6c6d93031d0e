//! Hash-chained, tamper-evident audit ledger.
//!
//! Every pipeline operation appends one record to a JSONL log. Each
//! record commits to its predecessor:
//!
//!   hash_i = SHA-256( hash_{i-1} || canonical_json(record_i without hash) )
//!
//! with the empty string standing in for the predecessor of the first
//! record. This detects modification, insertion, and reordering of
//! stored records. It does NOT prevent deletion of the whole log; any
//! partial tampering is detectable by replay.
//!
//! Records never carry chunk text, query text, or key material: a
//! configurable block-list strips sensitive metadata keys before the
//! record is hashed and written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::config::AuditConfig;
use crate::error::{RagError, Result};

/// One persisted audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub category: String,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub integrity_hash: String,
}

/// The hashed portion of a record: everything except the hash itself.
/// Field order here fixes the canonical serialization.
#[derive(Serialize)]
struct CanonicalRecord<'a> {
    timestamp: &'a DateTime<Utc>,
    category: &'a str,
    event_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
    metadata: &'a BTreeMap<String, serde_json::Value>,
}

/// Chain hash of one record given its predecessor's hash.
pub fn record_hash(prev_hash: &str, record: &AuditRecord) -> Result<String> {
    let canonical = serde_json::to_string(&CanonicalRecord {
        timestamp: &record.timestamp,
        category: &record.category,
        event_type: &record.event_type,
        user_id: record.user_id.as_deref(),
        metadata: &record.metadata,
    })?;
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Replay a record sequence, reporting the position of the first record
/// whose stored hash does not match the recomputed chain.
pub fn verify_records(records: &[AuditRecord]) -> Result<()> {
    let mut prev = String::new();
    for (i, record) in records.iter().enumerate() {
        let computed = record_hash(&prev, record)?;
        if !constant_time_eq(computed.as_bytes(), record.integrity_hash.as_bytes()) {
            return Err(RagError::Integrity { position: i });
        }
        prev = record.integrity_hash.clone();
    }
    Ok(())
}

/// Constant-time hash comparison.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Aggregate counts over the whole log, for `vrag stats`.
#[derive(Debug, Clone, Serialize)]
pub struct AuditStatistics {
    pub total_events: u64,
    pub by_category: BTreeMap<String, u64>,
    pub by_type: BTreeMap<String, u64>,
    pub first_event: Option<DateTime<Utc>>,
    pub last_event: Option<DateTime<Utc>>,
}

struct LedgerInner {
    writer: std::fs::File,
    /// Hash of the last appended record; empty before the first.
    head: String,
}

/// Append-only ledger over one JSONL file.
///
/// Appends run inside a single-writer critical section: the chain hash
/// is computed, the line written and flushed, and the head advanced
/// without releasing the lock, so concurrent appends cannot race on the
/// predecessor hash.
pub struct AuditLedger {
    path: PathBuf,
    exclude_sensitive: bool,
    blocked_fields: Vec<String>,
    inner: Mutex<LedgerInner>,
}

impl AuditLedger {
    /// Open (or create) the ledger at `config.log_file`, recovering the
    /// chain head from the last line of an existing log.
    pub fn open(config: &AuditConfig) -> Result<Self> {
        let path = config.log_file.clone();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let head = match std::fs::read_to_string(&path) {
            Ok(content) => recover_head(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let writer = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            exclude_sensitive: config.exclude_sensitive,
            blocked_fields: config
                .blocked_fields
                .iter()
                .map(|f| f.to_lowercase())
                .collect(),
            inner: Mutex::new(LedgerInner { writer, head }),
        })
    }

    /// Append one event. Sensitive metadata keys are stripped before
    /// the record is hashed, so neither the file nor the chain ever
    /// commits to blocked content.
    pub fn append(
        &self,
        category: &str,
        event_type: &str,
        metadata: BTreeMap<String, serde_json::Value>,
        user_id: Option<&str>,
    ) -> Result<AuditRecord> {
        let metadata = self.filter_metadata(metadata);

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let mut record = AuditRecord {
            timestamp: Utc::now(),
            category: category.to_string(),
            event_type: event_type.to_string(),
            user_id: user_id.map(|u| u.to_string()),
            metadata,
            integrity_hash: String::new(),
        };
        record.integrity_hash = record_hash(&inner.head, &record)?;

        let line = serde_json::to_string(&record)?;
        writeln!(inner.writer, "{}", line)?;
        inner.writer.flush()?;

        // Advance only after the record is durably written.
        inner.head = record.integrity_hash.clone();

        Ok(record)
    }

    /// Re-read the log and replay its chain. Returns the record count
    /// on success; the error names the first failing position.
    pub fn verify(&self) -> Result<u64> {
        let records = self.read_all()?;
        verify_records(&records)?;
        Ok(records.len() as u64)
    }

    /// Aggregate event counts for reporting.
    pub fn statistics(&self) -> Result<AuditStatistics> {
        let records = self.read_all()?;
        let mut by_category: BTreeMap<String, u64> = BTreeMap::new();
        let mut by_type: BTreeMap<String, u64> = BTreeMap::new();
        for record in &records {
            *by_category.entry(record.category.clone()).or_insert(0) += 1;
            *by_type.entry(record.event_type.clone()).or_insert(0) += 1;
        }
        Ok(AuditStatistics {
            total_events: records.len() as u64,
            by_category,
            by_type,
            first_event: records.first().map(|r| r.timestamp),
            last_event: records.last().map(|r| r.timestamp),
        })
    }

    fn read_all(&self) -> Result<Vec<AuditRecord>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        parse_records(&content)
    }

    fn filter_metadata(
        &self,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> BTreeMap<String, serde_json::Value> {
        if !self.exclude_sensitive {
            return metadata;
        }
        metadata
            .into_iter()
            .filter(|(key, _)| !self.blocked_fields.contains(&key.to_lowercase()))
            .collect()
    }
}

/// Chain head from the last non-empty line of an existing log.
fn recover_head(content: &str) -> Result<String> {
    let last = content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .last();
    match last {
        Some((position, line)) => {
            let record: AuditRecord =
                serde_json::from_str(line).map_err(|_| RagError::Integrity { position })?;
            Ok(record.integrity_hash)
        }
        None => Ok(String::new()),
    }
}

fn parse_records(content: &str) -> Result<Vec<AuditRecord>> {
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .map(|(position, line)| {
            serde_json::from_str(line).map_err(|_| RagError::Integrity { position })
        })
        .collect()
}
