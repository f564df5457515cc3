//! Hash-chained audit log of medication events.
//!
//! Each entry commits to the previous entry's hash, so editing or dropping
//! any entry breaks every hash after it:
//!
//! ```text
//! hash[n] = sha256(hash[n-1] || canonical_json(event[n]))
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::registry::MedicationEvent;

/// Hash used as `prev_hash` of the first entry.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Audit errors.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type AuditResult<T> = Result<T, AuditError>;

/// One link in the chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    /// Position in the log, starting at 0
    pub sequence: u64,
    /// Canonical JSON of the event
    pub payload: String,
    /// Hash of the previous entry
    pub prev_hash: String,
    /// Hash of this entry
    pub hash: String,
}

impl AuditEntry {
    /// Decode the recorded event.
    pub fn event(&self) -> AuditResult<MedicationEvent> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

/// Append-only audit log.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a log from stored entries. Call [`AuditLog::verify`] to check
    /// that they still form an unbroken chain.
    pub fn from_entries(mut entries: Vec<AuditEntry>) -> Self {
        entries.sort_by_key(|entry| entry.sequence);
        Self { entries }
    }

    /// Build the entry `event` would get, without appending it.
    pub fn prepare(&self, event: &MedicationEvent) -> AuditResult<AuditEntry> {
        let payload = serde_json::to_string(event)?;
        let prev_hash = self.head().to_string();
        let hash = chain_hash(&prev_hash, &payload);
        Ok(AuditEntry {
            sequence: self.entries.len() as u64,
            payload,
            prev_hash,
            hash,
        })
    }

    /// Append an entry built by [`AuditLog::prepare`] on this log.
    pub(crate) fn push(&mut self, entry: AuditEntry) {
        self.entries.push(entry);
    }

    /// Append an event.
    pub fn append(&mut self, event: &MedicationEvent) -> AuditResult<&AuditEntry> {
        let entry = self.prepare(event)?;
        self.entries.push(entry);
        Ok(&self.entries[self.entries.len() - 1])
    }

    /// Hash of the latest entry, or [`GENESIS_HASH`] when empty.
    pub fn head(&self) -> &str {
        self.entries
            .last()
            .map(|e| e.hash.as_str())
            .unwrap_or(GENESIS_HASH)
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recompute the chain and check every link.
    pub fn verify(&self) -> bool {
        let mut prev = GENESIS_HASH.to_string();
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.sequence != i as u64 || entry.prev_hash != prev {
                return false;
            }
            if chain_hash(&prev, &entry.payload) != entry.hash {
                return false;
            }
            prev = entry.hash.clone();
        }
        true
    }
}

fn chain_hash(prev_hash: &str, payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}
