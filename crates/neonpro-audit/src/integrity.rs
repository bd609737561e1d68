use crate::entry::AuditEntry;
use chrono::{DateTime, Utc};
use neonpro_core::{AuditAction, DataClassification, LegalBasis};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Serialize)]
struct Sealed<'a> {
    entry_id: &'a Uuid,
    actor_id: &'a str,
    action: &'a AuditAction,
    subject_id: &'a str,
    legal_basis: &'a LegalBasis,
    data_classification: &'a DataClassification,
    timestamp: &'a DateTime<Utc>,
    details: &'a BTreeMap<String, serde_json::Value>,
    prev_hash: Option<&'a str>,
}

/// Hex SHA-256 sealing every field of `entry` except `hash` itself.
pub fn entry_digest(entry: &AuditEntry) -> String {
    let sealed = Sealed {
        entry_id: &entry.entry_id,
        actor_id: &entry.actor_id,
        action: &entry.action,
        subject_id: &entry.subject_id,
        legal_basis: &entry.legal_basis,
        data_classification: &entry.data_classification,
        timestamp: &entry.timestamp,
        details: &entry.details,
        prev_hash: entry.prev_hash.as_deref(),
    };
    // Serializing borrowed plain data into a Vec cannot fail.
    let bytes = serde_json::to_vec(&sealed).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

/// Outcome of walking the hash chain of a log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainVerification {
    /// Every entry matches its hash and links to its predecessor.
    Intact {
        /// Number of entries checked.
        entries: usize,
    },
    /// The first entry that does not verify.
    Broken {
        /// Position in append order.
        index: usize,
        /// Id of the offending entry.
        entry_id: Uuid,
        /// What did not match.
        reason: String,
    },
}

impl ChainVerification {
    /// True when the chain verified.
    pub fn is_intact(&self) -> bool {
        matches!(self, ChainVerification::Intact { .. })
    }
}

/// Verify a full log given in append order.
pub fn verify_chain(entries: &[AuditEntry]) -> ChainVerification {
    let mut expected_prev: Option<&str> = None;
    for (index, entry) in entries.iter().enumerate() {
        if entry.prev_hash.as_deref() != expected_prev {
            return ChainVerification::Broken {
                index,
                entry_id: entry.entry_id,
                reason: "previous-hash link does not match the preceding entry".to_string(),
            };
        }
        if entry_digest(entry) != entry.hash {
            return ChainVerification::Broken {
                index,
                entry_id: entry.entry_id,
                reason: "content does not match the recorded hash".to_string(),
            };
        }
        expected_prev = Some(entry.hash.as_str());
    }
    ChainVerification::Intact {
        entries: entries.len(),
    }
}
