use chrono::{DateTime, Utc};
use neonpro_core::{AuditAction, DataClassification, LegalBasis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// An immutable record of a compliance-relevant action.
///
/// Entries are built only by [`AuditRecorder`](crate::AuditRecorder); `details`
/// has already been redacted and `hash` seals every other field together with
/// the hash of the previous entry in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique id generated at write time.
    pub entry_id: Uuid,
    /// Who performed the action.
    pub actor_id: String,
    /// What was done.
    pub action: AuditAction,
    /// Which subject it was done to.
    pub subject_id: String,
    /// LGPD ground the action relied on.
    pub legal_basis: LegalBasis,
    /// Classification of the data touched by the action.
    pub data_classification: DataClassification,
    /// When the entry was written.
    pub timestamp: DateTime<Utc>,
    /// Redacted free-form details.
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
    /// Hash of the entry appended before this one, if any.
    pub prev_hash: Option<String>,
    /// SHA-256 over this entry's fields and `prev_hash`, hex encoded.
    pub hash: String,
}

/// One caller-supplied detail value with its classification tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailField {
    /// The raw value.
    pub value: serde_json::Value,
    /// How sensitive the value is.
    #[serde(default)]
    pub classification: DataClassification,
}

/// Tagged details handed to [`AuditRecorder::record`](crate::AuditRecorder::record).
///
/// Values tagged `sensitive` or `critical` never reach the store in clear.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditDetails {
    fields: BTreeMap<String, DetailField>,
}

impl AuditDetails {
    /// Empty details.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value with an explicit classification.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
        classification: DataClassification,
    ) {
        self.fields.insert(
            key.into(),
            DetailField {
                value: value.into(),
                classification,
            },
        );
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
        classification: DataClassification,
    ) -> Self {
        self.insert(key, value, classification);
        self
    }

    /// Add a `public` value.
    pub fn public(self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.with(key, value, DataClassification::Public)
    }

    /// Add a `regular` value.
    pub fn regular(self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.with(key, value, DataClassification::Regular)
    }

    /// Add a `sensitive` value.
    pub fn sensitive(self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.with(key, value, DataClassification::Sensitive)
    }

    /// Add a `critical` value.
    pub fn critical(self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.with(key, value, DataClassification::Critical)
    }

    /// Iterate fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &DetailField)> {
        self.fields.iter()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when there are no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Filter applied by [`AuditStore::scan`](crate::AuditStore::scan).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditFilter {
    /// Only entries about this subject.
    pub subject_id: Option<String>,
    /// Only entries at or after this instant.
    pub from: Option<DateTime<Utc>>,
    /// Only entries at or before this instant.
    pub to: Option<DateTime<Utc>>,
}

impl AuditFilter {
    /// Whether `entry` passes the filter.
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(subject_id) = &self.subject_id {
            if &entry.subject_id != subject_id {
                return false;
            }
        }
        if let Some(from) = self.from {
            if entry.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if entry.timestamp > to {
                return false;
            }
        }
        true
    }
}

/// Offset pagination for audit trail queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Entries to skip.
    #[serde(default)]
    pub offset: usize,
    /// Maximum entries returned; clamped to [`Page::MAX_LIMIT`].
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Page {
    /// Largest page a single query may return.
    pub const MAX_LIMIT: usize = 1000;

    /// A page starting at `offset` with at most `limit` entries.
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    pub(crate) fn effective_limit(&self) -> usize {
        self.limit.clamp(1, Self::MAX_LIMIT)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: default_limit(),
        }
    }
}

fn default_limit() -> usize {
    100
}

/// One page of an audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditPage {
    /// Entries in ascending timestamp order.
    pub entries: Vec<AuditEntry>,
    /// Matching entries across all pages.
    pub total: usize,
    /// Offset of the next page, `None` on the last page.
    pub next_offset: Option<usize>,
}
