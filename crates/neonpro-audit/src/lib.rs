//! Append-only audit trail for the NeonPro compliance core.
//!
//! Every compliance-relevant action (evaluations, report generation, consent
//! transitions, access to and erasure of personal data) is recorded here with
//! who did it, under which LGPD legal basis and when. Detail values tagged
//! sensitive or critical are masked before they reach the store, and each
//! entry is sealed into a SHA-256 hash chain.
//!
//! # Main types
//!
//! - [`AuditRecorder`]: Redacts, seals and appends entries; queries the trail.
//! - [`AuditStore`]: Append-only persistence trait.
//! - [`MemoryAuditStore`], [`JsonlAuditStore`], [`SqliteAuditStore`]: Store backends.
//! - [`AuditEntry`] / [`AuditDetails`]: Stored record and tagged caller input.
//! - [`Redactor`]: PII masking.

/// Audit entries, tagged details and query types.
pub mod entry;
/// Hash chain sealing and verification.
pub mod integrity;
/// Audit recorder.
pub mod recorder;
/// PII redaction.
pub mod redaction;
/// Retention periods.
pub mod retention;
/// SQLite store backend.
pub mod sqlite;
/// Store trait and file/memory backends.
pub mod store;

pub use entry::{AuditDetails, AuditEntry, AuditFilter, AuditPage, DetailField, Page};
pub use integrity::{verify_chain, ChainVerification};
pub use recorder::AuditRecorder;
pub use redaction::{Redactor, MASK_TOKEN};
pub use retention::{retain_until, RecordCategory, RetentionPolicy};
pub use sqlite::SqliteAuditStore;
pub use store::{AuditStore, JsonlAuditStore, MemoryAuditStore};
