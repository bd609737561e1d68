use crate::entry::{AuditDetails, AuditEntry, AuditFilter, AuditPage, Page};
use crate::integrity::{entry_digest, verify_chain, ChainVerification};
use crate::redaction::Redactor;
use crate::store::AuditStore;
use chrono::{DateTime, Utc};
use neonpro_core::{
    AuditAction, Clock, ComplianceError, ComplianceResult, DataClassification, LegalBasis,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

/// Hash of the last appended entry, loaded from the store on first use.
#[derive(Default)]
struct ChainHead {
    loaded: bool,
    hash: Option<String>,
}

/// Records compliance-relevant actions in an append-only store.
///
/// An action only counts as having happened once `record` returns `Ok`;
/// callers must abandon the action when it returns an error.
pub struct AuditRecorder {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
    redactor: Redactor,
    head: Mutex<ChainHead>,
}

impl AuditRecorder {
    /// Create a recorder writing to `store` and stamping entries with `clock`.
    pub fn new(store: Arc<dyn AuditStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            redactor: Redactor::new(),
            head: Mutex::new(ChainHead::default()),
        }
    }

    /// The clock used for entry timestamps.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Redact `details`, seal the entry into the hash chain and append it.
    pub async fn record(
        &self,
        action: AuditAction,
        subject_id: &str,
        actor_id: &str,
        legal_basis: LegalBasis,
        data_classification: DataClassification,
        details: AuditDetails,
    ) -> ComplianceResult<AuditEntry> {
        if subject_id.trim().is_empty() || actor_id.trim().is_empty() {
            return Err(ComplianceError::InvalidInput(
                "audit entries need a subject id and an actor id".to_string(),
            ));
        }

        let redacted = self.redactor.redact(&details);

        // Serialize appends so each entry links to the one written before it.
        let mut head = self.head.lock().await;
        if !head.loaded {
            head.hash = self.store.last_hash().await.map_err(|e| {
                ComplianceError::AuditWrite(format!("cannot read chain head: {e}"))
            })?;
            head.loaded = true;
        }

        let mut entry = AuditEntry {
            entry_id: Uuid::new_v4(),
            actor_id: actor_id.to_string(),
            action,
            subject_id: subject_id.to_string(),
            legal_basis,
            data_classification,
            timestamp: self.clock.now(),
            details: redacted.details,
            prev_hash: head.hash.clone(),
            hash: String::new(),
        };
        entry.hash = entry_digest(&entry);

        if let Err(e) = self.store.append(&entry).await {
            error!(
                subject_id = %entry.subject_id,
                action = %entry.action,
                error = %e,
                "audit append failed"
            );
            return Err(match e {
                ComplianceError::AuditWrite(msg) => ComplianceError::AuditWrite(msg),
                other => ComplianceError::AuditWrite(other.to_string()),
            });
        }
        head.hash = Some(entry.hash.clone());

        info!(
            entry_id = %entry.entry_id,
            subject_id = %entry.subject_id,
            actor_id = %entry.actor_id,
            action = %entry.action,
            legal_basis = %entry.legal_basis,
            classification = %entry.data_classification,
            masked_fields = redacted.masked_fields.len(),
            pii_matches = redacted.pii_matches,
            "audit"
        );
        Ok(entry)
    }

    /// Entries about `subject_id` with `from <= timestamp <= to`, ascending by
    /// timestamp, one page at a time.
    pub async fn query_audit_trail(
        &self,
        subject_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        page: Page,
    ) -> ComplianceResult<AuditPage> {
        if from > to {
            return Err(ComplianceError::InvalidInput(format!(
                "time range is inverted: {from} > {to}"
            )));
        }
        let filter = AuditFilter {
            subject_id: Some(subject_id.to_string()),
            from: Some(from),
            to: Some(to),
        };
        let mut entries = self.store.scan(&filter).await?;
        // Stable: entries with equal timestamps keep append order.
        entries.sort_by_key(|e| e.timestamp);

        let total = entries.len();
        let limit = page.effective_limit();
        let entries: Vec<AuditEntry> = entries.into_iter().skip(page.offset).take(limit).collect();
        let end = page.offset.saturating_add(entries.len());
        let next_offset = (end < total).then_some(end);

        Ok(AuditPage {
            entries,
            total,
            next_offset,
        })
    }

    /// Every entry whose action is one of `actions`, ascending by timestamp.
    ///
    /// Used to rebuild state that is derived from the trail after a restart.
    pub async fn entries_for_actions(
        &self,
        actions: &[AuditAction],
    ) -> ComplianceResult<Vec<AuditEntry>> {
        let mut entries = self.store.scan(&AuditFilter::default()).await?;
        entries.retain(|e| actions.contains(&e.action));
        entries.sort_by_key(|e| e.timestamp);
        Ok(entries)
    }

    /// Walk the whole log and check its hash chain.
    pub async fn verify(&self) -> ComplianceResult<ChainVerification> {
        let entries = self.store.scan(&AuditFilter::default()).await?;
        let result = verify_chain(&entries);
        if let ChainVerification::Broken { index, entry_id, reason } = &result {
            error!(index, entry_id = %entry_id, reason = %reason, "audit chain broken");
        }
        Ok(result)
    }
}
