use crate::subject::ComplianceSubject;
use chrono::{DateTime, Utc};
use neonpro_audit::{AuditDetails, AuditEntry, AuditRecorder};
use neonpro_core::{
    AuditAction, ComplianceError, ComplianceResult, ConsentState, DataClassification, LegalBasis,
    SubjectType,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// One state change of a consent cycle, linked to the audit entry that records it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentTransition {
    /// State before the change, `None` when the cycle was opened.
    pub from: Option<ConsentState>,
    /// State after the change.
    pub to: ConsentState,
    /// Timestamp of the audit entry.
    pub at: DateTime<Utc>,
    /// Who performed the change.
    pub actor_id: String,
    /// Audit entry recording the change.
    pub audit_entry_id: Uuid,
}

/// One consent cycle for a data subject and purpose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentRecord {
    /// Identifier of the cycle.
    pub consent_id: Uuid,
    /// Whose data the consent covers.
    pub data_subject_id: String,
    /// What the data may be used for.
    pub purpose: String,
    /// Always [`LegalBasis::Consent`].
    pub legal_basis: LegalBasis,
    /// Classification of the data covered by the consent.
    pub data_classification: DataClassification,
    /// Current state of the cycle.
    pub state: ConsentState,
    /// 1 for the first cycle of the pair, incremented on every new request.
    pub cycle: u32,
    /// When the cycle was opened.
    pub requested_at: DateTime<Utc>,
    /// Optional end of validity of a granted consent.
    pub expires_at: Option<DateTime<Utc>>,
    /// Every change of this cycle, oldest first.
    pub transitions: Vec<ConsentTransition>,
}

impl ConsentRecord {
    /// Granted and not expired at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.state == ConsentState::Granted && self.expires_at.map_or(true, |exp| now < exp)
    }

    /// Whether the consent has lapsed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    /// A `consent` compliance subject describing this record at `now`.
    ///
    /// Only consent attributes are filled in; retention attributes are up to
    /// the caller.
    pub fn to_subject(&self, now: DateTime<Utc>) -> ComplianceSubject {
        ComplianceSubject::new(
            self.consent_id.to_string(),
            SubjectType::Consent,
            self.data_classification.to_string(),
        )
        .with_attribute("legalBasis", self.legal_basis.to_string())
        .with_attribute("purpose", self.purpose.clone())
        .with_attribute("consentStatus", self.state.to_string())
        .with_attribute("consentExpired", self.is_expired_at(now))
        .with_attribute("explicitConsent", true)
        .with_attribute("withdrawalChannel", true)
    }
}

type LedgerKey = (String, String);

const CONSENT_ACTIONS: [AuditAction; 4] = [
    AuditAction::ConsentRequested,
    AuditAction::ConsentGranted,
    AuditAction::ConsentDenied,
    AuditAction::ConsentWithdrawn,
];

/// Consent lifecycle per (data subject, purpose).
///
/// `requested -> granted -> withdrawn` and `requested -> denied`. A new cycle
/// can be requested once the latest one is closed. Every transition is written
/// to the audit trail before the ledger changes; if the write fails the state
/// stays as it was. The audit trail is the durable copy of the ledger:
/// [`restore`](Self::restore) rebuilds it after a restart.
pub struct ConsentManager {
    recorder: Arc<AuditRecorder>,
    ledgers: RwLock<HashMap<LedgerKey, Vec<ConsentRecord>>>,
    data_classification: DataClassification,
}

impl ConsentManager {
    /// Manager for sensitive (health) data consents.
    pub fn new(recorder: Arc<AuditRecorder>) -> Self {
        Self {
            recorder,
            ledgers: RwLock::new(HashMap::new()),
            data_classification: DataClassification::Sensitive,
        }
    }

    /// Manager whose ledger is rebuilt from the consent entries already in
    /// the recorder's audit trail.
    ///
    /// Entries that do not fit the ledger (missing fields, a transition the
    /// state machine forbids) are skipped with a warning.
    pub async fn restore(recorder: Arc<AuditRecorder>) -> ComplianceResult<Self> {
        let entries = recorder.entries_for_actions(&CONSENT_ACTIONS).await?;
        let mut manager = Self::new(recorder);

        let ledgers = manager.ledgers.get_mut();
        let mut replayed = 0usize;
        for entry in &entries {
            match replay(ledgers, entry) {
                Ok(()) => replayed += 1,
                Err(reason) => warn!(
                    entry_id = %entry.entry_id,
                    data_subject_id = %entry.subject_id,
                    reason = %reason,
                    "skipping consent entry"
                ),
            }
        }
        ledgers.retain(|_, cycles| !cycles.is_empty());

        info!(
            replayed,
            skipped = entries.len() - replayed,
            pairs = ledgers.len(),
            "consent ledger restored"
        );
        Ok(manager)
    }

    /// Use a different classification for new consent cycles.
    pub fn with_classification(mut self, classification: DataClassification) -> Self {
        self.data_classification = classification;
        self
    }

    /// Open a new consent cycle.
    pub async fn request(
        &self,
        data_subject_id: &str,
        purpose: &str,
        actor_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> ComplianceResult<ConsentRecord> {
        if let Some(exp) = expires_at {
            let now = self.recorder.clock().now();
            if exp <= now {
                return Err(ComplianceError::InvalidInput(format!(
                    "consent expiry {exp} is not in the future"
                )));
            }
        }
        self.transition(
            data_subject_id,
            purpose,
            actor_id,
            ConsentState::Requested,
            expires_at,
        )
        .await
    }

    /// The data subject agreed to the open request.
    pub async fn grant(
        &self,
        data_subject_id: &str,
        purpose: &str,
        actor_id: &str,
    ) -> ComplianceResult<ConsentRecord> {
        self.transition(data_subject_id, purpose, actor_id, ConsentState::Granted, None)
            .await
    }

    /// The data subject refused the open request.
    pub async fn deny(
        &self,
        data_subject_id: &str,
        purpose: &str,
        actor_id: &str,
    ) -> ComplianceResult<ConsentRecord> {
        self.transition(data_subject_id, purpose, actor_id, ConsentState::Denied, None)
            .await
    }

    /// The data subject withdrew a granted consent.
    pub async fn withdraw(
        &self,
        data_subject_id: &str,
        purpose: &str,
        actor_id: &str,
    ) -> ComplianceResult<ConsentRecord> {
        self.transition(
            data_subject_id,
            purpose,
            actor_id,
            ConsentState::Withdrawn,
            None,
        )
        .await
    }

    /// Latest cycle for the pair, if any.
    pub async fn current(&self, data_subject_id: &str, purpose: &str) -> Option<ConsentRecord> {
        let ledgers = self.ledgers.read().await;
        ledgers
            .get(&key(data_subject_id, purpose))
            .and_then(|cycles| cycles.last().cloned())
    }

    /// Every cycle for the pair, oldest first.
    pub async fn history(&self, data_subject_id: &str, purpose: &str) -> Vec<ConsentRecord> {
        let ledgers = self.ledgers.read().await;
        ledgers
            .get(&key(data_subject_id, purpose))
            .cloned()
            .unwrap_or_default()
    }

    /// Every cycle of every purpose for a data subject, grouped by purpose.
    pub async fn for_data_subject(&self, data_subject_id: &str) -> Vec<ConsentRecord> {
        let ledgers = self.ledgers.read().await;
        let mut records: Vec<ConsentRecord> = ledgers
            .iter()
            .filter(|((ds, _), _)| ds == data_subject_id)
            .flat_map(|(_, cycles)| cycles.iter().cloned())
            .collect();
        records.sort_by(|a, b| a.purpose.cmp(&b.purpose).then(a.cycle.cmp(&b.cycle)));
        records
    }

    /// Whether processing for `purpose` is currently covered by consent.
    pub async fn check_consent(&self, data_subject_id: &str, purpose: &str) -> bool {
        let now = self.recorder.clock().now();
        match self.current(data_subject_id, purpose).await {
            Some(record) if record.is_active_at(now) => true,
            Some(record) if record.state == ConsentState::Granted => {
                warn!(
                    data_subject_id,
                    purpose,
                    consent_id = %record.consent_id,
                    "consent expired"
                );
                false
            }
            _ => false,
        }
    }

    async fn transition(
        &self,
        data_subject_id: &str,
        purpose: &str,
        actor_id: &str,
        to: ConsentState,
        expires_at: Option<DateTime<Utc>>,
    ) -> ComplianceResult<ConsentRecord> {
        if data_subject_id.trim().is_empty() || purpose.trim().is_empty() {
            return Err(ComplianceError::InvalidInput(
                "consent needs a data subject id and a purpose".to_string(),
            ));
        }

        // Held across the audit write so concurrent transitions on the same
        // pair are serialized against the state they were validated on.
        let mut ledgers = self.ledgers.write().await;
        let cycles = ledgers.entry(key(data_subject_id, purpose)).or_default();
        let latest = cycles.last();
        let from = latest.map(|r| r.state);
        if !is_allowed(from, to) {
            return Err(ComplianceError::InvalidConsentTransition { from, to });
        }

        let (consent_id, cycle) = match latest {
            Some(r) if to != ConsentState::Requested => (r.consent_id, r.cycle),
            Some(r) => (Uuid::new_v4(), r.cycle + 1),
            None => (Uuid::new_v4(), 1),
        };

        let details = AuditDetails::new()
            .public("consent_id", consent_id.to_string())
            .public("cycle", cycle)
            .public("from", from.map(|s| s.to_string()))
            .public("to", to.to_string())
            .public("expires_at", expires_at.map(|exp| exp.to_rfc3339()))
            .regular("purpose", purpose);
        let entry = self
            .recorder
            .record(
                action_for(to),
                data_subject_id,
                actor_id,
                LegalBasis::Consent,
                self.data_classification,
                details,
            )
            .await?;

        let step = ConsentTransition {
            from,
            to,
            at: entry.timestamp,
            actor_id: actor_id.to_string(),
            audit_entry_id: entry.entry_id,
        };

        let open_cycle = if to == ConsentState::Requested {
            None
        } else {
            cycles.last_mut()
        };
        let record = match open_cycle {
            Some(r) => {
                r.state = to;
                r.transitions.push(step);
                r.clone()
            }
            None => {
                let r = ConsentRecord {
                    consent_id,
                    data_subject_id: data_subject_id.to_string(),
                    purpose: purpose.to_string(),
                    legal_basis: LegalBasis::Consent,
                    data_classification: self.data_classification,
                    state: to,
                    cycle,
                    requested_at: entry.timestamp,
                    expires_at,
                    transitions: vec![step],
                };
                cycles.push(r.clone());
                r
            }
        };

        info!(
            data_subject_id,
            consent_id = %record.consent_id,
            cycle = record.cycle,
            to = %to,
            "consent transition"
        );
        Ok(record)
    }
}

/// Apply one recorded transition to the ledger.
fn replay(
    ledgers: &mut HashMap<LedgerKey, Vec<ConsentRecord>>,
    entry: &AuditEntry,
) -> Result<(), String> {
    let to: ConsentState = detail(entry, "to")?;
    let consent_id: Uuid = detail(entry, "consent_id")?;
    let purpose: String = detail(entry, "purpose")?;

    let cycles = ledgers.entry(key(&entry.subject_id, &purpose)).or_default();
    let from = cycles.last().map(|r| r.state);
    if !is_allowed(from, to) {
        return Err(format!("{from:?} -> {to} does not follow the ledger"));
    }
    let step = ConsentTransition {
        from,
        to,
        at: entry.timestamp,
        actor_id: entry.actor_id.clone(),
        audit_entry_id: entry.entry_id,
    };

    if to == ConsentState::Requested {
        let expires_at: Option<DateTime<Utc>> = detail(entry, "expires_at")?;
        cycles.push(ConsentRecord {
            consent_id,
            data_subject_id: entry.subject_id.clone(),
            purpose,
            legal_basis: LegalBasis::Consent,
            data_classification: entry.data_classification,
            state: to,
            cycle: detail(entry, "cycle")?,
            requested_at: entry.timestamp,
            expires_at,
            transitions: vec![step],
        });
        return Ok(());
    }

    let Some(record) = cycles.last_mut() else {
        return Err(format!("{to} without an open cycle"));
    };
    if record.consent_id != consent_id {
        return Err(format!(
            "consent {consent_id} is not the open cycle {}",
            record.consent_id
        ));
    }
    record.state = to;
    record.transitions.push(step);
    Ok(())
}

fn detail<T: DeserializeOwned>(entry: &AuditEntry, field: &str) -> Result<T, String> {
    let value = entry.details.get(field).cloned().unwrap_or_default();
    serde_json::from_value(value).map_err(|e| format!("field `{field}`: {e}"))
}

fn key(data_subject_id: &str, purpose: &str) -> LedgerKey {
    (data_subject_id.to_string(), purpose.to_string())
}

fn is_allowed(from: Option<ConsentState>, to: ConsentState) -> bool {
    match (from, to) {
        (None, ConsentState::Requested) => true,
        (Some(state), ConsentState::Requested) => state.is_terminal(),
        (Some(ConsentState::Requested), ConsentState::Granted | ConsentState::Denied) => true,
        (Some(ConsentState::Granted), ConsentState::Withdrawn) => true,
        _ => false,
    }
}

fn action_for(state: ConsentState) -> AuditAction {
    match state {
        ConsentState::Requested => AuditAction::ConsentRequested,
        ConsentState::Granted => AuditAction::ConsentGranted,
        ConsentState::Denied => AuditAction::ConsentDenied,
        ConsentState::Withdrawn => AuditAction::ConsentWithdrawn,
    }
}
