use chrono::{DateTime, Duration, Utc};
use neonpro_audit::{AuditDetails, AuditEntry, AuditRecorder};
use neonpro_core::{
    AuditAction, ComplianceError, ComplianceResult, DataClassification, LegalBasis,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Days the controller has to answer a request (LGPD art. 19, II).
pub const RESPONSE_DAYS: i64 = 15;

const RIGHTS_ACTIONS: [AuditAction; 3] = [
    AuditAction::RightsRequested,
    AuditAction::DataAccessed,
    AuditAction::DataErased,
];

/// Data subject right being exercised (LGPD art. 18).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RightsRequestKind {
    /// Confirmation of processing and access to the data (art. 18, I-II).
    Access,
    /// Deletion of data processed with consent (art. 18, VI).
    Erasure,
}

impl RightsRequestKind {
    /// Audit action recorded when a request of this kind is fulfilled.
    pub fn completion_action(self) -> AuditAction {
        match self {
            RightsRequestKind::Access => AuditAction::DataAccessed,
            RightsRequestKind::Erasure => AuditAction::DataErased,
        }
    }
}

impl fmt::Display for RightsRequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RightsRequestKind::Access => write!(f, "access"),
            RightsRequestKind::Erasure => write!(f, "erasure"),
        }
    }
}

/// Where a request stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RightsRequestStatus {
    /// Received, not yet answered.
    Open,
    /// Answered; the completion is in the audit trail.
    Completed,
}

/// A data subject request and its deadline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSubjectRequest {
    /// Identifier of the request.
    pub request_id: Uuid,
    /// Whose data the request is about.
    pub data_subject_id: String,
    /// Right being exercised.
    pub kind: RightsRequestKind,
    /// Open or completed.
    pub status: RightsRequestStatus,
    /// When the request was registered.
    pub opened_at: DateTime<Utc>,
    /// Who registered it.
    pub opened_by: String,
    /// Answer deadline, [`RESPONSE_DAYS`] after opening.
    pub due_at: DateTime<Utc>,
    /// When it was answered.
    pub completed_at: Option<DateTime<Utc>>,
    /// Who answered it.
    pub completed_by: Option<String>,
    /// Audit entries of the request, oldest first.
    pub audit_entry_ids: Vec<Uuid>,
}

impl DataSubjectRequest {
    /// Still open past its deadline.
    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        self.status == RightsRequestStatus::Open && now > self.due_at
    }
}

/// Intake and completion of LGPD data subject requests.
///
/// Opening records a `rights_requested` entry; completion records
/// `data_accessed` or `data_erased`. As with consent, the audit entry is
/// written first and the request only changes once it is stored, and the
/// trail is enough to rebuild every request with [`restore`](Self::restore).
pub struct DataRightsManager {
    recorder: Arc<AuditRecorder>,
    requests: RwLock<Vec<DataSubjectRequest>>,
}

impl DataRightsManager {
    /// Manager with no requests.
    pub fn new(recorder: Arc<AuditRecorder>) -> Self {
        Self {
            recorder,
            requests: RwLock::new(Vec::new()),
        }
    }

    /// Manager holding every request found in the recorder's audit trail.
    pub async fn restore(recorder: Arc<AuditRecorder>) -> ComplianceResult<Self> {
        let entries = recorder.entries_for_actions(&RIGHTS_ACTIONS).await?;
        let mut manager = Self::new(recorder);

        let requests = manager.requests.get_mut();
        let mut replayed = 0usize;
        for entry in &entries {
            match replay(requests, entry) {
                Ok(true) => replayed += 1,
                // Access or erasure logged outside a request.
                Ok(false) => {}
                Err(reason) => warn!(
                    entry_id = %entry.entry_id,
                    data_subject_id = %entry.subject_id,
                    reason = %reason,
                    "skipping rights entry"
                ),
            }
        }

        info!(replayed, requests = requests.len(), "data subject requests restored");
        Ok(manager)
    }

    /// Register a request. Only one request of each kind may be open per
    /// data subject.
    pub async fn open(
        &self,
        data_subject_id: &str,
        kind: RightsRequestKind,
        actor_id: &str,
    ) -> ComplianceResult<DataSubjectRequest> {
        if data_subject_id.trim().is_empty() {
            return Err(ComplianceError::InvalidInput(
                "a data subject request needs a data subject id".to_string(),
            ));
        }

        let mut requests = self.requests.write().await;
        if let Some(open) = requests.iter().find(|r| {
            r.data_subject_id == data_subject_id
                && r.kind == kind
                && r.status == RightsRequestStatus::Open
        }) {
            return Err(ComplianceError::InvalidInput(format!(
                "{kind} request {} is already open for {data_subject_id}",
                open.request_id
            )));
        }

        let request_id = Uuid::new_v4();
        let due_at = self.recorder.clock().now() + Duration::days(RESPONSE_DAYS);
        let details = AuditDetails::new()
            .public("request_id", request_id.to_string())
            .public("kind", kind.to_string())
            .public("due_at", due_at.to_rfc3339());
        let entry = self
            .recorder
            .record(
                AuditAction::RightsRequested,
                data_subject_id,
                actor_id,
                LegalBasis::LegalObligation,
                DataClassification::Regular,
                details,
            )
            .await?;

        let request = DataSubjectRequest {
            request_id,
            data_subject_id: data_subject_id.to_string(),
            kind,
            status: RightsRequestStatus::Open,
            opened_at: entry.timestamp,
            opened_by: entry.actor_id,
            due_at,
            completed_at: None,
            completed_by: None,
            audit_entry_ids: vec![entry.entry_id],
        };
        requests.push(request.clone());

        info!(
            data_subject_id,
            request_id = %request_id,
            kind = %kind,
            due_at = %due_at,
            "data subject request opened"
        );
        Ok(request)
    }

    /// Mark an open request as answered.
    pub async fn complete(
        &self,
        request_id: Uuid,
        actor_id: &str,
    ) -> ComplianceResult<DataSubjectRequest> {
        let mut requests = self.requests.write().await;
        let request = requests
            .iter_mut()
            .find(|r| r.request_id == request_id)
            .ok_or_else(|| ComplianceError::NotFound(format!("no request {request_id}")))?;
        if request.status == RightsRequestStatus::Completed {
            return Err(ComplianceError::InvalidInput(format!(
                "request {request_id} is already completed"
            )));
        }

        let now = self.recorder.clock().now();
        let details = AuditDetails::new()
            .public("request_id", request_id.to_string())
            .public("kind", request.kind.to_string())
            .public("on_time", now <= request.due_at);
        let entry = self
            .recorder
            .record(
                request.kind.completion_action(),
                &request.data_subject_id,
                actor_id,
                LegalBasis::LegalObligation,
                DataClassification::Regular,
                details,
            )
            .await?;

        request.status = RightsRequestStatus::Completed;
        request.completed_at = Some(entry.timestamp);
        request.completed_by = Some(entry.actor_id);
        request.audit_entry_ids.push(entry.entry_id);

        if entry.timestamp > request.due_at {
            warn!(request_id = %request_id, due_at = %request.due_at, "request answered late");
        }
        info!(request_id = %request_id, kind = %request.kind, "data subject request completed");
        Ok(request.clone())
    }

    /// The request with this id.
    pub async fn get(&self, request_id: Uuid) -> Option<DataSubjectRequest> {
        let requests = self.requests.read().await;
        requests.iter().find(|r| r.request_id == request_id).cloned()
    }

    /// Every request of a data subject, oldest first.
    pub async fn for_data_subject(&self, data_subject_id: &str) -> Vec<DataSubjectRequest> {
        let requests = self.requests.read().await;
        requests
            .iter()
            .filter(|r| r.data_subject_id == data_subject_id)
            .cloned()
            .collect()
    }

    /// Open requests past their deadline at the recorder's current time.
    pub async fn overdue(&self) -> Vec<DataSubjectRequest> {
        let now = self.recorder.clock().now();
        let requests = self.requests.read().await;
        requests
            .iter()
            .filter(|r| r.is_overdue_at(now))
            .cloned()
            .collect()
    }
}

/// Apply one entry; `Ok(false)` when it does not belong to a request.
fn replay(requests: &mut Vec<DataSubjectRequest>, entry: &AuditEntry) -> Result<bool, String> {
    let Some(raw_id) = entry.details.get("request_id") else {
        debug!(entry_id = %entry.entry_id, "entry without request id");
        return Ok(false);
    };
    let request_id: Uuid = serde_json::from_value(raw_id.clone())
        .map_err(|e| format!("field `request_id`: {e}"))?;
    let kind: RightsRequestKind = entry
        .details
        .get("kind")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| format!("field `kind`: {e}"))?
        .ok_or("missing field `kind`")?;

    if entry.action == AuditAction::RightsRequested {
        if requests.iter().any(|r| r.request_id == request_id) {
            return Err(format!("request {request_id} opened twice"));
        }
        let due_at = entry
            .details
            .get("due_at")
            .cloned()
            .map(serde_json::from_value::<DateTime<Utc>>)
            .transpose()
            .map_err(|e| format!("field `due_at`: {e}"))?
            .unwrap_or(entry.timestamp + Duration::days(RESPONSE_DAYS));
        requests.push(DataSubjectRequest {
            request_id,
            data_subject_id: entry.subject_id.clone(),
            kind,
            status: RightsRequestStatus::Open,
            opened_at: entry.timestamp,
            opened_by: entry.actor_id.clone(),
            due_at,
            completed_at: None,
            completed_by: None,
            audit_entry_ids: vec![entry.entry_id],
        });
        return Ok(true);
    }

    let request = requests
        .iter_mut()
        .find(|r| r.request_id == request_id)
        .ok_or_else(|| format!("completion of unknown request {request_id}"))?;
    if request.status != RightsRequestStatus::Open || kind.completion_action() != entry.action {
        return Err(format!("{} does not complete request {request_id}", entry.action));
    }
    request.status = RightsRequestStatus::Completed;
    request.completed_at = Some(entry.timestamp);
    request.completed_by = Some(entry.actor_id.clone());
    request.audit_entry_ids.push(entry.entry_id);
    Ok(true)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use neonpro_audit::{MemoryAuditStore, Page};
    use neonpro_core::{Clock, FixedClock};

    fn fixture() -> (Arc<MemoryAuditStore>, Arc<FixedClock>, Arc<AuditRecorder>) {
        let store = Arc::new(MemoryAuditStore::new());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 7, 1, 9, 0, 0).unwrap(),
        ));
        let recorder = Arc::new(AuditRecorder::new(store.clone(), clock.clone()));
        (store, clock, recorder)
    }

    #[tokio::test]
    async fn test_access_and_erasure_are_audited() {
        let (_, clock, recorder) = fixture();
        let rights = DataRightsManager::new(recorder.clone());

        let access = rights
            .open("pac-1", RightsRequestKind::Access, "dpo")
            .await
            .unwrap();
        assert_eq!(access.due_at, clock.now() + Duration::days(RESPONSE_DAYS));
        clock.advance(Duration::days(2));
        let done = rights.complete(access.request_id, "dpo").await.unwrap();
        assert_eq!(done.status, RightsRequestStatus::Completed);
        assert_eq!(done.audit_entry_ids.len(), 2);

        let erasure = rights
            .open("pac-1", RightsRequestKind::Erasure, "dpo")
            .await
            .unwrap();
        rights.complete(erasure.request_id, "dpo").await.unwrap();

        let now = clock.now();
        let trail = recorder
            .query_audit_trail("pac-1", now - Duration::days(30), now, Page::default())
            .await
            .unwrap();
        let actions: Vec<_> = trail.entries.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::RightsRequested,
                AuditAction::DataAccessed,
                AuditAction::RightsRequested,
                AuditAction::DataErased
            ]
        );
        assert!(trail
            .entries
            .iter()
            .all(|e| e.legal_basis == LegalBasis::LegalObligation));
        assert_eq!(trail.entries[1].details["on_time"], true);
    }

    #[tokio::test]
    async fn test_duplicate_and_repeated_completion_rejected() {
        let (store, _, recorder) = fixture();
        let rights = DataRightsManager::new(recorder);

        let open = rights
            .open("pac-2", RightsRequestKind::Erasure, "dpo")
            .await
            .unwrap();
        let err = rights
            .open("pac-2", RightsRequestKind::Erasure, "dpo")
            .await
            .unwrap_err();
        assert!(err.is_caller_error());

        rights.complete(open.request_id, "dpo").await.unwrap();
        let err = rights.complete(open.request_id, "dpo").await.unwrap_err();
        assert!(matches!(err, ComplianceError::InvalidInput(_)));
        let err = rights.complete(Uuid::new_v4(), "dpo").await.unwrap_err();
        assert!(matches!(err, ComplianceError::NotFound(_)));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_audit_failure_keeps_request_open() {
        let (store, _, recorder) = fixture();
        let rights = DataRightsManager::new(recorder);
        let open = rights
            .open("pac-3", RightsRequestKind::Access, "dpo")
            .await
            .unwrap();

        store.set_unavailable(true);
        let err = rights.complete(open.request_id, "dpo").await.unwrap_err();
        assert!(matches!(err, ComplianceError::AuditWrite(_)));
        let current = rights.get(open.request_id).await.unwrap();
        assert_eq!(current.status, RightsRequestStatus::Open);
        assert_eq!(current.audit_entry_ids.len(), 1);
    }

    #[tokio::test]
    async fn test_overdue_requests() {
        let (_, clock, recorder) = fixture();
        let rights = DataRightsManager::new(recorder);
        let late = rights
            .open("pac-4", RightsRequestKind::Access, "dpo")
            .await
            .unwrap();
        let answered = rights
            .open("pac-5", RightsRequestKind::Access, "dpo")
            .await
            .unwrap();
        rights.complete(answered.request_id, "dpo").await.unwrap();

        clock.advance(Duration::days(RESPONSE_DAYS + 1));
        let overdue = rights.overdue().await;
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].request_id, late.request_id);

        let done = rights.complete(late.request_id, "dpo").await.unwrap();
        assert!(!done.is_overdue_at(clock.now()));
    }

    #[tokio::test]
    async fn test_restore_rebuilds_requests() {
        let (_, clock, recorder) = fixture();
        let rights = DataRightsManager::new(recorder.clone());
        let access = rights
            .open("pac-6", RightsRequestKind::Access, "dpo")
            .await
            .unwrap();
        clock.advance(Duration::hours(3));
        rights.complete(access.request_id, "dpo").await.unwrap();
        let erasure = rights
            .open("pac-6", RightsRequestKind::Erasure, "dpo")
            .await
            .unwrap();
        // Routine access outside any request.
        recorder
            .record(
                AuditAction::DataAccessed,
                "pac-6",
                "dr-ana",
                LegalBasis::HealthProtection,
                DataClassification::Sensitive,
                AuditDetails::new(),
            )
            .await
            .unwrap();

        let restored = DataRightsManager::restore(recorder).await.unwrap();
        assert_eq!(
            restored.for_data_subject("pac-6").await,
            rights.for_data_subject("pac-6").await
        );
        let done = restored.complete(erasure.request_id, "dpo").await.unwrap();
        assert_eq!(done.status, RightsRequestStatus::Completed);
    }
}
