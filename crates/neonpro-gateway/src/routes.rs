use crate::error::ApiError;
use crate::server::AppState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use neonpro_audit::{AuditPage, Page};
use neonpro_compliance::{
    AuditContext, ComplianceReport, ComplianceSubject, ConsentRecord, DataSubjectRequest,
    RightsRequestKind, RuleResult,
};
use neonpro_core::{ComplianceError, Dimension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Body of `POST /v1/evaluations`.
#[derive(Debug, Deserialize)]
pub struct EvaluationRequest {
    /// Subject to evaluate.
    pub subject: ComplianceSubject,
    /// Dimension to evaluate it on.
    pub dimension: Dimension,
    /// Audit context of the caller.
    pub context: AuditContext,
}

/// Body of `POST /v1/reports`.
#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    /// Subject to evaluate.
    pub subject: ComplianceSubject,
    /// Audit context of the caller.
    pub context: AuditContext,
}

/// Body of `POST /v1/consents/{action}`.
#[derive(Debug, Deserialize)]
pub struct ConsentRequest {
    /// Whose data the consent covers.
    pub data_subject_id: String,
    /// What the data may be used for.
    pub purpose: String,
    /// Who performs the transition.
    pub actor_id: String,
    /// Optional end of validity; only read by `request`.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Response of `GET /v1/consents/{subject_id}/{purpose}`.
#[derive(Debug, Serialize)]
pub struct ConsentStatus {
    /// Whether processing is currently covered.
    pub active: bool,
    /// Every cycle, oldest first.
    pub history: Vec<ConsentRecord>,
}

/// Body of `POST /v1/rights`.
#[derive(Debug, Deserialize)]
pub struct RightsRequestBody {
    /// Whose data the request is about.
    pub data_subject_id: String,
    /// Right being exercised.
    pub kind: RightsRequestKind,
    /// Who registers the request.
    pub actor_id: String,
}

/// Body of `POST /v1/rights/{request_id}/complete`.
#[derive(Debug, Deserialize)]
pub struct CompletionBody {
    /// Who answers the request.
    pub actor_id: String,
}

/// Response of `POST /v1/rights/{request_id}/complete`.
#[derive(Debug, Serialize)]
pub struct RightsCompletion {
    /// The completed request.
    pub request: DataSubjectRequest,
    /// Consent records held for the data subject; filled for access requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consents: Option<Vec<ConsentRecord>>,
}

/// Query of `GET /v1/audit/{subject_id}`.
#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    /// Inclusive lower bound.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound.
    pub to: Option<DateTime<Utc>>,
    /// Entries to skip.
    pub offset: Option<usize>,
    /// Page size.
    pub limit: Option<usize>,
}

pub(crate) async fn evaluate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EvaluationRequest>,
) -> ApiResult<RuleResult> {
    let result = state
        .service
        .evaluate(&req.subject, req.dimension, &req.context)
        .await?;
    Ok(Json(result))
}

pub(crate) async fn generate_report(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReportRequest>,
) -> ApiResult<ComplianceReport> {
    let report = state
        .service
        .generate_report(&req.subject, &req.context)
        .await?;
    Ok(Json(report))
}

pub(crate) async fn latest_report(
    State(state): State<Arc<AppState>>,
    Path(subject_id): Path<String>,
) -> ApiResult<ComplianceReport> {
    let store = state
        .service
        .report_store()
        .ok_or_else(|| ComplianceError::NotFound("report persistence is disabled".to_string()))?;
    let report = store
        .load_latest(&subject_id)
        .await?
        .ok_or_else(|| ComplianceError::NotFound(format!("no report for {subject_id}")))?;
    Ok(Json(report))
}

pub(crate) async fn consent_transition(
    State(state): State<Arc<AppState>>,
    Path(action): Path<String>,
    Json(req): Json<ConsentRequest>,
) -> ApiResult<ConsentRecord> {
    let consents = &state.consents;
    let (ds, purpose, actor) = (&req.data_subject_id, &req.purpose, &req.actor_id);
    let record = match action.as_str() {
        "request" => consents.request(ds, purpose, actor, req.expires_at).await?,
        "grant" => consents.grant(ds, purpose, actor).await?,
        "deny" => consents.deny(ds, purpose, actor).await?,
        "withdraw" => consents.withdraw(ds, purpose, actor).await?,
        other => {
            return Err(ComplianceError::InvalidInput(format!(
                "unknown consent action '{other}'"
            ))
            .into())
        }
    };
    Ok(Json(record))
}

pub(crate) async fn consent_status(
    State(state): State<Arc<AppState>>,
    Path((subject_id, purpose)): Path<(String, String)>,
) -> ApiResult<ConsentStatus> {
    let history = state.consents.history(&subject_id, &purpose).await;
    if history.is_empty() {
        return Err(ComplianceError::NotFound(format!(
            "no consent for {subject_id} / {purpose}"
        ))
        .into());
    }
    let active = state.consents.check_consent(&subject_id, &purpose).await;
    Ok(Json(ConsentStatus { active, history }))
}

pub(crate) async fn open_rights_request(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RightsRequestBody>,
) -> ApiResult<DataSubjectRequest> {
    let request = state
        .rights
        .open(&req.data_subject_id, req.kind, &req.actor_id)
        .await?;
    Ok(Json(request))
}

pub(crate) async fn rights_request(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
) -> ApiResult<DataSubjectRequest> {
    let request = state
        .rights
        .get(request_id)
        .await
        .ok_or_else(|| ComplianceError::NotFound(format!("no request {request_id}")))?;
    Ok(Json(request))
}

pub(crate) async fn complete_rights_request(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
    Json(req): Json<CompletionBody>,
) -> ApiResult<RightsCompletion> {
    let request = state.rights.complete(request_id, &req.actor_id).await?;
    let consents = match request.kind {
        RightsRequestKind::Access => {
            Some(state.consents.for_data_subject(&request.data_subject_id).await)
        }
        RightsRequestKind::Erasure => None,
    };
    Ok(Json(RightsCompletion { request, consents }))
}

pub(crate) async fn audit_trail(
    State(state): State<Arc<AppState>>,
    Path(subject_id): Path<String>,
    Query(query): Query<AuditQuery>,
) -> ApiResult<AuditPage> {
    let defaults = Page::default();
    let page = Page::new(
        query.offset.unwrap_or(defaults.offset),
        query.limit.unwrap_or(defaults.limit),
    );
    let trail = state
        .service
        .recorder()
        .query_audit_trail(
            &subject_id,
            query.from.unwrap_or(DateTime::<Utc>::MIN_UTC),
            query.to.unwrap_or(DateTime::<Utc>::MAX_UTC),
            page,
        )
        .await?;
    Ok(Json(trail))
}
