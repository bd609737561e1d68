use crate::evaluator::{evaluate_dimension, evaluate_subject, RuleResult};
use crate::persistence::JsonReportStore;
use crate::report::{aggregate, ComplianceReport};
use crate::subject::ComplianceSubject;
use neonpro_audit::{AuditDetails, AuditRecorder};
use neonpro_core::{AuditAction, ComplianceResult, DataClassification, Dimension, LegalBasis};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Who asks for an operation and under which legal basis; copied into the
/// audit entry the operation writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    /// Acting user or system.
    pub actor_id: String,
    /// LGPD basis of the processing.
    pub legal_basis: LegalBasis,
    /// Classification of the data the operation touches.
    #[serde(default)]
    pub data_classification: DataClassification,
}

impl AuditContext {
    /// Context for `actor_id` with the given basis and regular data.
    pub fn new(actor_id: impl Into<String>, legal_basis: LegalBasis) -> Self {
        Self {
            actor_id: actor_id.into(),
            legal_basis,
            data_classification: DataClassification::Regular,
        }
    }

    /// Builder: set the data classification.
    pub fn with_classification(mut self, classification: DataClassification) -> Self {
        self.data_classification = classification;
        self
    }
}

/// Audited evaluation and report generation.
///
/// Every successful call leaves exactly one audit entry. When the entry
/// cannot be written the call fails with `AuditWrite` and its result is
/// discarded.
pub struct ComplianceService {
    recorder: Arc<AuditRecorder>,
    reports: Option<Arc<JsonReportStore>>,
}

impl ComplianceService {
    /// Service without report persistence.
    pub fn new(recorder: Arc<AuditRecorder>) -> Self {
        Self {
            recorder,
            reports: None,
        }
    }

    /// Persist generated reports to `store`.
    pub fn with_report_store(mut self, store: Arc<JsonReportStore>) -> Self {
        self.reports = Some(store);
        self
    }

    /// The recorder every operation writes to.
    pub fn recorder(&self) -> &Arc<AuditRecorder> {
        &self.recorder
    }

    /// The report store, if reports are persisted.
    pub fn report_store(&self) -> Option<&Arc<JsonReportStore>> {
        self.reports.as_ref()
    }

    /// Evaluate one dimension and record an `evaluate` entry.
    pub async fn evaluate(
        &self,
        subject: &ComplianceSubject,
        dimension: Dimension,
        ctx: &AuditContext,
    ) -> ComplianceResult<RuleResult> {
        let result = evaluate_dimension(subject, dimension)?;
        let details = AuditDetails::new()
            .public("subject_type", subject.subject_type.to_string())
            .public("dimension", dimension.to_string())
            .public("level", result.level().to_string())
            .public("score", result.score())
            .public("issues", result.issues().len());
        self.recorder
            .record(
                AuditAction::Evaluate,
                &subject.subject_id,
                &ctx.actor_id,
                ctx.legal_basis,
                ctx.data_classification,
                details,
            )
            .await?;
        Ok(result)
    }

    /// Evaluate every dimension, aggregate at the recorder's current time,
    /// optionally persist the report and record a `report_generated` entry.
    pub async fn generate_report(
        &self,
        subject: &ComplianceSubject,
        ctx: &AuditContext,
    ) -> ComplianceResult<ComplianceReport> {
        let results = evaluate_subject(subject)?;
        let report = aggregate(subject, results, self.recorder.clock().now())?;

        // Readers only see the report once its audit entry exists.
        let staged = match &self.reports {
            Some(store) => Some(store.stage_report(&report).await?),
            None => None,
        };

        let dimensions: Vec<String> = report
            .dimension_results()
            .iter()
            .map(|r| format!("{}={}", r.dimension(), r.score()))
            .collect();
        let details = AuditDetails::new()
            .public("subject_type", subject.subject_type.to_string())
            .public("overall_level", report.overall_level().to_string())
            .public("overall_score", report.overall_score())
            .public("dimensions", dimensions)
            .public("next_review_at", report.next_review_at().to_rfc3339());

        let recorded = self
            .recorder
            .record(
                AuditAction::ReportGenerated,
                &subject.subject_id,
                &ctx.actor_id,
                ctx.legal_basis,
                ctx.data_classification,
                details,
            )
            .await;

        if let Err(e) = recorded {
            if let (Some(store), Some(staged)) = (&self.reports, staged) {
                let staging = staged.staging_path().to_path_buf();
                if let Err(cleanup) = store.discard(staged).await {
                    error!(
                        path = %staging.display(),
                        error = %cleanup,
                        "could not remove unaudited report"
                    );
                }
            }
            warn!(subject_id = %subject.subject_id, error = %e, "report discarded");
            return Err(e);
        }

        if let (Some(store), Some(staged)) = (&self.reports, staged) {
            if let Err(e) = store.publish(staged).await {
                error!(
                    subject_id = %subject.subject_id,
                    error = %e,
                    "audited report could not be published"
                );
                return Err(e);
            }
        }

        info!(
            subject_id = %subject.subject_id,
            level = %report.overall_level(),
            score = report.overall_score(),
            "compliance report generated"
        );
        Ok(report)
    }
}
