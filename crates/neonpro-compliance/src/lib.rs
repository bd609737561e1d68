//! Compliance evaluation for the NeonPro aesthetic-clinic platform.
//!
//! Subjects (devices, clinical software, consents and processing activities)
//! are checked against Brazilian regulation (ANVISA, LGPD, CFM) one dimension
//! at a time. Per-dimension results are combined into a weighted report, and
//! consent cycles and data subject requests are tracked through audited
//! state machines that can be rebuilt from the audit trail.
//!
//! # Main types
//!
//! - [`ComplianceSubject`]: The entity under evaluation.
//! - [`evaluate_dimension`] / [`RuleResult`]: One dimension, deterministic checks.
//! - [`aggregate`] / [`ComplianceReport`]: Weighted multi-dimension report.
//! - [`ComplianceService`]: Evaluation and reports with audit entries.
//! - [`ConsentManager`]: LGPD consent lifecycle.
//! - [`DataRightsManager`]: LGPD access and erasure requests.
//! - [`JsonReportStore`]: Report persistence to JSON files.

/// Consent lifecycle.
pub mod consent;
/// Rule evaluation.
pub mod evaluator;
/// Report persistence to JSON files.
pub mod persistence;
/// Report aggregation.
pub mod report;
/// Data subject requests.
pub mod rights;
/// Static rule and weight tables.
pub mod rules;
/// Audited evaluation service.
pub mod service;
/// Evaluation subjects.
pub mod subject;

pub use consent::{ConsentManager, ConsentRecord, ConsentTransition};
pub use evaluator::{evaluate_dimension, evaluate_subject, RuleResult};
pub use persistence::{JsonReportStore, StagedReport};
pub use report::{aggregate, ComplianceReport};
pub use rights::{
    DataRightsManager, DataSubjectRequest, RightsRequestKind, RightsRequestStatus, RESPONSE_DAYS,
};
pub use rules::{dimension_table, level_for_score, DimensionWeight};
pub use service::{AuditContext, ComplianceService};
pub use subject::ComplianceSubject;
