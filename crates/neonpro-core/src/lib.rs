//! Core vocabulary and error definitions for the NeonPro compliance core.
//!
//! This crate provides the types shared by every NeonPro crate: the
//! regulatory vocabulary (subject types, compliance dimensions, LGPD legal
//! bases, data classifications), the unified error enum and the clock
//! abstraction used wherever a timestamp is taken.
//!
//! # Main types
//!
//! - [`ComplianceError`]: Unified error enum for all compliance subsystems.
//! - [`ComplianceResult`]: Convenience alias for `Result<T, ComplianceError>`.
//! - [`SubjectType`] / [`Dimension`] / [`ComplianceLevel`]: Evaluation vocabulary.
//! - [`AuditAction`] / [`LegalBasis`] / [`DataClassification`]: Audit vocabulary.
//! - [`ConsentState`]: States of the LGPD consent lifecycle.
//! - [`Clock`]: Time source injected into recorders and services.

/// Time sources.
pub mod clock;
/// Regulatory vocabulary shared across crates.
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use types::{
    AuditAction, ComplianceLevel, ConsentState, DataClassification, Dimension, LegalBasis,
    SubjectType,
};

// --- Error types ---

/// Top-level error type for the compliance core.
///
/// Compliance findings (a missing document, an expired registration) are never
/// errors; they are reported as issues inside a rule result. Errors are either
/// caller mistakes or infrastructure failures.
#[derive(Debug, thiserror::Error)]
pub enum ComplianceError {
    /// A dimension was requested that the subject type is not evaluated on.
    #[error("dimension '{dimension}' is not evaluated for {subject_type} subjects")]
    InvalidDimension {
        /// Type of the subject under evaluation.
        subject_type: SubjectType,
        /// The dimension that was requested.
        dimension: Dimension,
    },

    /// The rule results handed to the aggregator do not match the dimension set.
    #[error(
        "incomplete evaluation for {subject_type} subject: missing [{}], unexpected [{}]",
        join_dimensions(.missing),
        join_dimensions(.unexpected)
    )]
    IncompleteEvaluation {
        /// Type of the subject under evaluation.
        subject_type: SubjectType,
        /// Required dimensions with no result.
        missing: Vec<Dimension>,
        /// Results for dimensions outside the required set, or duplicated ones.
        unexpected: Vec<Dimension>,
    },

    /// The audit store could not persist an entry.
    #[error("Audit write error: {0}")]
    AuditWrite(String),

    /// The audit store could not be read.
    #[error("Audit read error: {0}")]
    AuditRead(String),

    /// A consent transition not allowed by the lifecycle.
    #[error("invalid consent transition: {} -> {to}", state_label(.from))]
    InvalidConsentTransition {
        /// Current state of the latest consent cycle, `None` if there is none.
        from: Option<ConsentState>,
        /// Requested target state.
        to: ConsentState,
    },

    /// A looked-up record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed input supplied by the caller.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ComplianceError {
    /// True for errors caused by misuse of the API; these are never retried.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            ComplianceError::InvalidDimension { .. }
                | ComplianceError::IncompleteEvaluation { .. }
                | ComplianceError::InvalidConsentTransition { .. }
                | ComplianceError::InvalidInput(_)
        )
    }

    /// True when the audit store could not be written or read.
    pub fn is_persistence_error(&self) -> bool {
        matches!(
            self,
            ComplianceError::AuditWrite(_) | ComplianceError::AuditRead(_)
        )
    }

    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ComplianceError::InvalidDimension { .. } => "invalid_dimension",
            ComplianceError::IncompleteEvaluation { .. } => "incomplete_evaluation",
            ComplianceError::AuditWrite(_) => "audit_write",
            ComplianceError::AuditRead(_) => "audit_read",
            ComplianceError::InvalidConsentTransition { .. } => "invalid_consent_transition",
            ComplianceError::NotFound(_) => "not_found",
            ComplianceError::InvalidInput(_) => "invalid_input",
            ComplianceError::Config(_) => "config",
            ComplianceError::Json(_) => "json",
            ComplianceError::Io(_) => "io",
        }
    }
}

/// A convenience `Result` alias using [`ComplianceError`].
pub type ComplianceResult<T> = Result<T, ComplianceError>;

fn join_dimensions(dimensions: &[Dimension]) -> String {
    dimensions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn state_label(state: &Option<ConsentState>) -> String {
    match state {
        Some(s) => s.to_string(),
        None => "none".to_string(),
    }
}
