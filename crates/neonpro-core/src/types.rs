use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of entity a compliance evaluation is run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectType {
    /// A medical or aesthetic device registered with ANVISA.
    Device,
    /// Clinical software (SaMD or clinic management software).
    Software,
    /// An LGPD consent record.
    Consent,
    /// A personal-data processing activity.
    ProcessingActivity,
}

impl SubjectType {
    /// Every subject type, in declaration order.
    pub const ALL: [SubjectType; 4] = [
        SubjectType::Device,
        SubjectType::Software,
        SubjectType::Consent,
        SubjectType::ProcessingActivity,
    ];
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectType::Device => write!(f, "device"),
            SubjectType::Software => write!(f, "software"),
            SubjectType::Consent => write!(f, "consent"),
            SubjectType::ProcessingActivity => write!(f, "processing_activity"),
        }
    }
}

/// One axis of a compliance evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// Accessibility of patient- and staff-facing interfaces.
    Accessibility,
    /// Clinical coding and Portuguese labelling.
    Terminology,
    /// Professional workflow rules (CFM).
    Workflow,
    /// Health-data exchange standards.
    Interoperability,
    /// Device safety and ANVISA registration.
    Safety,
    /// LGPD lawful basis and consent quality.
    Consent,
    /// Data retention and disposal.
    Retention,
    /// Information security controls.
    Security,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dimension::Accessibility => "accessibility",
            Dimension::Terminology => "terminology",
            Dimension::Workflow => "workflow",
            Dimension::Interoperability => "interoperability",
            Dimension::Safety => "safety",
            Dimension::Consent => "consent",
            Dimension::Retention => "retention",
            Dimension::Security => "security",
        };
        f.write_str(name)
    }
}

/// Discrete compliance verdict, used per dimension and for whole reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceLevel {
    /// Meets the requirements.
    Compliant,
    /// Meets some requirements; remediation is needed.
    #[serde(alias = "partially_compliant")]
    Partial,
    /// Fails at least one critical requirement.
    NonCompliant,
}

impl ComplianceLevel {
    /// Ordering key: lower is more severe.
    pub fn severity_rank(self) -> u8 {
        match self {
            ComplianceLevel::NonCompliant => 0,
            ComplianceLevel::Partial => 1,
            ComplianceLevel::Compliant => 2,
        }
    }
}

impl fmt::Display for ComplianceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComplianceLevel::Compliant => write!(f, "compliant"),
            ComplianceLevel::Partial => write!(f, "partial"),
            ComplianceLevel::NonCompliant => write!(f, "non_compliant"),
        }
    }
}

/// Compliance-relevant action recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A single dimension was evaluated.
    Evaluate,
    /// A full compliance report was generated.
    ReportGenerated,
    /// A consent cycle was opened.
    ConsentRequested,
    /// The data subject granted consent.
    ConsentGranted,
    /// The data subject refused consent.
    ConsentDenied,
    /// The data subject withdrew a previously granted consent.
    ConsentWithdrawn,
    /// A data subject exercised an LGPD art. 18 right (access, erasure).
    RightsRequested,
    /// Personal data was read.
    DataAccessed,
    /// Personal data was erased on request.
    DataErased,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuditAction::Evaluate => "evaluate",
            AuditAction::ReportGenerated => "report_generated",
            AuditAction::ConsentRequested => "consent_requested",
            AuditAction::ConsentGranted => "consent_granted",
            AuditAction::ConsentDenied => "consent_denied",
            AuditAction::ConsentWithdrawn => "consent_withdrawn",
            AuditAction::RightsRequested => "rights_requested",
            AuditAction::DataAccessed => "data_accessed",
            AuditAction::DataErased => "data_erased",
        };
        f.write_str(name)
    }
}

/// Legal ground for processing personal data (LGPD arts. 7 and 11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegalBasis {
    /// Consent of the data subject.
    Consent,
    /// Compliance with a legal or regulatory obligation.
    LegalObligation,
    /// Execution of public policies.
    PublicPolicy,
    /// Studies by a research body.
    Research,
    /// Performance of a contract with the data subject.
    ContractPerformance,
    /// Regular exercise of rights in legal proceedings.
    RegularExerciseOfRights,
    /// Protection of the life or physical safety of the subject.
    LifeProtection,
    /// Health protection by health professionals or services.
    HealthProtection,
    /// Legitimate interest of the controller.
    LegitimateInterest,
    /// Credit protection.
    CreditProtection,
}

impl LegalBasis {
    /// LGPD article and item that establishes this basis.
    pub fn lgpd_reference(self) -> &'static str {
        match self {
            LegalBasis::Consent => "Art. 7, I",
            LegalBasis::LegalObligation => "Art. 7, II",
            LegalBasis::PublicPolicy => "Art. 7, III",
            LegalBasis::Research => "Art. 7, IV",
            LegalBasis::ContractPerformance => "Art. 7, V",
            LegalBasis::RegularExerciseOfRights => "Art. 7, VI",
            LegalBasis::LifeProtection => "Art. 7, VII",
            LegalBasis::HealthProtection => "Art. 7, VIII",
            LegalBasis::LegitimateInterest => "Art. 7, IX",
            LegalBasis::CreditProtection => "Art. 7, X",
        }
    }

    /// Whether the basis may ground processing of sensitive (health) data
    /// under LGPD art. 11. Legitimate interest and credit protection may not.
    pub fn allows_sensitive_data(self) -> bool {
        !matches!(
            self,
            LegalBasis::LegitimateInterest
                | LegalBasis::CreditProtection
                | LegalBasis::ContractPerformance
        )
    }
}

impl fmt::Display for LegalBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Reuse the serde name so logs and payloads agree.
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default();
        f.write_str(&name)
    }
}

/// Sensitivity of a piece of data. Ordered from least to most sensitive.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DataClassification {
    /// Freely publishable.
    Public,
    /// Ordinary personal or operational data.
    #[default]
    Regular,
    /// Sensitive personal data (LGPD art. 5, II), e.g. health data or CPF.
    Sensitive,
    /// Data whose exposure causes severe harm, e.g. medical records.
    Critical,
}

impl DataClassification {
    /// Values of this classification must never reach the audit store in clear.
    pub fn requires_redaction(self) -> bool {
        self >= DataClassification::Sensitive
    }
}

impl fmt::Display for DataClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataClassification::Public => write!(f, "public"),
            DataClassification::Regular => write!(f, "regular"),
            DataClassification::Sensitive => write!(f, "sensitive"),
            DataClassification::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for DataClassification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "public" => Ok(DataClassification::Public),
            "regular" => Ok(DataClassification::Regular),
            "sensitive" => Ok(DataClassification::Sensitive),
            "critical" => Ok(DataClassification::Critical),
            other => Err(format!("unknown data classification '{other}'")),
        }
    }
}

/// State of one LGPD consent cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentState {
    /// Consent was asked for; no answer yet.
    Requested,
    /// The data subject agreed. This is the active state.
    Granted,
    /// The data subject refused.
    Denied,
    /// A granted consent was withdrawn.
    Withdrawn,
}

impl ConsentState {
    /// Whether the cycle is closed and a new request may start.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConsentState::Denied | ConsentState::Withdrawn)
    }
}

impl fmt::Display for ConsentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsentState::Requested => write!(f, "requested"),
            ConsentState::Granted => write!(f, "granted"),
            ConsentState::Denied => write!(f, "denied"),
            ConsentState::Withdrawn => write!(f, "withdrawn"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_accepts_report_spelling() {
        let level: ComplianceLevel = serde_json::from_str("\"partially_compliant\"").unwrap();
        assert_eq!(level, ComplianceLevel::Partial);
        assert_eq!(serde_json::to_string(&level).unwrap(), "\"partial\"");
    }

    #[test]
    fn test_classification_ordering() {
        assert!(DataClassification::Critical > DataClassification::Sensitive);
        assert!(DataClassification::Sensitive.requires_redaction());
        assert!(DataClassification::Critical.requires_redaction());
        assert!(!DataClassification::Regular.requires_redaction());
        assert!(!DataClassification::Public.requires_redaction());
    }

    #[test]
    fn test_legal_basis_display_matches_serde() {
        assert_eq!(LegalBasis::HealthProtection.to_string(), "health_protection");
        assert_eq!(LegalBasis::Consent.lgpd_reference(), "Art. 7, I");
        assert!(!LegalBasis::LegitimateInterest.allows_sensitive_data());
    }

    #[test]
    fn test_subject_type_display() {
        assert_eq!(SubjectType::ProcessingActivity.to_string(), "processing_activity");
        assert_eq!(Dimension::Interoperability.to_string(), "interoperability");
    }
}
