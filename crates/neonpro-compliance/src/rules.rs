//! Static rule tables: which dimensions apply to each subject type, how they
//! are weighted, and the ordered checks of every dimension with their issue
//! and remediation texts.

use crate::subject::ComplianceSubject;
use neonpro_audit::retention::policy_for_classification;
use neonpro_core::{ComplianceLevel, DataClassification, Dimension, LegalBasis, SubjectType};

/// Scores below this are `non_compliant`.
pub const NON_COMPLIANT_BELOW: u8 = 50;
/// Scores at or above this are `compliant`.
pub const COMPLIANT_FROM: u8 = 85;
/// Dimension weights are expressed in basis points of this scale (1.0).
pub const WEIGHT_SCALE: u32 = 10_000;

/// Level for a score on the 0-100 scale.
pub fn level_for_score(score: f64) -> ComplianceLevel {
    if score < f64::from(NON_COMPLIANT_BELOW) {
        ComplianceLevel::NonCompliant
    } else if score < f64::from(COMPLIANT_FROM) {
        ComplianceLevel::Partial
    } else {
        ComplianceLevel::Compliant
    }
}

/// A dimension evaluated for a subject type and its weight in the overall score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimensionWeight {
    /// The dimension.
    pub dimension: Dimension,
    /// Weight in basis points of [`WEIGHT_SCALE`].
    pub weight_bp: u32,
}

const fn dw(dimension: Dimension, weight_bp: u32) -> DimensionWeight {
    DimensionWeight {
        dimension,
        weight_bp,
    }
}

static DEVICE_DIMENSIONS: [DimensionWeight; 3] = [
    dw(Dimension::Safety, 5_000),
    dw(Dimension::Interoperability, 3_000),
    dw(Dimension::Terminology, 2_000),
];

static SOFTWARE_DIMENSIONS: [DimensionWeight; 4] = [
    dw(Dimension::Security, 4_000),
    dw(Dimension::Interoperability, 2_000),
    dw(Dimension::Accessibility, 2_000),
    dw(Dimension::Workflow, 2_000),
];

static CONSENT_DIMENSIONS: [DimensionWeight; 2] = [
    dw(Dimension::Consent, 6_000),
    dw(Dimension::Retention, 4_000),
];

static PROCESSING_DIMENSIONS: [DimensionWeight; 3] = [
    dw(Dimension::Consent, 4_000),
    dw(Dimension::Security, 3_500),
    dw(Dimension::Retention, 2_500),
];

/// Dimensions evaluated for `subject_type`, in report order, with weights.
pub fn dimension_table(subject_type: SubjectType) -> &'static [DimensionWeight] {
    match subject_type {
        SubjectType::Device => &DEVICE_DIMENSIONS,
        SubjectType::Software => &SOFTWARE_DIMENSIONS,
        SubjectType::Consent => &CONSENT_DIMENSIONS,
        SubjectType::ProcessingActivity => &PROCESSING_DIMENSIONS,
    }
}

/// Whether `dimension` is evaluated for `subject_type`.
pub fn is_applicable(subject_type: SubjectType, dimension: Dimension) -> bool {
    dimension_table(subject_type)
        .iter()
        .any(|w| w.dimension == dimension)
}

/// One deterministic check within a dimension.
pub struct Check {
    /// Stable identifier, e.g. `safety.clinical_evaluation`.
    pub id: &'static str,
    /// Points subtracted from 100 when the check fails.
    pub weight: u8,
    /// Finding reported when the check fails.
    pub issue: &'static str,
    /// Remediation recommended when the check fails.
    pub remediation: &'static str,
    passes: fn(&ComplianceSubject) -> bool,
}

impl Check {
    /// Run the check.
    pub fn passes(&self, subject: &ComplianceSubject) -> bool {
        (self.passes)(subject)
    }
}

impl std::fmt::Debug for Check {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Check")
            .field("id", &self.id)
            .field("weight", &self.weight)
            .finish_non_exhaustive()
    }
}

/// Ordered checks of `dimension`.
pub fn checks_for(dimension: Dimension) -> &'static [Check] {
    match dimension {
        Dimension::Safety => &SAFETY_CHECKS,
        Dimension::Interoperability => &INTEROPERABILITY_CHECKS,
        Dimension::Terminology => &TERMINOLOGY_CHECKS,
        Dimension::Accessibility => &ACCESSIBILITY_CHECKS,
        Dimension::Workflow => &WORKFLOW_CHECKS,
        Dimension::Security => &SECURITY_CHECKS,
        Dimension::Consent => &CONSENT_CHECKS,
        Dimension::Retention => &RETENTION_CHECKS,
    }
}

// --- Safety (ANVISA RDC 751/2022) ---

static SAFETY_CHECKS: [Check; 5] = [
    Check {
        id: "safety.risk_class",
        weight: 40,
        issue: "Device classification is not a valid ANVISA risk class (I to IV)",
        remediation: "Classify the device under ANVISA RDC 751/2022 risk classes I to IV",
        passes: |s| device_class(s).is_some(),
    },
    Check {
        id: "safety.risk_management",
        weight: 30,
        issue: "ISO 14971 risk-management file is missing",
        remediation: "Compile and approve an ISO 14971 risk-management file for the device",
        passes: |s| s.flag("riskManagementFile"),
    },
    Check {
        id: "safety.clinical_evaluation",
        weight: 30,
        issue: "Clinical evaluation is missing for a device above class I",
        remediation: "Perform and document a clinical evaluation of the device",
        passes: |s| !above_class_one(s) || s.flag("clinicalEvaluation"),
    },
    Check {
        id: "safety.anvisa_registration",
        weight: 25,
        issue: "ANVISA registration number is missing or malformed",
        remediation: "Register the device with ANVISA and record its 11-digit registration number",
        passes: |s| !above_class_one(s) || valid_registration(s.text("anvisaRegistration")),
    },
    Check {
        id: "safety.technovigilance",
        weight: 15,
        issue: "No technovigilance procedure for reporting adverse events",
        remediation: "Define a technovigilance procedure for notifying ANVISA of adverse events",
        passes: |s| s.flag("adverseEventProcedure"),
    },
];

// --- Interoperability ---

static INTEROPERABILITY_CHECKS: [Check; 3] = [
    Check {
        id: "interoperability.exchange_standard",
        weight: 40,
        issue: "No recognised health-data exchange standard is supported",
        remediation: "Support HL7 FHIR (RNDS profiles), HL7 v2, DICOM or openEHR for data exchange",
        passes: |s| {
            s.texts("interoperabilityStandard")
                .iter()
                .any(|t| one_of(t, &["HL7-FHIR", "FHIR", "HL7V2", "HL7-V2", "DICOM", "OPENEHR"]))
        },
    },
    Check {
        id: "interoperability.data_export",
        weight: 30,
        issue: "Patient data cannot be exported in a machine-readable format",
        remediation: "Provide machine-readable export of patient data for LGPD portability requests",
        passes: |s| s.flag("dataExport"),
    },
    Check {
        id: "interoperability.api_documentation",
        weight: 30,
        issue: "Integration interfaces are not documented",
        remediation: "Publish documentation for every integration interface",
        passes: |s| s.flag("apiDocumentation"),
    },
];

// --- Terminology ---

static TERMINOLOGY_CHECKS: [Check; 3] = [
    Check {
        id: "terminology.coding_system",
        weight: 50,
        issue: "No standard clinical coding system is used",
        remediation: "Code procedures and diagnoses with TUSS, CID-10, SNOMED CT or LOINC",
        passes: |s| {
            s.texts("codingSystem")
                .iter()
                .any(|t| one_of(t, &["TUSS", "CID-10", "ICD-10", "SNOMED-CT", "LOINC"]))
        },
    },
    Check {
        id: "terminology.portuguese_labeling",
        weight: 30,
        issue: "Labels and instructions are not available in Brazilian Portuguese",
        remediation: "Provide labelling and instructions in Brazilian Portuguese",
        passes: |s| s.flag("portugueseLabeling"),
    },
    Check {
        id: "terminology.instructions_for_use",
        weight: 20,
        issue: "Instructions for use are missing",
        remediation: "Publish instructions for use with the registered product name",
        passes: |s| s.flag("instructionsForUse"),
    },
];

// --- Accessibility (Lei Brasileira de Inclusão, art. 63) ---

static ACCESSIBILITY_CHECKS: [Check; 3] = [
    Check {
        id: "accessibility.wcag_level",
        weight: 50,
        issue: "Interface does not meet WCAG 2.1 level AA",
        remediation: "Bring the interface to WCAG 2.1 level AA",
        passes: |s| s.text("wcagLevel").is_some_and(|l| one_of(l, &["AA", "AAA"])),
    },
    Check {
        id: "accessibility.screen_reader",
        weight: 25,
        issue: "Interface is not usable with a screen reader",
        remediation: "Label controls and content for screen readers",
        passes: |s| s.flag("screenReaderSupport"),
    },
    Check {
        id: "accessibility.keyboard_navigation",
        weight: 25,
        issue: "Interface cannot be operated with the keyboard alone",
        remediation: "Make every function reachable through keyboard navigation",
        passes: |s| s.flag("keyboardNavigation"),
    },
];

// --- Workflow (CFM) ---

static WORKFLOW_CHECKS: [Check; 3] = [
    Check {
        id: "workflow.professional_registration",
        weight: 40,
        issue: "Practitioner CRM registration is not verified before clinical acts",
        remediation: "Verify the practitioner's CRM registration with the regional council",
        passes: |s| s.flag("professionalRegistrationCheck"),
    },
    Check {
        id: "workflow.digital_signature",
        weight: 30,
        issue: "Clinical documents are not signed with an ICP-Brasil certificate",
        remediation: "Sign prescriptions and records with ICP-Brasil certificates (CFM 2.299/2021)",
        passes: |s| s.flag("icpBrasilSignature"),
    },
    Check {
        id: "workflow.telemedicine_consent",
        weight: 30,
        issue: "Telemedicine sessions lack recorded patient consent",
        remediation: "Record patient consent for each telemedicine session (CFM 2.314/2022)",
        passes: |s| !s.flag("telemedicine") || s.flag("telemedicineConsent"),
    },
];

// --- Security (LGPD art. 46-49) ---

static SECURITY_CHECKS: [Check; 4] = [
    Check {
        id: "security.encryption_at_rest",
        weight: 30,
        issue: "Personal data is not encrypted at rest",
        remediation: "Encrypt stored personal data",
        passes: |s| s.flag("encryptionAtRest"),
    },
    Check {
        id: "security.encryption_in_transit",
        weight: 30,
        issue: "Personal data is not encrypted in transit",
        remediation: "Serve every interface over TLS 1.2 or later",
        passes: |s| s.flag("encryptionInTransit"),
    },
    Check {
        id: "security.access_control",
        weight: 25,
        issue: "No role-based access control over personal data",
        remediation: "Restrict access to personal data by professional role",
        passes: |s| s.flag("accessControl"),
    },
    Check {
        id: "security.incident_response",
        weight: 15,
        issue: "No incident response plan covering ANPD notification",
        remediation: "Adopt an incident response plan that includes notifying the ANPD",
        passes: |s| s.flag("incidentResponsePlan"),
    },
];

// --- Consent (LGPD art. 7, 8, 11) ---

static CONSENT_CHECKS: [Check; 5] = [
    Check {
        id: "consent.legal_basis",
        weight: 40,
        issue: "No valid LGPD legal basis is recorded",
        remediation: "Record the LGPD legal basis (art. 7 or art. 11) for the processing",
        passes: |s| legal_basis(s).is_some(),
    },
    Check {
        id: "consent.purpose",
        weight: 30,
        issue: "Processing purpose is not specified",
        remediation: "State a specific and explicit purpose for the processing (LGPD art. 6, I)",
        passes: |s| s.text("purpose").is_some(),
    },
    Check {
        id: "consent.sensitive_data_basis",
        weight: 30,
        issue: "Sensitive data is processed without an art. 11 basis or specific consent",
        remediation: "Obtain specific, highlighted consent or rely on an LGPD art. 11 basis",
        passes: sensitive_basis_ok,
    },
    Check {
        id: "consent.active",
        weight: 30,
        issue: "Processing relies on a consent that is not currently granted",
        remediation: "Collect a new consent before processing, or stop the processing",
        passes: |s| {
            legal_basis(s) != Some(LegalBasis::Consent)
                || (s
                    .text("consentStatus")
                    .is_some_and(|status| status.trim().eq_ignore_ascii_case("granted"))
                    && !s.flag("consentExpired"))
        },
    },
    Check {
        id: "consent.withdrawal_channel",
        weight: 20,
        issue: "No channel is offered for withdrawing consent",
        remediation: "Offer a free and easy way to withdraw consent (LGPD art. 8, par. 5)",
        passes: |s| s.flag("withdrawalChannel"),
    },
];

// --- Retention (LGPD art. 15-16) ---

static RETENTION_CHECKS: [Check; 3] = [
    Check {
        id: "retention.period_defined",
        weight: 40,
        issue: "No retention period is defined",
        remediation: "Define a retention period in days for the data",
        passes: |s| s.number("retentionDays").is_some_and(|d| d > 0.0),
    },
    Check {
        id: "retention.within_policy",
        weight: 30,
        issue: "Retention period exceeds the policy for the data classification",
        remediation: "Shorten retention to the maximum allowed for the data classification",
        passes: |s| {
            let max_days = f64::from(policy_for_classification(data_classification(s)).years) * 365.0;
            s.number("retentionDays").is_some_and(|d| d > 0.0 && d <= max_days)
        },
    },
    Check {
        id: "retention.disposal_procedure",
        weight: 30,
        issue: "No secure disposal procedure at the end of retention",
        remediation: "Delete or anonymise data securely at the end of retention (LGPD art. 16)",
        passes: |s| s.flag("disposalProcedure"),
    },
];

// --- helpers ---

fn one_of(value: &str, accepted: &[&str]) -> bool {
    let normalized = value.trim().to_ascii_uppercase().replace([' ', '_'], "-");
    accepted.iter().any(|a| *a == normalized)
}

/// ANVISA risk class (1-4) parsed from the classification, e.g. `III` or `Classe II`.
pub fn device_class(subject: &ComplianceSubject) -> Option<u8> {
    let upper = subject.classification.trim().to_ascii_uppercase();
    let roman = upper
        .strip_prefix("CLASSE")
        .or_else(|| upper.strip_prefix("CLASS"))
        .unwrap_or(&upper)
        .trim();
    match roman {
        "I" | "1" => Some(1),
        "II" | "2" => Some(2),
        "III" | "3" => Some(3),
        "IV" | "4" => Some(4),
        _ => None,
    }
}

fn above_class_one(subject: &ComplianceSubject) -> bool {
    // An unknown class is treated as high risk.
    device_class(subject).map_or(true, |c| c > 1)
}

fn valid_registration(number: Option<&str>) -> bool {
    number.is_some_and(|n| {
        let digits: Vec<char> = n.chars().filter(|c| !matches!(c, '.' | '/' | '-' | ' ')).collect();
        digits.len() == 11 && digits.iter().all(char::is_ascii_digit)
    })
}

fn legal_basis(subject: &ComplianceSubject) -> Option<LegalBasis> {
    let raw = subject.text("legalBasis")?;
    serde_json::from_value(serde_json::Value::String(raw.to_ascii_lowercase())).ok()
}

fn data_classification(subject: &ComplianceSubject) -> DataClassification {
    subject.classification.parse().unwrap_or_default()
}

fn sensitive_basis_ok(subject: &ComplianceSubject) -> bool {
    let sensitive =
        subject.flag("sensitiveData") || data_classification(subject).requires_redaction();
    if !sensitive {
        return true;
    }
    match legal_basis(subject) {
        Some(LegalBasis::Consent) => subject.flag("explicitConsent"),
        Some(basis) => basis.allows_sensitive_data(),
        None => false,
    }
}
