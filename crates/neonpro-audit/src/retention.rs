use crate::entry::AuditEntry;
use chrono::{DateTime, Months, Utc};
use neonpro_core::DataClassification;
use serde::{Deserialize, Serialize};

/// Category of record kept by the clinic platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordCategory {
    /// Patient medical record (prontuário).
    PatientRecord,
    /// Consent evidence.
    ConsentRecord,
    /// Audit trail entries.
    AuditLog,
    /// Operational logs.
    SystemLog,
}

/// How long a record must be kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetentionPolicy {
    /// Minimum retention in years.
    pub years: u32,
    /// Regulation or policy the period comes from.
    pub reference: &'static str,
}

/// Retention by record category.
pub fn policy_for_category(category: RecordCategory) -> RetentionPolicy {
    match category {
        RecordCategory::PatientRecord => RetentionPolicy {
            years: 20,
            reference: "CFM Resolução 1.821/2007",
        },
        RecordCategory::ConsentRecord => RetentionPolicy {
            years: 10,
            reference: "LGPD art. 16 / art. 8 §2",
        },
        RecordCategory::AuditLog => RetentionPolicy {
            years: 7,
            reference: "internal audit policy",
        },
        RecordCategory::SystemLog => RetentionPolicy {
            years: 2,
            reference: "internal operations policy",
        },
    }
}

/// Retention of audit evidence by the classification of the data it concerns.
pub fn policy_for_classification(classification: DataClassification) -> RetentionPolicy {
    match classification {
        DataClassification::Public | DataClassification::Regular => RetentionPolicy {
            years: 5,
            reference: "LGPD art. 16",
        },
        DataClassification::Sensitive => RetentionPolicy {
            years: 20,
            reference: "CFM Resolução 1.821/2007",
        },
        DataClassification::Critical => RetentionPolicy {
            years: 25,
            reference: "ANVISA RDC 67/2009 (tecnovigilância)",
        },
    }
}

/// Earliest instant at which `entry` may be purged by the external retention
/// process: the longer of the audit-log period and its classification period.
pub fn retain_until(entry: &AuditEntry) -> DateTime<Utc> {
    let years = policy_for_category(RecordCategory::AuditLog)
        .years
        .max(policy_for_classification(entry.data_classification).years);
    entry
        .timestamp
        .checked_add_months(Months::new(years * 12))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
