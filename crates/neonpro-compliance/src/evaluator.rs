use crate::rules::{checks_for, dimension_table, is_applicable, level_for_score};
use crate::subject::ComplianceSubject;
use neonpro_core::{ComplianceError, ComplianceLevel, ComplianceResult, Dimension};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Outcome of evaluating one subject on one dimension.
///
/// The level is always the one implied by the score; results can only be
/// built through [`RuleResult::new`] or by deserializing a consistent record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RuleResultRecord")]
pub struct RuleResult {
    dimension: Dimension,
    level: ComplianceLevel,
    score: u8,
    issues: Vec<String>,
    recommendations: Vec<String>,
}

impl RuleResult {
    /// Build a result; the score is capped at 100 and the level derived from it.
    pub fn new(
        dimension: Dimension,
        score: u8,
        issues: Vec<String>,
        recommendations: Vec<String>,
    ) -> Self {
        let score = score.min(100);
        Self {
            dimension,
            level: level_for_score(f64::from(score)),
            score,
            issues,
            recommendations,
        }
    }

    /// Dimension that was evaluated.
    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    /// Level implied by the score.
    pub fn level(&self) -> ComplianceLevel {
        self.level
    }

    /// Score on the 0-100 scale.
    pub fn score(&self) -> u8 {
        self.score
    }

    /// Findings, in check order.
    pub fn issues(&self) -> &[String] {
        &self.issues
    }

    /// Remediations, in check order.
    pub fn recommendations(&self) -> &[String] {
        &self.recommendations
    }
}

#[derive(Deserialize)]
struct RuleResultRecord {
    dimension: Dimension,
    level: ComplianceLevel,
    score: u8,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    recommendations: Vec<String>,
}

impl TryFrom<RuleResultRecord> for RuleResult {
    type Error = String;

    fn try_from(record: RuleResultRecord) -> Result<Self, Self::Error> {
        if record.score > 100 {
            return Err(format!("score {} is above 100", record.score));
        }
        let result = RuleResult::new(
            record.dimension,
            record.score,
            record.issues,
            record.recommendations,
        );
        if result.level != record.level {
            return Err(format!(
                "level {} does not match score {} (expected {})",
                record.level, record.score, result.level
            ));
        }
        Ok(result)
    }
}

/// Evaluate `subject` on a single dimension.
///
/// Fails with [`ComplianceError::InvalidDimension`] when the dimension is not
/// evaluated for the subject's type. Missing attributes are findings, not errors.
pub fn evaluate_dimension(
    subject: &ComplianceSubject,
    dimension: Dimension,
) -> ComplianceResult<RuleResult> {
    if !is_applicable(subject.subject_type, dimension) {
        return Err(ComplianceError::InvalidDimension {
            subject_type: subject.subject_type,
            dimension,
        });
    }

    let mut score: u8 = 100;
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();
    for check in checks_for(dimension) {
        if check.passes(subject) {
            continue;
        }
        score = score.saturating_sub(check.weight);
        issues.push(check.issue.to_string());
        recommendations.push(check.remediation.to_string());
    }

    let result = RuleResult::new(dimension, score, issues, recommendations);
    debug!(
        subject_id = %subject.subject_id,
        dimension = %dimension,
        score = result.score,
        level = %result.level,
        "dimension evaluated"
    );
    Ok(result)
}

/// Evaluate every dimension of the subject's type, in report order.
pub fn evaluate_subject(subject: &ComplianceSubject) -> ComplianceResult<Vec<RuleResult>> {
    dimension_table(subject.subject_type)
        .iter()
        .map(|w| evaluate_dimension(subject, w.dimension))
        .collect()
}
