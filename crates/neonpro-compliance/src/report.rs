use crate::evaluator::RuleResult;
use crate::rules::{dimension_table, level_for_score, WEIGHT_SCALE};
use crate::subject::ComplianceSubject;
use chrono::{DateTime, Duration, Utc};
use neonpro_core::{ComplianceError, ComplianceLevel, ComplianceResult, Dimension, SubjectType};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Days until the next review of a compliant subject.
pub const REVIEW_DAYS_COMPLIANT: i64 = 90;
/// Days until the next review of any other subject.
pub const REVIEW_DAYS_OTHERWISE: i64 = 30;

/// Aggregated compliance report for one subject.
///
/// Built by [`aggregate`]; deserializing re-runs the aggregation so a stored
/// report cannot carry a level or score that contradicts its dimension results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ReportRecord")]
pub struct ComplianceReport {
    subject_id: String,
    subject_type: SubjectType,
    overall_level: ComplianceLevel,
    overall_score: f64,
    dimension_results: Vec<RuleResult>,
    recommendations: Vec<String>,
    evaluated_at: DateTime<Utc>,
    next_review_at: DateTime<Utc>,
}

impl ComplianceReport {
    /// Subject the report is about.
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// Type of the subject.
    pub fn subject_type(&self) -> SubjectType {
        self.subject_type
    }

    /// Overall verdict.
    pub fn overall_level(&self) -> ComplianceLevel {
        self.overall_level
    }

    /// Weighted score on the 0-100 scale.
    pub fn overall_score(&self) -> f64 {
        self.overall_score
    }

    /// One result per dimension, in dimension-table order.
    pub fn dimension_results(&self) -> &[RuleResult] {
        &self.dimension_results
    }

    /// Deduplicated remediations, most severe dimensions first.
    pub fn recommendations(&self) -> &[String] {
        &self.recommendations
    }

    /// When the evaluation ran.
    pub fn evaluated_at(&self) -> DateTime<Utc> {
        self.evaluated_at
    }

    /// When the subject should be evaluated again.
    pub fn next_review_at(&self) -> DateTime<Utc> {
        self.next_review_at
    }

    /// Dimensions rated non-compliant.
    pub fn critical_dimensions(&self) -> Vec<Dimension> {
        self.dimension_results
            .iter()
            .filter(|r| r.level() == ComplianceLevel::NonCompliant)
            .map(RuleResult::dimension)
            .collect()
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        let compliant = self
            .dimension_results
            .iter()
            .filter(|r| r.level() == ComplianceLevel::Compliant)
            .count();
        format!(
            "{} {}: {} ({:.1}), {}/{} dimensions compliant",
            self.subject_type,
            self.subject_id,
            self.overall_level,
            self.overall_score,
            compliant,
            self.dimension_results.len()
        )
    }
}

#[derive(Deserialize)]
struct ReportRecord {
    subject_id: String,
    subject_type: SubjectType,
    overall_level: ComplianceLevel,
    overall_score: f64,
    dimension_results: Vec<RuleResult>,
    evaluated_at: DateTime<Utc>,
}

impl TryFrom<ReportRecord> for ComplianceReport {
    type Error = String;

    fn try_from(record: ReportRecord) -> Result<Self, Self::Error> {
        let report = build(
            record.subject_id,
            record.subject_type,
            record.dimension_results,
            record.evaluated_at,
        )
        .map_err(|e| e.to_string())?;
        if report.overall_level != record.overall_level
            || (report.overall_score - record.overall_score).abs() > 1e-9
        {
            return Err(format!(
                "stored verdict {} ({}) does not match dimension results: {} ({})",
                record.overall_level,
                record.overall_score,
                report.overall_level,
                report.overall_score
            ));
        }
        Ok(report)
    }
}

/// Combine per-dimension results into a report.
///
/// `results` must hold exactly one result for every dimension of the subject's
/// type, in any order. Any non-compliant dimension makes the whole report
/// non-compliant regardless of the weighted score.
pub fn aggregate(
    subject: &ComplianceSubject,
    results: Vec<RuleResult>,
    evaluated_at: DateTime<Utc>,
) -> ComplianceResult<ComplianceReport> {
    build(
        subject.subject_id.clone(),
        subject.subject_type,
        results,
        evaluated_at,
    )
}

fn build(
    subject_id: String,
    subject_type: SubjectType,
    results: Vec<RuleResult>,
    evaluated_at: DateTime<Utc>,
) -> ComplianceResult<ComplianceReport> {
    let table = dimension_table(subject_type);

    let mut slots: Vec<Option<RuleResult>> = vec![None; table.len()];
    let mut unexpected = Vec::new();
    for result in results {
        match table.iter().position(|w| w.dimension == result.dimension()) {
            Some(i) if slots[i].is_none() => slots[i] = Some(result),
            _ => unexpected.push(result.dimension()),
        }
    }
    let missing: Vec<Dimension> = table
        .iter()
        .zip(&slots)
        .filter(|(_, slot)| slot.is_none())
        .map(|(w, _)| w.dimension)
        .collect();
    if !missing.is_empty() || !unexpected.is_empty() {
        return Err(ComplianceError::IncompleteEvaluation {
            subject_type,
            missing,
            unexpected,
        });
    }
    let dimension_results: Vec<RuleResult> = slots.into_iter().flatten().collect();

    let weighted: u32 = table
        .iter()
        .zip(&dimension_results)
        .map(|(w, r)| u32::from(r.score()) * w.weight_bp)
        .sum();
    let overall_score = f64::from(weighted) / f64::from(WEIGHT_SCALE);

    let overall_level = if dimension_results
        .iter()
        .any(|r| r.level() == ComplianceLevel::NonCompliant)
    {
        ComplianceLevel::NonCompliant
    } else {
        level_for_score(overall_score)
    };

    let mut ranked: Vec<(u8, &String)> = dimension_results
        .iter()
        .flat_map(|r| {
            let rank = r.level().severity_rank();
            r.recommendations().iter().map(move |rec| (rank, rec))
        })
        .collect();
    ranked.sort_by_key(|(rank, _)| *rank);
    let mut seen = HashSet::new();
    let recommendations: Vec<String> = ranked
        .into_iter()
        .filter(|&(_, rec)| seen.insert(rec.as_str()))
        .map(|(_, rec)| rec.clone())
        .collect();

    let review_days = if overall_level == ComplianceLevel::Compliant {
        REVIEW_DAYS_COMPLIANT
    } else {
        REVIEW_DAYS_OTHERWISE
    };

    Ok(ComplianceReport {
        subject_id,
        subject_type,
        overall_level,
        overall_score,
        dimension_results,
        recommendations,
        evaluated_at,
        next_review_at: evaluated_at + Duration::days(review_days),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn device() -> ComplianceSubject {
        ComplianceSubject::new("dev-1", SubjectType::Device, "III")
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn result(dimension: Dimension, score: u8, recs: &[&str]) -> RuleResult {
        RuleResult::new(
            dimension,
            score,
            recs.iter().map(|r| format!("issue for {r}")).collect(),
            recs.iter().map(|r| (*r).to_string()).collect(),
        )
    }

    #[test]
    fn test_non_compliant_dimension_dominates_average() {
        let report = aggregate(
            &device(),
            vec![
                result(Dimension::Safety, 40, &["fix safety"]),
                result(Dimension::Interoperability, 95, &[]),
                result(Dimension::Terminology, 90, &[]),
            ],
            at(),
        )
        .unwrap();
        assert!((report.overall_score() - 66.5).abs() < 1e-9);
        assert_eq!(report.overall_level(), ComplianceLevel::NonCompliant);
        assert_eq!(report.critical_dimensions(), vec![Dimension::Safety]);
        assert_eq!(report.next_review_at(), at() + Duration::days(30));
    }

    #[test]
    fn test_compliant_report_reviews_in_ninety_days() {
        let report = aggregate(
            &device(),
            vec![
                result(Dimension::Terminology, 90, &[]),
                result(Dimension::Safety, 100, &[]),
                result(Dimension::Interoperability, 85, &[]),
            ],
            at(),
        )
        .unwrap();
        assert!((report.overall_score() - 93.5).abs() < 1e-9);
        assert_eq!(report.overall_level(), ComplianceLevel::Compliant);
        assert_eq!(report.next_review_at(), at() + Duration::days(90));
        let dims: Vec<_> = report
            .dimension_results()
            .iter()
            .map(RuleResult::dimension)
            .collect();
        assert_eq!(
            dims,
            vec![
                Dimension::Safety,
                Dimension::Interoperability,
                Dimension::Terminology
            ]
        );
    }

    #[test]
    fn test_missing_and_duplicate_dimensions_rejected() {
        let err = aggregate(
            &device(),
            vec![
                result(Dimension::Safety, 100, &[]),
                result(Dimension::Safety, 100, &[]),
                result(Dimension::Security, 100, &[]),
            ],
            at(),
        )
        .unwrap_err();
        match err {
            ComplianceError::IncompleteEvaluation {
                missing,
                unexpected,
                ..
            } => {
                assert_eq!(
                    missing,
                    vec![Dimension::Interoperability, Dimension::Terminology]
                );
                assert_eq!(unexpected, vec![Dimension::Safety, Dimension::Security]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_recommendations_ordered_by_severity_and_deduplicated() {
        let report = aggregate(
            &device(),
            vec![
                result(Dimension::Safety, 70, &["document", "safety partial"]),
                result(Dimension::Interoperability, 30, &["interop", "document"]),
                result(Dimension::Terminology, 45, &["terms"]),
            ],
            at(),
        )
        .unwrap();
        assert_eq!(
            report.recommendations(),
            &["interop", "document", "terms", "safety partial"]
        );
    }

    #[test]
    fn test_serde_roundtrip_and_tamper_detection() {
        let report = aggregate(
            &device(),
            vec![
                result(Dimension::Safety, 70, &["a"]),
                result(Dimension::Interoperability, 100, &[]),
                result(Dimension::Terminology, 100, &[]),
            ],
            at(),
        )
        .unwrap();
        let json = serde_json::to_value(&report).unwrap();
        let back: ComplianceReport = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(back, report);

        let mut tampered = json;
        tampered["overall_level"] = serde_json::json!("compliant");
        assert!(serde_json::from_value::<ComplianceReport>(tampered).is_err());
    }

    #[test]
    fn test_summary_mentions_level() {
        let report = aggregate(
            &device(),
            vec![
                result(Dimension::Safety, 100, &[]),
                result(Dimension::Interoperability, 100, &[]),
                result(Dimension::Terminology, 100, &[]),
            ],
            at(),
        )
        .unwrap();
        assert_eq!(
            report.summary(),
            "device dev-1: compliant (100.0), 3/3 dimensions compliant"
        );
    }
}
