use crate::report::ComplianceReport;
use neonpro_core::{ComplianceError, ComplianceResult};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

const STAGING_SUFFIX: &str = ".pending";

/// A report written to disk but not yet visible to readers.
#[derive(Debug)]
pub struct StagedReport {
    staging: PathBuf,
    target: PathBuf,
}

impl StagedReport {
    /// Where the report is until it is published.
    pub fn staging_path(&self) -> &Path {
        &self.staging
    }

    /// Where the report will be once published.
    pub fn target_path(&self) -> &Path {
        &self.target
    }
}

/// JSON-file persistence for compliance reports.
///
/// One pretty-printed file per report, named
/// `<subject-slug>_<evaluated-at>_<suffix>.json` so names sort by time within a subject.
pub struct JsonReportStore {
    base_dir: PathBuf,
}

impl JsonReportStore {
    /// Store rooted at `base_dir`; the directory is created on first save.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Directory the reports are written to.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Save a compliance report as a JSON file.
    /// Returns the path where the report was written.
    pub async fn save_report(&self, report: &ComplianceReport) -> ComplianceResult<PathBuf> {
        let staged = self.stage_report(report).await?;
        self.publish(staged).await
    }

    /// Write a report under a staging name that listing and
    /// [`load_latest`](Self::load_latest) never see.
    ///
    /// The report becomes visible with [`publish`](Self::publish) or is
    /// dropped with [`discard`](Self::discard).
    pub async fn stage_report(&self, report: &ComplianceReport) -> ComplianceResult<StagedReport> {
        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(ComplianceError::Io)?;

        let timestamp = report.evaluated_at().format("%Y%m%dT%H%M%S%3fZ");
        let suffix = Uuid::new_v4().simple().to_string();
        let filename = format!(
            "{}_{}_{}.json",
            subject_slug(report.subject_id()),
            timestamp,
            &suffix[..8]
        );
        let target = self.base_dir.join(&filename);
        let staging = self.base_dir.join(format!("{filename}{STAGING_SUFFIX}"));

        let json = serde_json::to_string_pretty(report)?;
        tokio::fs::write(&staging, json)
            .await
            .map_err(ComplianceError::Io)?;

        debug!(path = %staging.display(), subject_id = report.subject_id(), "report staged");
        Ok(StagedReport { staging, target })
    }

    /// Move a staged report to its final name. Returns that path.
    pub async fn publish(&self, staged: StagedReport) -> ComplianceResult<PathBuf> {
        tokio::fs::rename(&staged.staging, &staged.target)
            .await
            .map_err(ComplianceError::Io)?;
        debug!(path = %staged.target.display(), "report saved");
        Ok(staged.target)
    }

    /// Delete a staged report that must not be published.
    pub async fn discard(&self, staged: StagedReport) -> ComplianceResult<()> {
        self.remove_report(&staged.staging).await
    }

    /// Delete staged reports left behind by a process that stopped before
    /// publishing them. Returns how many were removed.
    pub async fn clear_staged(&self) -> ComplianceResult<usize> {
        if !self.base_dir.exists() {
            return Ok(0);
        }
        let mut dir = tokio::fs::read_dir(&self.base_dir)
            .await
            .map_err(ComplianceError::Io)?;
        let mut removed = 0;
        while let Some(entry) = dir.next_entry().await.map_err(ComplianceError::Io)? {
            let path = entry.path();
            let staged = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(STAGING_SUFFIX));
            if staged {
                self.remove_report(&path).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            warn!(removed, dir = %self.base_dir.display(), "removed unpublished reports");
        }
        Ok(removed)
    }

    /// Delete a report written by [`save_report`](Self::save_report).
    pub async fn remove_report(&self, path: &Path) -> ComplianceResult<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ComplianceError::Io(e)),
        }
    }

    /// Load the most recent report for a subject.
    pub async fn load_latest(&self, subject_id: &str) -> ComplianceResult<Option<ComplianceReport>> {
        let prefix = format!("{}_", subject_slug(subject_id));
        let reports = self.list_reports_for(&prefix).await?;

        // Different ids can share a slug, so check the id inside the file.
        for path in reports.iter().rev() {
            let content = tokio::fs::read_to_string(path)
                .await
                .map_err(ComplianceError::Io)?;
            let report: ComplianceReport = match serde_json::from_str(&content) {
                Ok(report) => report,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable report");
                    continue;
                }
            };
            if report.subject_id() == subject_id {
                return Ok(Some(report));
            }
        }
        Ok(None)
    }

    /// List all report files, sorted by name (ascending = oldest first within a subject).
    pub async fn list_reports(&self) -> ComplianceResult<Vec<PathBuf>> {
        self.list_reports_for("").await
    }

    async fn list_reports_for(&self, prefix: &str) -> ComplianceResult<Vec<PathBuf>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.base_dir)
            .await
            .map_err(ComplianceError::Io)?;

        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.ends_with(".json") && (prefix.is_empty() || name.starts_with(prefix)) {
                    entries.push(path);
                }
            }
        }

        entries.sort();
        Ok(entries)
    }
}

fn subject_slug(subject_id: &str) -> String {
    let slug: String = subject_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    if slug.is_empty() {
        "subject".to_string()
    } else {
        slug
    }
}
