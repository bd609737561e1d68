use crate::entry::{AuditEntry, AuditFilter};
use async_trait::async_trait;
use neonpro_core::{ComplianceError, ComplianceResult};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, warn};

/// Append-only persistence for audit entries.
///
/// The trait has no update or delete operation: once `append`
/// returns `Ok`, the entry is part of the log for its whole retention period.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Durably append one entry. Fails with [`ComplianceError::AuditWrite`].
    async fn append(&self, entry: &AuditEntry) -> ComplianceResult<()>;

    /// Entries matching `filter`, in append order.
    async fn scan(&self, filter: &AuditFilter) -> ComplianceResult<Vec<AuditEntry>>;

    /// Hash of the most recently appended entry.
    async fn last_hash(&self) -> ComplianceResult<Option<String>>;
}

/// In-memory audit store for tests and local development.
pub struct MemoryAuditStore {
    entries: RwLock<Vec<AuditEntry>>,
    unavailable: AtomicBool,
}

impl MemoryAuditStore {
    /// An empty store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate an outage: while set, every append fails.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// True when nothing has been appended.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for MemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, entry: &AuditEntry) -> ComplianceResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ComplianceError::AuditWrite(
                "memory audit store is unavailable".to_string(),
            ));
        }
        self.entries.write().await.push(entry.clone());
        Ok(())
    }

    async fn scan(&self, filter: &AuditFilter) -> ComplianceResult<Vec<AuditEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.iter().filter(|e| filter.matches(e)).cloned().collect())
    }

    async fn last_hash(&self) -> ComplianceResult<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries.last().map(|e| e.hash.clone()))
    }
}

/// Audit store that appends one JSON line per entry to a file on disk.
///
/// An entry is part of the log once its line, newline included, has been
/// synced. A line without its newline is a write that never completed: readers
/// ignore it and the next append cuts it off before writing.
pub struct JsonlAuditStore {
    path: PathBuf,
    // `true` once the file is known to end on a complete line.
    write_lock: Mutex<bool>,
}

impl JsonlAuditStore {
    /// Open (or prepare to create) the log at `path`, creating parent directories.
    pub async fn new(path: impl Into<PathBuf>) -> ComplianceResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(false),
        })
    }

    /// Location of the log file.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    async fn read_all(&self) -> ComplianceResult<Vec<AuditEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ComplianceError::AuditRead(format!("Failed to read audit log: {e}")))?;

        let complete = match data.rfind('\n') {
            Some(last) => &data[..=last],
            None => "",
        };
        if complete.len() < data.len() {
            warn!(
                path = %self.path.display(),
                bytes = data.len() - complete.len(),
                "ignoring unterminated audit line"
            );
        }

        let mut entries = Vec::new();
        for (lineno, line) in complete.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: AuditEntry = serde_json::from_str(line).map_err(|e| {
                ComplianceError::AuditRead(format!(
                    "Invalid audit entry at line {}: {e}",
                    lineno + 1
                ))
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Cut an unterminated last line left by an interrupted write.
    async fn repair_tail(&self) -> ComplianceResult<()> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(ComplianceError::AuditWrite(format!(
                    "Failed to read audit log: {e}"
                )))
            }
        };
        if data.is_empty() || data.ends_with(b"\n") {
            return Ok(());
        }

        let keep = data.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&self.path)
            .await
            .map_err(|e| ComplianceError::AuditWrite(format!("Failed to open audit log: {e}")))?;
        file.set_len(keep as u64)
            .await
            .map_err(|e| ComplianceError::AuditWrite(format!("Failed to truncate audit log: {e}")))?;
        file.sync_data()
            .await
            .map_err(|e| ComplianceError::AuditWrite(format!("Failed to sync audit log: {e}")))?;
        warn!(
            path = %self.path.display(),
            bytes = data.len() - keep,
            "discarded unterminated audit line"
        );
        Ok(())
    }
}

#[async_trait]
impl AuditStore for JsonlAuditStore {
    async fn append(&self, entry: &AuditEntry) -> ComplianceResult<()> {
        let mut line = serde_json::to_string(entry)
            .map_err(|e| ComplianceError::AuditWrite(format!("Failed to serialize entry: {e}")))?;
        line.push('\n');

        let mut tail_clean = self.write_lock.lock().await;
        if !*tail_clean {
            self.repair_tail().await?;
            *tail_clean = true;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| ComplianceError::AuditWrite(format!("Failed to open audit log: {e}")))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| ComplianceError::AuditWrite(format!("Failed to stat audit log: {e}")))?
            .len();

        let written = async {
            file.write_all(line.as_bytes())
                .await
                .map_err(|e| ComplianceError::AuditWrite(format!("Failed to write entry: {e}")))?;
            file.sync_data()
                .await
                .map_err(|e| ComplianceError::AuditWrite(format!("Failed to sync audit log: {e}")))
        }
        .await;

        if let Err(e) = written {
            // Drop whatever part of the line reached the file.
            if let Err(rollback) = file.set_len(len).await {
                *tail_clean = false;
                error!(
                    path = %self.path.display(),
                    error = %rollback,
                    "could not roll back partial audit line"
                );
            }
            return Err(e);
        }
        Ok(())
    }

    async fn scan(&self, filter: &AuditFilter) -> ComplianceResult<Vec<AuditEntry>> {
        let entries = self.read_all().await?;
        Ok(entries.into_iter().filter(|e| filter.matches(e)).collect())
    }

    async fn last_hash(&self) -> ComplianceResult<Option<String>> {
        let entries = self.read_all().await?;
        Ok(entries.last().map(|e| e.hash.clone()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::integrity::entry_digest;
    use chrono::Utc;
    use neonpro_core::{AuditAction, DataClassification, LegalBasis};
    use uuid::Uuid;

    fn entry(subject: &str) -> AuditEntry {
        let mut e = AuditEntry {
            entry_id: Uuid::new_v4(),
            actor_id: "system".to_string(),
            action: AuditAction::Evaluate,
            subject_id: subject.to_string(),
            legal_basis: LegalBasis::LegalObligation,
            data_classification: DataClassification::Regular,
            timestamp: Utc::now(),
            details: Default::default(),
            prev_hash: None,
            hash: String::new(),
        };
        e.hash = entry_digest(&e);
        e
    }

    #[tokio::test]
    async fn test_memory_store_append_and_scan() {
        let store = MemoryAuditStore::new();
        store.append(&entry("dev-1")).await.unwrap();
        store.append(&entry("dev-2")).await.unwrap();

        let filter = AuditFilter {
            subject_id: Some("dev-1".to_string()),
            ..Default::default()
        };
        let found = store.scan(&filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_memory_store_outage() {
        let store = MemoryAuditStore::new();
        store.set_unavailable(true);
        let err = store.append(&entry("dev-1")).await.unwrap_err();
        assert!(err.is_persistence_error());
        assert!(store.is_empty().await);

        store.set_unavailable(false);
        store.append(&entry("dev-1")).await.unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_jsonl_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit").join("audit.jsonl");

        let first = entry("consent-1");
        {
            let store = JsonlAuditStore::new(&path).await.unwrap();
            store.append(&first).await.unwrap();
        }

        let store = JsonlAuditStore::new(&path).await.unwrap();
        let all = store.scan(&AuditFilter::default()).await.unwrap();
        assert_eq!(all, vec![first.clone()]);
        assert_eq!(store.last_hash().await.unwrap(), Some(first.hash));
    }

    #[tokio::test]
    async fn test_jsonl_store_empty_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlAuditStore::new(dir.path().join("none.jsonl")).await.unwrap();
        assert!(store.scan(&AuditFilter::default()).await.unwrap().is_empty());
        assert_eq!(store.last_hash().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_jsonl_store_drops_torn_tail_before_next_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let first = entry("dev-1");
        JsonlAuditStore::new(&path)
            .await
            .unwrap()
            .append(&first)
            .await
            .unwrap();

        // Interrupted write: half a line, no newline.
        let mut raw = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        std::io::Write::write_all(&mut raw, br#"{"entry_id":"3f2a9c"#).unwrap();
        drop(raw);

        let store = JsonlAuditStore::new(&path).await.unwrap();
        assert_eq!(store.scan(&AuditFilter::default()).await.unwrap(), vec![first.clone()]);
        assert_eq!(store.last_hash().await.unwrap(), Some(first.hash.clone()));

        let second = entry("dev-2");
        store.append(&second).await.unwrap();
        let all = store.scan(&AuditFilter::default()).await.unwrap();
        assert_eq!(all, vec![first, second]);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("3f2a9c"));
        assert!(content.ends_with('\n'));
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_jsonl_store_rejects_corrupt_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        tokio::fs::write(&path, "{not json}\n").await.unwrap();
        let store = JsonlAuditStore::new(&path).await.unwrap();
        let err = store.scan(&AuditFilter::default()).await.unwrap_err();
        assert_eq!(err.kind(), "audit_read");
    }
}
