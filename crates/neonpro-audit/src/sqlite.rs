use crate::entry::{AuditEntry, AuditFilter};
use crate::store::AuditStore;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use neonpro_core::{ComplianceError, ComplianceResult};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS audit_entries (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    entry_id TEXT NOT NULL UNIQUE,
    actor_id TEXT NOT NULL,
    action TEXT NOT NULL,
    subject_id TEXT NOT NULL,
    legal_basis TEXT NOT NULL,
    data_classification TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    details TEXT NOT NULL,
    prev_hash TEXT,
    hash TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_subject_time ON audit_entries (subject_id, timestamp);
CREATE TRIGGER IF NOT EXISTS audit_entries_no_update BEFORE UPDATE ON audit_entries
BEGIN
    SELECT RAISE(ABORT, 'audit entries are append-only');
END;
CREATE TRIGGER IF NOT EXISTS audit_entries_no_delete BEFORE DELETE ON audit_entries
BEGIN
    SELECT RAISE(ABORT, 'audit entries are append-only');
END;
";

/// SQLite-backed audit store.
///
/// UPDATE and DELETE on the table are rejected by triggers, so the log stays
/// append-only even for clients that bypass this type.
pub struct SqliteAuditStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAuditStore {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> ComplianceResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(write_error)?;
        Self::init(conn)
    }

    /// A private in-memory database.
    pub fn in_memory() -> ComplianceResult<Self> {
        let conn = Connection::open_in_memory().map_err(write_error)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> ComplianceResult<Self> {
        conn.execute_batch(SCHEMA).map_err(write_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn blocking<T, F>(&self, op: F) -> ComplianceResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> ComplianceResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            op(&guard)
        })
        .await
        .map_err(|e| ComplianceError::AuditWrite(format!("audit store task failed: {e}")))?
    }
}

/// Row as stored, before enum and JSON columns are decoded.
struct RawRow {
    entry_id: String,
    actor_id: String,
    action: String,
    subject_id: String,
    legal_basis: String,
    data_classification: String,
    timestamp: String,
    details: String,
    prev_hash: Option<String>,
    hash: String,
}

impl RawRow {
    fn decode(self) -> ComplianceResult<AuditEntry> {
        let entry_id = Uuid::parse_str(&self.entry_id)
            .map_err(|e| ComplianceError::AuditRead(format!("bad entry id: {e}")))?;
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| ComplianceError::AuditRead(format!("bad timestamp: {e}")))?
            .with_timezone(&Utc);
        Ok(AuditEntry {
            entry_id,
            actor_id: self.actor_id,
            action: from_name(&self.action)?,
            subject_id: self.subject_id,
            legal_basis: from_name(&self.legal_basis)?,
            data_classification: from_name(&self.data_classification)?,
            timestamp,
            details: serde_json::from_str(&self.details)
                .map_err(|e| ComplianceError::AuditRead(format!("bad details: {e}")))?,
            prev_hash: self.prev_hash,
            hash: self.hash,
        })
    }
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn append(&self, entry: &AuditEntry) -> ComplianceResult<()> {
        let values = [
            entry.entry_id.to_string(),
            entry.actor_id.clone(),
            to_name(&entry.action)?,
            entry.subject_id.clone(),
            to_name(&entry.legal_basis)?,
            to_name(&entry.data_classification)?,
            sortable_timestamp(&entry.timestamp),
            serde_json::to_string(&entry.details)
                .map_err(|e| ComplianceError::AuditWrite(e.to_string()))?,
        ];
        let prev_hash = entry.prev_hash.clone();
        let hash = entry.hash.clone();

        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO audit_entries (entry_id, actor_id, action, subject_id, legal_basis,
                     data_classification, timestamp, details, prev_hash, hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    values[0], values[1], values[2], values[3], values[4], values[5], values[6],
                    values[7], prev_hash, hash
                ],
            )
            .map_err(write_error)?;
            Ok(())
        })
        .await
    }

    async fn scan(&self, filter: &AuditFilter) -> ComplianceResult<Vec<AuditEntry>> {
        let mut sql = String::from(
            "SELECT entry_id, actor_id, action, subject_id, legal_basis, data_classification,
                    timestamp, details, prev_hash, hash
             FROM audit_entries WHERE 1 = 1",
        );
        let mut args: Vec<String> = Vec::new();
        if let Some(subject_id) = &filter.subject_id {
            args.push(subject_id.clone());
            sql.push_str(&format!(" AND subject_id = ?{}", args.len()));
        }
        if let Some(from) = &filter.from {
            args.push(sortable_timestamp(from));
            sql.push_str(&format!(" AND timestamp >= ?{}", args.len()));
        }
        if let Some(to) = &filter.to {
            args.push(sortable_timestamp(to));
            sql.push_str(&format!(" AND timestamp <= ?{}", args.len()));
        }
        sql.push_str(" ORDER BY seq ASC");

        let rows = self
            .blocking(move |conn| {
                let mut stmt = conn.prepare(&sql).map_err(read_error)?;
                let rows = stmt
                    .query_map(params_from_iter(args.iter()), |row| {
                        Ok(RawRow {
                            entry_id: row.get(0)?,
                            actor_id: row.get(1)?,
                            action: row.get(2)?,
                            subject_id: row.get(3)?,
                            legal_basis: row.get(4)?,
                            data_classification: row.get(5)?,
                            timestamp: row.get(6)?,
                            details: row.get(7)?,
                            prev_hash: row.get(8)?,
                            hash: row.get(9)?,
                        })
                    })
                    .map_err(read_error)?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(read_error)?;
                Ok(rows)
            })
            .await?;

        rows.into_iter().map(RawRow::decode).collect()
    }

    async fn last_hash(&self) -> ComplianceResult<Option<String>> {
        self.blocking(|conn| {
            let mut stmt = conn
                .prepare("SELECT hash FROM audit_entries ORDER BY seq DESC LIMIT 1")
                .map_err(read_error)?;
            let mut rows = stmt.query([]).map_err(read_error)?;
            let last: Option<String> = match rows.next().map_err(read_error)? {
                Some(row) => Some(row.get(0).map_err(read_error)?),
                None => None,
            };
            Ok(last)
        })
        .await
    }
}

/// Fixed-width RFC 3339 so that text order equals time order.
// Text order matches time order only for four-digit years, so open-ended
// bounds such as `DateTime::MIN_UTC` are clamped.
fn sortable_timestamp(ts: &DateTime<Utc>) -> String {
    match ts.year() {
        y if y < 0 => "0000-01-01T00:00:00.000000000Z".to_string(),
        y if y > 9999 => "9999-12-31T23:59:59.999999999Z".to_string(),
        _ => ts.to_rfc3339_opts(SecondsFormat::Nanos, true),
    }
}

fn to_name<T: Serialize>(value: &T) -> ComplianceResult<String> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => Ok(s),
        Ok(other) => Err(ComplianceError::AuditWrite(format!(
            "expected a unit enum, got {other}"
        ))),
        Err(e) => Err(ComplianceError::AuditWrite(e.to_string())),
    }
}

fn from_name<T: DeserializeOwned>(name: &str) -> ComplianceResult<T> {
    serde_json::from_value(serde_json::Value::String(name.to_string()))
        .map_err(|e| ComplianceError::AuditRead(format!("unknown value '{name}': {e}")))
}

fn write_error(e: rusqlite::Error) -> ComplianceError {
    ComplianceError::AuditWrite(e.to_string())
}

fn read_error(e: rusqlite::Error) -> ComplianceError {
    ComplianceError::AuditRead(e.to_string())
}
