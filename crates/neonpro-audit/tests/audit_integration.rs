#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for the neonpro-audit crate.
//!
//! Covers redaction across every backend, the append-only property, hash
//! chain continuity across process restarts, and retention dates.

use chrono::{Duration, TimeZone, Utc};
use neonpro_audit::*;
use neonpro_core::*;
use std::sync::Arc;

fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2025, 4, 10, 14, 0, 0).unwrap(),
    ))
}

fn window() -> (chrono::DateTime<Utc>, chrono::DateTime<Utc>) {
    (
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap(),
    )
}

async fn record_access(rec: &AuditRecorder, subject: &str, cpf: &str) -> AuditEntry {
    rec.record(
        AuditAction::DataAccessed,
        subject,
        "dr-carla",
        LegalBasis::HealthProtection,
        DataClassification::Sensitive,
        AuditDetails::new()
            .sensitive("patient_document", cpf)
            .critical("clinical_note", "alergia a lidocaína")
            .regular("comment", format!("paciente com CPF {cpf} atendida")),
    )
    .await
    .unwrap()
}

// ---------------------------------------------------------------------------
// 1. Redaction holds for every backend, including what is read back
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_redaction_invariant_holds_for_all_stores() {
    let dir = tempfile::tempdir().unwrap();
    let stores: Vec<Arc<dyn AuditStore>> = vec![
        Arc::new(MemoryAuditStore::new()),
        Arc::new(
            JsonlAuditStore::new(dir.path().join("audit.jsonl"))
                .await
                .unwrap(),
        ),
        Arc::new(SqliteAuditStore::open(dir.path().join("audit.db")).unwrap()),
    ];
    let cpf = "987.654.321-00";
    let (from, to) = window();

    for store in stores {
        let rec = AuditRecorder::new(store, clock());
        record_access(&rec, "patient-42", cpf).await;

        let page = rec
            .query_audit_trail("patient-42", from, to, Page::default())
            .await
            .unwrap();
        assert_eq!(page.entries.len(), 1);
        let stored = serde_json::to_string(&page.entries[0]).unwrap();
        assert!(!stored.contains(cpf));
        assert!(!stored.contains("lidocaína"));
        assert_eq!(page.entries[0].details["patient_document"], MASK_TOKEN);
        assert_eq!(
            page.entries[0].details["comment"],
            "paciente com CPF [REDACTED] atendida"
        );
    }
}

// ---------------------------------------------------------------------------
// 2. Append-only: unrelated writes never alter a recorded entry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_recorded_entry_is_unchanged_by_later_writes() {
    let clock = clock();
    let rec = AuditRecorder::new(Arc::new(MemoryAuditStore::new()), clock.clone());
    let (from, to) = window();

    let original = record_access(&rec, "patient-1", "111.222.333-44").await;
    let before = rec
        .query_audit_trail("patient-1", from, to, Page::default())
        .await
        .unwrap();

    clock.advance(Duration::hours(1));
    record_access(&rec, "patient-2", "555.666.777-88").await;
    rec.record(
        AuditAction::DataErased,
        "patient-1",
        "dpo",
        LegalBasis::LegalObligation,
        DataClassification::Sensitive,
        AuditDetails::new().regular("request", "erasure"),
    )
    .await
    .unwrap();

    let after = rec
        .query_audit_trail("patient-1", from, to, Page::default())
        .await
        .unwrap();
    assert_eq!(after.entries[0], original);
    assert_eq!(before.entries[0], after.entries[0]);
    assert_eq!(after.total, 2);
}

// ---------------------------------------------------------------------------
// 3. Chain continues across restarts of a durable store
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_chain_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logs").join("audit.jsonl");

    let first = {
        let store = Arc::new(JsonlAuditStore::new(&path).await.unwrap());
        let rec = AuditRecorder::new(store, clock());
        record_access(&rec, "patient-7", "123.123.123-12").await
    };

    let store = Arc::new(JsonlAuditStore::new(&path).await.unwrap());
    let rec = AuditRecorder::new(store, clock());
    let second = record_access(&rec, "patient-7", "123.123.123-12").await;

    assert_eq!(second.prev_hash, Some(first.hash));
    assert_eq!(
        rec.verify().await.unwrap(),
        ChainVerification::Intact { entries: 2 }
    );
}

#[tokio::test]
async fn test_interrupted_write_does_not_hide_later_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let (from, to) = window();

    let first = {
        let store = Arc::new(JsonlAuditStore::new(&path).await.unwrap());
        let rec = AuditRecorder::new(store, clock());
        record_access(&rec, "dev-1", "111.222.333-44").await
    };
    // The process died while appending the next line.
    let mut raw = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    std::io::Write::write_all(&mut raw, br#"{"entry_id":"c0ffee","actor_id":"sys"#).unwrap();
    drop(raw);

    let store = Arc::new(JsonlAuditStore::new(&path).await.unwrap());
    let rec = AuditRecorder::new(store, clock());
    let second = record_access(&rec, "dev-2", "555.666.777-88").await;
    assert_eq!(second.prev_hash, Some(first.hash.clone()));

    let trail = rec
        .query_audit_trail("dev-1", from, to, Page::default())
        .await
        .unwrap();
    assert_eq!(trail.entries, vec![first]);
    let trail = rec
        .query_audit_trail("dev-2", from, to, Page::default())
        .await
        .unwrap();
    assert_eq!(trail.entries, vec![second]);
    assert_eq!(
        rec.verify().await.unwrap(),
        ChainVerification::Intact { entries: 2 }
    );
}

#[tokio::test]
async fn test_sqlite_chain_verifies() {
    let store = Arc::new(SqliteAuditStore::in_memory().unwrap());
    let rec = AuditRecorder::new(store, clock());
    for i in 0..4 {
        record_access(&rec, &format!("patient-{i}"), "000.000.000-00").await;
    }
    assert!(rec.verify().await.unwrap().is_intact());
}

// ---------------------------------------------------------------------------
// 4. Ordering and range boundaries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_trail_is_ascending_and_range_inclusive() {
    let clock = clock();
    let rec = AuditRecorder::new(Arc::new(MemoryAuditStore::new()), clock.clone());

    let start = clock.now();
    let mut expected = Vec::new();
    for _ in 0..3 {
        expected.push(record_access(&rec, "patient-5", "999.999.999-99").await.entry_id);
        clock.advance(Duration::days(1));
    }

    let page = rec
        .query_audit_trail(
            "patient-5",
            start,
            start + Duration::days(2),
            Page::default(),
        )
        .await
        .unwrap();
    let ids: Vec<_> = page.entries.iter().map(|e| e.entry_id).collect();
    assert_eq!(ids, expected);

    let narrow = rec
        .query_audit_trail(
            "patient-5",
            start + Duration::hours(1),
            start + Duration::days(1),
            Page::default(),
        )
        .await
        .unwrap();
    assert_eq!(narrow.total, 1);
}

// ---------------------------------------------------------------------------
// 5. Retention
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_retention_follows_classification() {
    let rec = AuditRecorder::new(Arc::new(MemoryAuditStore::new()), clock());
    let entry = record_access(&rec, "patient-3", "321.654.987-00").await;
    assert_eq!(
        retain_until(&entry),
        Utc.with_ymd_and_hms(2045, 4, 10, 14, 0, 0).unwrap()
    );
}
