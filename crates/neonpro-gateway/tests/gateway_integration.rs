#![allow(clippy::unwrap_used, clippy::expect_used)]

use neonpro_audit::{AuditRecorder, JsonlAuditStore, MemoryAuditStore};
use neonpro_compliance::{ComplianceService, ConsentManager, DataRightsManager, JsonReportStore};
use neonpro_core::SystemClock;
use neonpro_gateway::{AppState, AuthConfig, GatewayServer};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;

struct TestServer {
    addr: String,
    store: Arc<MemoryAuditStore>,
    _tmp: tempfile::TempDir,
}

/// Helper: build a test server on a random port.
async fn start_test_server(auth: AuthConfig) -> TestServer {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryAuditStore::new());
    let recorder = Arc::new(AuditRecorder::new(store.clone(), Arc::new(SystemClock)));
    let reports = Arc::new(JsonReportStore::new(tmp.path().join("reports")));
    let state = Arc::new(AppState {
        service: Arc::new(ComplianceService::new(recorder.clone()).with_report_store(reports)),
        consents: Arc::new(ConsentManager::new(recorder.clone())),
        rights: Arc::new(DataRightsManager::new(recorder)),
    });
    let app = GatewayServer::build_with_middleware(state, auth);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let addr_str = format!("127.0.0.1:{}", addr.port());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Small yield to let the server task start
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    TestServer {
        addr: addr_str,
        store,
        _tmp: tmp,
    }
}

fn bare_device() -> serde_json::Value {
    json!({
        "subject_id": "dev-77",
        "subject_type": "device",
        "classification": "III",
        "attributes": {"clinicalEvaluation": false}
    })
}

fn context() -> serde_json::Value {
    json!({"actor_id": "auditor-1", "legal_basis": "legal_obligation"})
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = start_test_server(AuthConfig::default()).await;
    let url = format!("http://{}/health", server.addr);
    let resp = reqwest::get(&url).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "neonpro");
}

#[tokio::test]
async fn test_evaluation_endpoint() {
    let server = start_test_server(AuthConfig::default()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{}/v1/evaluations", server.addr))
        .json(&json!({"subject": bare_device(), "dimension": "safety", "context": context()}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["level"], "non_compliant");
    assert!(body["score"].as_u64().unwrap() <= 50);
    assert_eq!(server.store.len().await, 1);

    let resp = client
        .post(format!("http://{}/v1/evaluations", server.addr))
        .json(&json!({"subject": bare_device(), "dimension": "accessibility", "context": context()}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "invalid_dimension");
}

#[tokio::test]
async fn test_report_and_latest() {
    let server = start_test_server(AuthConfig::default()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{}/v1/reports", server.addr))
        .json(&json!({"subject": bare_device(), "context": context()}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let report: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(report["overall_level"], "non_compliant");
    assert_eq!(report["dimension_results"].as_array().unwrap().len(), 3);

    let latest: serde_json::Value = client
        .get(format!("http://{}/v1/reports/dev-77/latest", server.addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(latest, report);
}

#[tokio::test]
async fn test_audit_store_outage_is_503() {
    let server = start_test_server(AuthConfig::default()).await;
    server.store.set_unavailable(true);

    let resp = reqwest::Client::new()
        .post(format!("http://{}/v1/reports", server.addr))
        .json(&json!({"subject": bare_device(), "context": context()}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "audit_write");

    let resp = reqwest::get(format!("http://{}/v1/reports/dev-77/latest", server.addr))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_consent_flow_and_audit_trail() {
    let server = start_test_server(AuthConfig::default()).await;
    let client = reqwest::Client::new();
    let body = json!({"data_subject_id": "pac-9", "purpose": "treatment", "actor_id": "crm"});

    for action in ["request", "grant"] {
        let resp = client
            .post(format!("http://{}/v1/consents/{action}", server.addr))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200, "{action}");
    }

    let status: serde_json::Value = client
        .get(format!("http://{}/v1/consents/pac-9/treatment", server.addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["active"], true);
    assert_eq!(status["history"][0]["state"], "granted");

    client
        .post(format!("http://{}/v1/consents/withdraw", server.addr))
        .json(&body)
        .send()
        .await
        .unwrap();
    let resp = client
        .post(format!("http://{}/v1/consents/grant", server.addr))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    let trail: serde_json::Value = client
        .get(format!("http://{}/v1/audit/pac-9?limit=2", server.addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(trail["total"], 3);
    assert_eq!(trail["entries"].as_array().unwrap().len(), 2);
    assert_eq!(trail["next_offset"], 2);
    assert_eq!(trail["entries"][0]["action"], "consent_requested");
}

#[tokio::test]
async fn test_api_key_required_when_configured() {
    let server = start_test_server(AuthConfig::new(vec!["segredo".to_string()])).await;
    let client = reqwest::Client::new();
    let url = format!("http://{}/v1/audit/pac-1", server.addr);

    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client.get(&url).bearer_auth("errado").send().await.unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client.get(&url).bearer_auth("segredo").send().await.unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .get(format!("{url}?api_key=segredo"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Health stays open.
    let resp = client
        .get(format!("http://{}/health", server.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_rights_requests_flow() {
    let server = start_test_server(AuthConfig::default()).await;
    let client = reqwest::Client::new();
    let base = format!("http://{}", server.addr);

    client
        .post(format!("{base}/v1/consents/request"))
        .json(&json!({"data_subject_id": "pac-40", "purpose": "treatment", "actor_id": "crm"}))
        .send()
        .await
        .unwrap();

    let opened: serde_json::Value = client
        .post(format!("{base}/v1/rights"))
        .json(&json!({"data_subject_id": "pac-40", "kind": "access", "actor_id": "dpo"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(opened["status"], "open");
    let id = opened["request_id"].as_str().unwrap().to_string();

    let resp = client
        .post(format!("{base}/v1/rights"))
        .json(&json!({"data_subject_id": "pac-40", "kind": "access", "actor_id": "dpo"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{base}/v1/rights/{id}/complete"))
        .json(&json!({"actor_id": "dpo"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let done: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(done["request"]["status"], "completed");
    assert_eq!(done["consents"][0]["purpose"], "treatment");

    let fetched: serde_json::Value = client
        .get(format!("{base}/v1/rights/{id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["status"], "completed");

    let erasure: serde_json::Value = client
        .post(format!("{base}/v1/rights"))
        .json(&json!({"data_subject_id": "pac-40", "kind": "erasure", "actor_id": "dpo"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let erasure_id = erasure["request_id"].as_str().unwrap();
    let done: serde_json::Value = client
        .post(format!("{base}/v1/rights/{erasure_id}/complete"))
        .json(&json!({"actor_id": "dpo"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(done.get("consents").is_none());

    let trail: serde_json::Value = client
        .get(format!("{base}/v1/audit/pac-40"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let actions: Vec<_> = trail["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        actions,
        vec![
            "consent_requested",
            "rights_requested",
            "data_accessed",
            "rights_requested",
            "data_erased"
        ]
    );
}

/// Serve a gateway whose state is rebuilt from the JSONL log at `path`.
async fn serve_on_jsonl(
    path: &std::path::Path,
) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    let store = Arc::new(JsonlAuditStore::new(path).await.unwrap());
    let recorder = Arc::new(AuditRecorder::new(store, Arc::new(SystemClock)));
    let state = Arc::new(AppState {
        service: Arc::new(ComplianceService::new(recorder.clone())),
        consents: Arc::new(ConsentManager::restore(recorder.clone()).await.unwrap()),
        rights: Arc::new(DataRightsManager::restore(recorder).await.unwrap()),
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = GatewayServer::build(state);
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    (addr, handle)
}

#[tokio::test]
async fn test_trail_survives_restart_on_jsonl_store() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("audit.jsonl");

    for _ in 0..2 {
        let (addr, handle) = serve_on_jsonl(&path).await;
        let resp = reqwest::Client::new()
            .post(format!("http://{addr}/v1/evaluations"))
            .json(&json!({"subject": bare_device(), "dimension": "terminology", "context": context()}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        handle.abort();
    }

    let store = JsonlAuditStore::new(&path).await.unwrap();
    let recorder = AuditRecorder::new(Arc::new(store), Arc::new(SystemClock));
    assert!(recorder.verify().await.unwrap().is_intact());
}

#[tokio::test]
async fn test_consent_and_requests_survive_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("audit.jsonl");
    let client = reqwest::Client::new();
    let consent = json!({"data_subject_id": "pac-50", "purpose": "photos", "actor_id": "pac-50"});

    let (addr, handle) = serve_on_jsonl(&path).await;
    for action in ["request", "grant"] {
        let resp = client
            .post(format!("http://{addr}/v1/consents/{action}"))
            .json(&consent)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }
    let opened: serde_json::Value = client
        .post(format!("http://{addr}/v1/rights"))
        .json(&json!({"data_subject_id": "pac-50", "kind": "erasure", "actor_id": "dpo"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let request_id = opened["request_id"].as_str().unwrap().to_string();
    handle.abort();

    let (addr, handle) = serve_on_jsonl(&path).await;
    let status: serde_json::Value = client
        .get(format!("http://{addr}/v1/consents/pac-50/photos"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["active"], true);

    // A fresh request would contradict the granted cycle.
    let resp = client
        .post(format!("http://{addr}/v1/consents/request"))
        .json(&consent)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    let resp = client
        .post(format!("http://{addr}/v1/consents/withdraw"))
        .json(&consent)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let withdrawn: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(withdrawn["cycle"], 1);

    let resp = client
        .post(format!("http://{addr}/v1/rights/{request_id}/complete"))
        .json(&json!({"actor_id": "dpo"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    handle.abort();

    let store = JsonlAuditStore::new(&path).await.unwrap();
    let recorder = AuditRecorder::new(Arc::new(store), Arc::new(SystemClock));
    assert!(recorder.verify().await.unwrap().is_intact());
}
