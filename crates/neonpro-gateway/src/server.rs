use crate::middleware::{auth_middleware, AuthConfig};
use crate::routes;
use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Json, Router,
};
use neonpro_compliance::{ComplianceService, ConsentManager, DataRightsManager};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    /// Audited evaluation and report generation.
    pub service: Arc<ComplianceService>,
    /// Consent lifecycle.
    pub consents: Arc<ConsentManager>,
    /// Access and erasure requests.
    pub rights: Arc<DataRightsManager>,
}

/// The HTTP gateway.
pub struct GatewayServer;

impl GatewayServer {
    /// Build the gateway without auth.
    pub fn build(state: Arc<AppState>) -> Router {
        Self::build_with_middleware(state, AuthConfig::default())
    }

    /// Build the gateway with API-key auth on the `/v1` routes.
    pub fn build_with_middleware(state: Arc<AppState>, auth_config: AuthConfig) -> Router {
        let api = Router::new()
            .route("/v1/evaluations", post(routes::evaluate))
            .route("/v1/reports", post(routes::generate_report))
            .route("/v1/reports/{subject_id}/latest", get(routes::latest_report))
            .route("/v1/consents/{action}", post(routes::consent_transition))
            .route(
                "/v1/consents/{subject_id}/{purpose}",
                get(routes::consent_status),
            )
            .route("/v1/rights", post(routes::open_rights_request))
            .route("/v1/rights/{request_id}", get(routes::rights_request))
            .route(
                "/v1/rights/{request_id}/complete",
                post(routes::complete_rights_request),
            )
            .route("/v1/audit/{subject_id}", get(routes::audit_trail))
            .with_state(state);

        let api = if auth_config.is_enabled() {
            api.layer(axum_mw::from_fn_with_state(
                Arc::new(auth_config),
                auth_middleware,
            ))
        } else {
            api
        };

        Router::new()
            .route("/health", get(health_handler))
            .merge(api)
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok", "service": "neonpro"}))
}
