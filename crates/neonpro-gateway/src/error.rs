use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use neonpro_core::ComplianceError;
use tracing::{error, warn};

/// A [`ComplianceError`] on its way to an HTTP client.
#[derive(Debug)]
pub struct ApiError(pub ComplianceError);

impl From<ComplianceError> for ApiError {
    fn from(err: ComplianceError) -> Self {
        Self(err)
    }
}

impl ApiError {
    /// Status code for the wrapped error.
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ComplianceError::InvalidConsentTransition { .. } => StatusCode::CONFLICT,
            e if e.is_caller_error() => StatusCode::BAD_REQUEST,
            ComplianceError::NotFound(_) => StatusCode::NOT_FOUND,
            e if e.is_persistence_error() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(kind = self.0.kind(), error = %self.0, "request failed");
        } else {
            warn!(kind = self.0.kind(), error = %self.0, "request rejected");
        }
        let body = serde_json::json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
