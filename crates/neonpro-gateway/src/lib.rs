//! HTTP gateway for the NeonPro compliance core.
//!
//! Exposes audited evaluations, report generation, the consent lifecycle,
//! data subject requests and audit trail queries as a JSON API built on axum.

/// Error-to-response mapping.
pub mod error;
/// API-key authentication.
pub mod middleware;
/// Request handlers.
pub mod routes;
/// Router assembly and shared state.
pub mod server;

pub use error::ApiError;
pub use middleware::AuthConfig;
pub use server::{AppState, GatewayServer};
