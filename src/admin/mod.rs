//! Admin API.
//!
//! # Data Flow
//! ```text
//! Operator (gateway-cli, curl)
//!     → auth.rs (Bearer token check)
//!     → handlers.rs
//!         → LoadBalancer (endpoints, add/remove instance + health checks)
//!         → CircuitBreaker (list, reset)
//!         → HealthHistory (recent probe results)
//! ```
//!
//! # Design Decisions
//! - Served on its own listener, disabled by default
//! - Instance changes made here live until the next config reload

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use crate::gateway::Gateway;
use self::auth::admin_auth_middleware;
use self::handlers::*;

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub gateway: Arc<Gateway>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/endpoints", get(get_endpoints))
        .route("/admin/endpoints/{id}/instances", post(add_instance))
        .route(
            "/admin/endpoints/{id}/instances/{instance_id}",
            delete(remove_instance),
        )
        .route("/admin/circuit-breakers", get(get_circuit_breakers))
        .route("/admin/circuit-breakers/{service}", delete(reset_circuit_breaker))
        .route("/admin/health-history", get(get_health_history))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state)
}
