use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::admin::AdminState;
use crate::config::schema::InstanceConfig;
use crate::health::HealthRecord;
use crate::http::response::error_response;
use crate::load_balancer::{instance::InstanceSnapshot, EndpointSnapshot, RegistryError};
use crate::resilience::circuit_breaker::CircuitBreakerState;
use crate::store::StoreError;

const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            AdminError::Registry(RegistryError::UnknownEndpoint(_))
            | AdminError::Registry(RegistryError::UnknownInstance { .. }) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            AdminError::Registry(RegistryError::DuplicateInstance { .. })
            | AdminError::Registry(RegistryError::ConflictingInstance { .. }) => {
                (StatusCode::CONFLICT, "conflict")
            }
            AdminError::Registry(RegistryError::InvalidInstance(_)) => {
                (StatusCode::BAD_REQUEST, "invalid_instance")
            }
            AdminError::Store(_) => (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable"),
        };
        error_response(status, kind, &self.to_string())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub endpoints: usize,
    pub instances: usize,
    pub healthy_instances: usize,
    pub monitored_instances: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerEntry {
    pub service: String,
    #[serde(flatten)]
    pub state: CircuitBreakerState,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub service: Option<String>,
    pub limit: Option<usize>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let balancer = state.gateway.balancer();
    let instances = balancer.all_instances();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        endpoints: balancer.endpoints().len(),
        healthy_instances: instances.iter().filter(|i| i.is_healthy()).count(),
        instances: instances.len(),
        monitored_instances: balancer.monitor().monitored().len(),
    })
}

pub async fn get_endpoints(State(state): State<AdminState>) -> Json<Vec<EndpointSnapshot>> {
    Json(state.gateway.balancer().endpoints())
}

pub async fn add_instance(
    State(state): State<AdminState>,
    Path(endpoint_id): Path<String>,
    Json(config): Json<InstanceConfig>,
) -> Result<(StatusCode, Json<InstanceSnapshot>), AdminError> {
    let added = state.gateway.balancer().add_instance(&endpoint_id, &config)?;
    Ok((StatusCode::CREATED, Json(added.snapshot())))
}

pub async fn remove_instance(
    State(state): State<AdminState>,
    Path((endpoint_id, instance_id)): Path<(String, String)>,
) -> Result<StatusCode, AdminError> {
    state
        .gateway
        .balancer()
        .remove_instance(&endpoint_id, &instance_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_circuit_breakers(
    State(state): State<AdminState>,
) -> Result<Json<Vec<CircuitBreakerEntry>>, AdminError> {
    let all = state.gateway.breaker().get_all_circuit_breakers().await?;
    Ok(Json(
        all.into_iter()
            .map(|(service, state)| CircuitBreakerEntry { service, state })
            .collect(),
    ))
}

pub async fn reset_circuit_breaker(
    State(state): State<AdminState>,
    Path(service): Path<String>,
) -> Result<StatusCode, AdminError> {
    state.gateway.breaker().reset_circuit_breaker(&service).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_health_history(
    State(state): State<AdminState>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<HealthRecord>> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let records = state
        .gateway
        .balancer()
        .monitor()
        .history()
        .recent(query.service.as_deref(), limit)
        .await;
    Json(records)
}
