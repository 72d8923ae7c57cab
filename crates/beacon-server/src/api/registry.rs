use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use beacon_core::{Claims, ServiceRecord};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::{
    error::{ApiError, ErrorBody},
    AppState,
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterServiceRequest {
    /// Generated when omitted.
    #[schema(example = "svc-1")]
    pub id: Option<String>,
    #[schema(example = "payments")]
    pub name: String,
    #[schema(example = "1.4.2")]
    pub version: String,
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[schema(example = "http://10.0.0.7:8080/healthz")]
    pub health_check_url: Option<String>,
}

impl RegisterServiceRequest {
    fn into_record(self) -> ServiceRecord {
        let id = self
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut record = ServiceRecord::new(id, self.name, self.version);
        record.endpoints = self.endpoints;
        record.capabilities = self.capabilities.into_iter().collect();
        record.metadata = self.metadata;
        record.health_check_url = self.health_check_url.filter(|url| !url.is_empty());
        record
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DiscoverQuery {
    /// Capability tag; empty or absent matches every healthy service.
    #[serde(default)]
    pub capability: String,
}

#[utoipa::path(
    post,
    path = "/registry/register",
    request_body = RegisterServiceRequest,
    responses(
        (status = 201, description = "Service registered", body = ServiceRecord),
        (status = 400, description = "Missing name", body = ErrorBody)
    ),
    security(("api_jwt" = []))
)]
pub async fn register_service(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RegisterServiceRequest>,
) -> Result<(StatusCode, Json<ServiceRecord>), ApiError> {
    if req.name.is_empty() {
        return Err(ApiError::bad_request("service name is required"));
    }
    tracing::debug!(caller = %claims.sub, name = %req.name, "register requested");
    let record = state.registry.register(req.into_record()).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

#[utoipa::path(
    delete,
    path = "/registry/deregister/{id}",
    params(("id" = String, Path, description = "Service id")),
    responses((status = 204, description = "Service removed (or never existed)")),
    security(("api_jwt" = []))
)]
pub async fn deregister_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.registry.deregister(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/registry/services",
    responses((status = 200, description = "Every registered service", body = Vec<ServiceRecord>)),
    security(("api_jwt" = []))
)]
pub async fn list_services(State(state): State<AppState>) -> Result<Json<Vec<ServiceRecord>>, ApiError> {
    Ok(Json(state.registry.list().await?))
}

#[utoipa::path(
    get,
    path = "/registry/services/{id}",
    params(("id" = String, Path, description = "Service id")),
    responses(
        (status = 200, description = "Service record", body = ServiceRecord),
        (status = 404, description = "Unknown service", body = ErrorBody)
    ),
    security(("api_jwt" = []))
)]
pub async fn get_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ServiceRecord>, ApiError> {
    Ok(Json(state.registry.get(&id).await?))
}

#[utoipa::path(
    get,
    path = "/registry/discover",
    params(DiscoverQuery),
    responses((status = 200, description = "Healthy services with the capability", body = Vec<ServiceRecord>)),
    security(("api_jwt" = []))
)]
pub async fn discover_services(
    State(state): State<AppState>,
    Query(query): Query<DiscoverQuery>,
) -> Result<Json<Vec<ServiceRecord>>, ApiError> {
    Ok(Json(state.registry.discover(&query.capability).await?))
}

#[utoipa::path(
    put,
    path = "/registry/heartbeat/{id}",
    params(("id" = String, Path, description = "Service id")),
    responses(
        (status = 200, description = "Heartbeat recorded", body = ServiceRecord),
        (status = 404, description = "Unknown service", body = ErrorBody)
    ),
    security(("api_jwt" = []))
)]
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ServiceRecord>, ApiError> {
    Ok(Json(state.registry.heartbeat(&id).await?))
}
