use std::collections::HashMap;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use beacon_core::{Claims, Session};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use super::{
    error::{ApiError, ErrorBody},
    AppState,
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateSessionRequest {
    #[schema(example = "user-42")]
    pub user_id: String,
    #[schema(example = "svc-checkout")]
    pub service_id: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub data: HashMap<String, Value>,
    /// Lifetime in seconds; 0 uses the server default.
    #[serde(default)]
    pub ttl: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateSessionRequest {
    #[schema(value_type = Object)]
    pub data: HashMap<String, Value>,
}

#[utoipa::path(
    post,
    path = "/session",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created", body = Session),
        (status = 400, description = "TTL out of range", body = ErrorBody),
        (status = 409, description = "Session id collision", body = ErrorBody)
    ),
    security(("api_jwt" = []))
)]
pub async fn create_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<Session>), ApiError> {
    tracing::debug!(caller = %claims.sub, user_id = %req.user_id, "create session requested");
    let session = state
        .sessions
        .create(&req.user_id, &req.service_id, req.data, Duration::from_secs(req.ttl))
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[utoipa::path(
    get,
    path = "/session/{id}",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Live session", body = Session),
        (status = 404, description = "Unknown session", body = ErrorBody),
        (status = 410, description = "Session expired", body = ErrorBody)
    ),
    security(("api_jwt" = []))
)]
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    Ok(Json(state.sessions.get(&id).await?))
}

#[utoipa::path(
    put,
    path = "/session/{id}",
    params(("id" = String, Path, description = "Session id")),
    request_body = UpdateSessionRequest,
    responses(
        (status = 200, description = "Session data replaced", body = Session),
        (status = 404, description = "Unknown session", body = ErrorBody),
        (status = 410, description = "Session expired", body = ErrorBody)
    ),
    security(("api_jwt" = []))
)]
pub async fn update_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateSessionRequest>,
) -> Result<Json<Session>, ApiError> {
    Ok(Json(state.sessions.update(&id, req.data).await?))
}

#[utoipa::path(
    delete,
    path = "/session/{id}",
    params(("id" = String, Path, description = "Session id")),
    responses((status = 204, description = "Session removed (or never existed)")),
    security(("api_jwt" = []))
)]
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.sessions.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
