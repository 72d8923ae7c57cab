use axum::{extract::State, http::StatusCode, Json};
use beacon_core::{Claims, Token};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{
    error::{ApiError, ErrorBody},
    AppState,
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenRequest {
    #[schema(example = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9...")]
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenPair {
    pub access_token: Token,
    pub refresh_token: Token,
}

#[utoipa::path(
    post,
    path = "/auth/token",
    request_body = Claims,
    responses(
        (status = 200, description = "Access and refresh tokens issued", body = TokenPair),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody)
    ),
    security(("api_jwt" = []))
)]
pub async fn issue_token(
    State(state): State<AppState>,
    Json(claims): Json<Claims>,
) -> Result<Json<TokenPair>, ApiError> {
    if claims.sub.is_empty() {
        return Err(ApiError::bad_request("subject is required"));
    }
    let access_token = state.tokens.generate(claims.clone())?;
    let refresh_token = state.tokens.generate_refresh(claims)?;
    Ok(Json(TokenPair {
        access_token,
        refresh_token,
    }))
}

#[utoipa::path(
    post,
    path = "/auth/validate",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Token is valid", body = Claims),
        (status = 401, description = "Token is malformed, forged or expired", body = ErrorBody)
    ),
    security(("api_jwt" = []))
)]
pub async fn validate_token(
    State(state): State<AppState>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<Claims>, ApiError> {
    Ok(Json(state.tokens.validate(&req.token)?))
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Fresh access token", body = Token),
        (status = 401, description = "Token is malformed, forged or expired", body = ErrorBody)
    ),
    security(("api_jwt" = []))
)]
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<Token>, ApiError> {
    Ok(Json(state.tokens.refresh(&req.token)?))
}

#[utoipa::path(
    post,
    path = "/auth/revoke",
    request_body = TokenRequest,
    responses((status = 204, description = "Revocation accepted")),
    security(("api_jwt" = []))
)]
pub async fn revoke_token(
    State(state): State<AppState>,
    Json(req): Json<TokenRequest>,
) -> StatusCode {
    state.tokens.revoke(&req.token);
    StatusCode::NO_CONTENT
}
