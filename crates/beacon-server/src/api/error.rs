use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use beacon_core::{RegistryError, SessionError, StorageError, TokenError};
use serde::Serialize;
use utoipa::ToSchema;

/// JSON error body: `{"error": "..."}`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            StorageError::AlreadyExists(_) => Self::new(StatusCode::CONFLICT, err.to_string()),
            StorageError::Backend { .. } => {
                tracing::error!(error = %err, "storage failure while serving request");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal storage error")
            }
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::InvalidFormat | TokenError::InvalidSignature | TokenError::Expired => {
                Self::unauthorized(err.to_string())
            }
            TokenError::Configuration(_) | TokenError::Encoding(_) => {
                tracing::error!(error = %err, "token authority failure");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "token authority failure")
            }
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            SessionError::Expired(_) => Self::new(StatusCode::GONE, err.to_string()),
            SessionError::AlreadyExists(_) => Self::new(StatusCode::CONFLICT, err.to_string()),
            SessionError::InvalidTtl(_) => Self::bad_request(err.to_string()),
            SessionError::Storage(inner) => inner.into(),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::ServiceNotFound(_) => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            RegistryError::Storage(inner) => inner.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_statuses() {
        let cases = [
            (ApiError::from(TokenError::Expired), StatusCode::UNAUTHORIZED),
            (ApiError::from(TokenError::InvalidSignature), StatusCode::UNAUTHORIZED),
            (ApiError::from(TokenError::Encoding("x".into())), StatusCode::INTERNAL_SERVER_ERROR),
            (ApiError::from(SessionError::NotFound("s".into())), StatusCode::NOT_FOUND),
            (ApiError::from(SessionError::Expired("s".into())), StatusCode::GONE),
            (ApiError::from(SessionError::AlreadyExists("s".into())), StatusCode::CONFLICT),
            (ApiError::from(SessionError::InvalidTtl("huge".into())), StatusCode::BAD_REQUEST),
            (ApiError::from(RegistryError::ServiceNotFound("x".into())), StatusCode::NOT_FOUND),
            (
                ApiError::from(RegistryError::Storage(StorageError::backend("list services", "disk full"))),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.status(), status, "{err:?}");
        }
    }

    #[test]
    fn backend_details_are_not_leaked() {
        let err = ApiError::from(StorageError::backend("update service", "database is locked"));
        assert!(!err.message.contains("locked"));
    }
}
