//! HTTP surface over the three engines.

pub mod auth;
pub mod error;
pub mod registry;
pub mod session;

use std::any::Any;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderName, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{ConfigError, ServerConfig};
use crate::{Registry, SessionStore, TokenAuthority};
use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenAuthority>,
    pub sessions: Arc<SessionStore>,
    pub registry: Arc<Registry>,
    pub metrics: Option<PrometheusHandle>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::issue_token,
        auth::validate_token,
        auth::refresh_token,
        auth::revoke_token,
        session::create_session,
        session::get_session,
        session::update_session,
        session::delete_session,
        registry::register_service,
        registry::deregister_service,
        registry::list_services,
        registry::get_service,
        registry::discover_services,
        registry::heartbeat,
        health_check,
    ),
    components(
        schemas(
            auth::TokenRequest,
            auth::TokenPair,
            session::CreateSessionRequest,
            session::UpdateSessionRequest,
            registry::RegisterServiceRequest,
            error::ErrorBody,
            beacon_core::Claims,
            beacon_core::Token,
            beacon_core::TokenType,
            beacon_core::Session,
            beacon_core::ServiceRecord,
            beacon_core::HealthStatus,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_jwt",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            )
        }
    }
}

/// Build the full application router.
pub fn router(state: AppState, server: &ServerConfig) -> Result<Router, ConfigError> {
    let protected = Router::new()
        .route("/auth/token", post(auth::issue_token))
        .route("/auth/validate", post(auth::validate_token))
        .route("/auth/refresh", post(auth::refresh_token))
        .route("/auth/revoke", post(auth::revoke_token))
        .route("/session", post(session::create_session))
        .route(
            "/session/:id",
            get(session::get_session)
                .put(session::update_session)
                .delete(session::delete_session),
        )
        .route("/registry/register", post(registry::register_service))
        .route("/registry/deregister/:id", delete(registry::deregister_service))
        .route("/registry/services", get(registry::list_services))
        .route("/registry/services/:id", get(registry::get_service))
        .route("/registry/discover", get(registry::discover_services))
        .route("/registry/heartbeat/:id", put(registry::heartbeat))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    let request_id = HeaderName::from_static("x-request-id");

    let mut app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(health_check))
        .route("/ready", get(readiness))
        .route("/metrics", get(render_metrics))
        .merge(protected);

    // Preflights are answered before authentication.
    if let Some(cors) = server.cors.layer()? {
        app = app.layer(cors);
    }

    Ok(app
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TimeoutLayer::new(server.request_timeout()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .with_state(state))
}

/// Turns a handler panic into a JSON 500; the process keeps serving.
fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");
    tracing::error!(panic = detail, "request handler panicked");
    ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
}

/// Validates the bearer token and attaches its claims to the request.
async fn require_token<B>(
    State(state): State<AppState>,
    mut req: Request<B>,
    next: Next<B>,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;

    let claims = state.tokens.validate(token)?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Process is up"))
)]
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Ready once storage answers.
async fn readiness(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let services = state.registry.list().await.map_err(|e| {
        tracing::warn!(error = %e, "readiness check failed");
        ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "storage unavailable")
    })?;
    Ok(Json(json!({ "status": "ready", "services": services.len() })))
}

async fn render_metrics(State(state): State<AppState>) -> String {
    state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}
