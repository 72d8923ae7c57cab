use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use beacon_core::{Claims, ManualClock};
use beacon_db::MemoryStore;
use beacon_server::{
    api::{self, AppState},
    config::{CorsConfig, RegistryConfig, ServerConfig, SessionConfig, TokenConfig},
    HttpProber, Registry, SessionStore, TokenAuthority,
};
use serde_json::{json, Value};
use tower::ServiceExt;

const START: u64 = 1_700_000_000_000;

struct Harness {
    app: Router,
    clock: Arc<ManualClock>,
    tokens: Arc<TokenAuthority>,
    bearer: String,
}

fn harness() -> Harness {
    harness_with(ServerConfig::default())
}

fn harness_with(server: ServerConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(START));
    let store = Arc::new(MemoryStore::new());

    let token_config = TokenConfig {
        secret: "api-test-secret".to_string(),
        ..TokenConfig::default()
    };
    let tokens = Arc::new(TokenAuthority::new(&token_config, clock.clone()).unwrap());
    let sessions = Arc::new(SessionStore::new(store.clone(), clock.clone(), &SessionConfig::default()));
    let prober = Arc::new(HttpProber::new(Duration::from_secs(1)).unwrap());
    let registry = Arc::new(Registry::new(store, clock.clone(), prober, &RegistryConfig::default()));

    let bearer = tokens.generate(Claims::new("operator")).unwrap().value;
    let state = AppState {
        tokens: tokens.clone(),
        sessions,
        registry,
        metrics: None,
    };

    Harness {
        app: api::router(state, &server).unwrap(),
        clock,
        tokens,
        bearer,
    }
}

impl Harness {
    async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.send(method, uri, Some(&self.bearer), body).await
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let res = self.app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = hyper::body::to_bytes(res.into_body()).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
        };
        (status, value)
    }
}

#[tokio::test]
async fn public_routes_need_no_token() {
    let h = harness();
    let (status, body) = h.send(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("OK"));

    let (status, body) = h.send(Method::GET, "/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");

    let (status, _) = h.send(Method::GET, "/metrics", None, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, doc) = h.send(Method::GET, "/api-docs/openapi.json", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(doc["paths"]["/registry/discover"].is_object());
}

#[tokio::test]
async fn protected_routes_reject_missing_and_bad_tokens() {
    let h = harness();

    let (status, body) = h.send(Method::GET, "/registry/services", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "missing bearer token");

    let (status, _) = h
        .send(Method::GET, "/registry/services", Some("not-a-token"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut forged = h.bearer.clone();
    let last = forged.pop().unwrap();
    forged.push(if last == 'A' { 'B' } else { 'A' });
    let (status, _) = h.send(Method::GET, "/registry/services", Some(&forged), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    h.clock.advance(Duration::from_secs(901));
    let (status, _) = h.call(Method::GET, "/registry/services", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_endpoints() {
    let h = harness();

    let (status, pair) = h
        .call(
            Method::POST,
            "/auth/token",
            Some(json!({"sub": "user-7", "roles": ["reader"], "aud": "payments"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pair["access_token"]["type"], "access");
    assert_eq!(pair["refresh_token"]["type"], "refresh");
    let access = pair["access_token"]["token"].as_str().unwrap().to_string();
    let refresh = pair["refresh_token"]["token"].as_str().unwrap().to_string();

    let (status, claims) = h
        .call(Method::POST, "/auth/validate", Some(json!({"token": access})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(claims["sub"], "user-7");
    assert_eq!(claims["roles"], json!(["reader"]));
    assert_eq!(claims["iss"], "beacon");

    let (status, fresh) = h
        .call(Method::POST, "/auth/refresh", Some(json!({"token": refresh})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fresh["type"], "access");
    assert!(h.tokens.validate(fresh["token"].as_str().unwrap()).is_ok());

    let (status, _) = h
        .call(Method::POST, "/auth/validate", Some(json!({"token": "a.b.c"})))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = h
        .call(Method::POST, "/auth/revoke", Some(json!({"token": access})))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn session_lifecycle() {
    let h = harness();

    let (status, created) = h
        .call(
            Method::POST,
            "/session",
            Some(json!({"user_id": "user-1", "service_id": "svc-1", "data": {"cart": 2}, "ttl": 30})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();
    assert!(id.starts_with("sess_"));
    assert_eq!(created["expires_at"], json!(START + 30_000));

    let (status, fetched) = h.call(Method::GET, &format!("/session/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["data"]["cart"], 2);

    let (status, updated) = h
        .call(Method::PUT, &format!("/session/{id}"), Some(json!({"data": {"cart": 3}})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["data"], json!({"cart": 3}));

    h.clock.advance(Duration::from_secs(31));
    let (status, body) = h.call(Method::GET, &format!("/session/{id}"), None).await;
    assert_eq!(status, StatusCode::GONE);
    assert!(body["error"].as_str().unwrap().contains(&id));

    let (status, _) = h.call(Method::DELETE, &format!("/session/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = h.call(Method::GET, &format!("/session/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn session_default_ttl() {
    let h = harness();
    let (status, created) = h
        .call(Method::POST, "/session", Some(json!({"user_id": "u", "service_id": "s"})))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["expires_at"], json!(START + 60 * 60 * 1000));
}

#[tokio::test]
async fn session_ttl_past_the_timestamp_range_is_rejected() {
    let h = harness();
    let (status, body) = h
        .call(
            Method::POST,
            "/session",
            Some(json!({"user_id": "u", "service_id": "s", "ttl": 18_446_744_073_709_552u64})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("invalid session ttl"));

    let (status, _) = h
        .call(
            Method::POST,
            "/session",
            Some(json!({"user_id": "u", "service_id": "s", "ttl": u64::MAX})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn registry_flow() {
    let h = harness();

    let (status, record) = h
        .call(
            Method::POST,
            "/registry/register",
            Some(json!({
                "id": "svc-1",
                "name": "payments",
                "version": "1.0.0",
                "endpoints": ["http://10.0.0.1:8080"],
                "capabilities": ["payment"]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(record["status"], "healthy");
    assert_eq!(record["registered_at"], json!(START));

    let (status, generated) = h
        .call(
            Method::POST,
            "/registry/register",
            Some(json!({"name": "search", "version": "2.1.0", "capabilities": ["search"]})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(!generated["id"].as_str().unwrap().is_empty());

    let (_, all) = h.call(Method::GET, "/registry/services", None).await;
    assert_eq!(all.as_array().unwrap().len(), 2);

    let (_, found) = h.call(Method::GET, "/registry/discover?capability=payment", None).await;
    assert_eq!(found.as_array().unwrap().len(), 1);
    assert_eq!(found[0]["id"], "svc-1");

    let (_, found) = h.call(Method::GET, "/registry/discover?capability=refund", None).await;
    assert!(found.as_array().unwrap().is_empty());

    let (_, found) = h.call(Method::GET, "/registry/discover", None).await;
    assert_eq!(found.as_array().unwrap().len(), 2);

    h.clock.advance(Duration::from_secs(10));
    let (status, beat) = h.call(Method::PUT, "/registry/heartbeat/svc-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(beat["last_heartbeat"], json!(START + 10_000));

    let (status, _) = h.call(Method::PUT, "/registry/heartbeat/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = h.call(Method::DELETE, "/registry/deregister/svc-1", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = h.call(Method::GET, "/registry/services/svc-1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn register_requires_a_name() {
    let h = harness();
    let (status, body) = h
        .call(Method::POST, "/registry/register", Some(json!({"name": "", "version": "1"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "service name is required");
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let h = harness();

    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let res = h.app.clone().oneshot(req).await.unwrap();
    let generated = res.headers().get("x-request-id").unwrap();
    assert!(!generated.is_empty());

    let req = Request::builder()
        .uri("/health")
        .header("x-request-id", "req-123")
        .body(Body::empty())
        .unwrap();
    let res = h.app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.headers().get("x-request-id").unwrap(), "req-123");
}

fn preflight(origin: &str) -> Request<Body> {
    Request::builder()
        .method(Method::OPTIONS)
        .uri("/session")
        .header(header::ORIGIN, origin)
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization,content-type")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn cors_preflight_admits_configured_origins() {
    let h = harness_with(ServerConfig {
        cors: CorsConfig {
            enabled: true,
            allowed_origins: vec!["https://console.example.com".to_string()],
            ..CorsConfig::default()
        },
        ..ServerConfig::default()
    });

    let res = h.app.clone().oneshot(preflight("https://console.example.com")).await.unwrap();
    assert!(res.status().is_success());
    let headers = res.headers();
    assert_eq!(
        headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "https://console.example.com"
    );
    let methods = headers.get(header::ACCESS_CONTROL_ALLOW_METHODS).unwrap().to_str().unwrap();
    assert!(methods.contains("POST"));
    assert_eq!(headers.get(header::ACCESS_CONTROL_MAX_AGE).unwrap(), "86400");

    let res = h.app.clone().oneshot(preflight("https://evil.example.net")).await.unwrap();
    assert!(res.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());

    // Simple requests still need a token; CORS only adds headers.
    let req = Request::builder()
        .uri("/registry/services")
        .header(header::ORIGIN, "https://console.example.com")
        .body(Body::empty())
        .unwrap();
    let res = h.app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        res.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "https://console.example.com"
    );
}

#[tokio::test]
async fn wildcard_origin_admits_anyone() {
    let h = harness_with(ServerConfig {
        cors: CorsConfig {
            enabled: true,
            allowed_origins: vec!["*".to_string()],
            ..CorsConfig::default()
        },
        ..ServerConfig::default()
    });
    let res = h.app.clone().oneshot(preflight("https://anywhere.test")).await.unwrap();
    assert_eq!(res.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
}

#[tokio::test]
async fn cors_headers_absent_when_disabled() {
    let h = harness();
    let res = h.app.clone().oneshot(preflight("https://console.example.com")).await.unwrap();
    assert!(res.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    assert!(res.headers().get(header::ACCESS_CONTROL_ALLOW_METHODS).is_none());
}
