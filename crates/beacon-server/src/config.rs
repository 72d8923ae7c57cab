//! Process configuration.
//!
//! Values come from an optional JSON file (`BEACON_CONFIG`) and are then
//! overridden by environment variables. `.env` is honoured via dotenvy.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, Method};
use serde::Deserialize;
use tower_http::cors::{AllowOrigin, CorsLayer};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("jwt signing secret is required")]
    MissingSecret,

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub token: TokenConfig,
    pub session: SessionConfig,
    pub registry: RegistryConfig,
    pub storage: StorageConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    pub request_timeout_secs: u64,
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:3000".to_string(),
            request_timeout_secs: 30,
            cors: CorsConfig::default(),
        }
    }
}

/// Cross-origin policy. Off unless `enabled`; `"*"` in `allowed_origins`
/// admits any origin.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_origins: Vec::new(),
            allowed_methods: ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
                .map(String::from)
                .to_vec(),
            allowed_headers: ["authorization", "content-type", "x-request-id"]
                .map(String::from)
                .to_vec(),
        }
    }
}

impl CorsConfig {
    /// Build the tower-http layer, or `None` when CORS is disabled.
    pub fn layer(&self) -> Result<Option<CorsLayer>, ConfigError> {
        if !self.enabled {
            return Ok(None);
        }

        let origins = if self.allowed_origins.iter().any(|o| o == "*") {
            AllowOrigin::any()
        } else {
            let parsed = self
                .allowed_origins
                .iter()
                .map(|o| {
                    HeaderValue::from_str(o)
                        .map_err(|_| ConfigError::Invalid(format!("server.cors origin {o:?}")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            AllowOrigin::list(parsed)
        };
        let methods = self
            .allowed_methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.as_bytes())
                    .map_err(|_| ConfigError::Invalid(format!("server.cors method {m:?}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let headers = self
            .allowed_headers
            .iter()
            .map(|h| {
                HeaderName::from_bytes(h.as_bytes())
                    .map_err(|_| ConfigError::Invalid(format!("server.cors header {h:?}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(methods)
                .allow_headers(headers)
                .max_age(Duration::from_secs(86_400)),
        ))
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.addr
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("server.addr {:?}: {e}", self.addr)))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub secret: String,
    pub issuer: String,
    pub access_token_ttl_secs: u64,
    pub refresh_token_ttl_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            issuer: "beacon".to_string(),
            access_token_ttl_secs: 15 * 60,
            refresh_token_ttl_secs: 24 * 60 * 60,
        }
    }
}

impl TokenConfig {
    pub fn access_token_ttl(&self) -> Duration {
        Duration::from_secs(self.access_token_ttl_secs)
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_token_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub default_ttl_secs: u64,
    pub cleanup_period_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 60 * 60,
            cleanup_period_secs: 5 * 60,
        }
    }
}

impl SessionConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn cleanup_period(&self) -> Duration {
        Duration::from_secs(self.cleanup_period_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub health_check_interval_secs: u64,
    pub health_check_timeout_secs: u64,
    /// Upper bound on concurrent probes within one sweep; 0 leaves it unbounded.
    pub max_concurrent_probes: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: 30,
            health_check_timeout_secs: 2,
            max_concurrent_probes: 0,
        }
    }
}

impl RegistryConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Database file for the sqlite backend.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: "beacon.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl Config {
    /// Load from `BEACON_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut config = match std::env::var("BEACON_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Apply environment overrides. `lookup` resolves a variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup("BEACON_JWT_SECRET").or_else(|| lookup("JWT_SECRET")) {
            self.token.secret = secret;
        }
        if let Some(addr) = lookup("BEACON_ADDR") {
            self.server.addr = addr;
        }
        if let Some(path) = lookup("DATABASE_URL") {
            self.storage.path = path;
        }
        if let Some(backend) = lookup("BEACON_STORAGE") {
            self.storage.backend = match backend.as_str() {
                "memory" => StorageBackend::Memory,
                "sqlite" => StorageBackend::Sqlite,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "unknown storage backend {other:?}"
                    )));
                }
            };
        }
        if let Some(level) = lookup("BEACON_LOG_LEVEL") {
            self.log.level = level;
        }
        if let Some(format) = lookup("BEACON_LOG_FORMAT") {
            self.log.format = match format.as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Text,
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        self.server.socket_addr()?;
        self.server.cors.layer()?;

        let required = [
            ("token.access_token_ttl_secs", self.token.access_token_ttl_secs),
            ("token.refresh_token_ttl_secs", self.token.refresh_token_ttl_secs),
            ("session.default_ttl_secs", self.session.default_ttl_secs),
            ("session.cleanup_period_secs", self.session.cleanup_period_secs),
            ("registry.health_check_interval_secs", self.registry.health_check_interval_secs),
            ("registry.health_check_timeout_secs", self.registry.health_check_timeout_secs),
        ];
        for (name, value) in required {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.token.access_token_ttl(), Duration::from_secs(900));
        assert_eq!(config.token.refresh_token_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.session.default_ttl(), Duration::from_secs(3_600));
        assert_eq!(config.session.cleanup_period(), Duration::from_secs(300));
        assert_eq!(config.registry.health_check_interval(), Duration::from_secs(30));
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.log.format, LogFormat::Text);
    }

    #[test]
    fn missing_secret_is_rejected() {
        let err = Config::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingSecret));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = Config::from_json(
            r#"{"token": {"secret": "s3cret", "issuer": "edge"}, "registry": {"max_concurrent_probes": 8}}"#,
        )
        .unwrap();
        assert_eq!(config.token.issuer, "edge");
        assert_eq!(config.token.access_token_ttl_secs, 900);
        assert_eq!(config.registry.max_concurrent_probes, 8);
        assert_eq!(config.registry.health_check_timeout_secs, 2);
        config.validate().unwrap();
    }

    #[test]
    fn environment_overrides_file() {
        let mut config = Config::from_json(r#"{"token": {"secret": "from-file"}}"#).unwrap();
        config
            .apply_overrides(env(&[
                ("JWT_SECRET", "from-env"),
                ("BEACON_STORAGE", "sqlite"),
                ("DATABASE_URL", "/var/lib/beacon.db"),
                ("BEACON_LOG_FORMAT", "json"),
            ]))
            .unwrap();
        assert_eq!(config.token.secret, "from-env");
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.storage.path, "/var/lib/beacon.db");
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(env(&[("BEACON_STORAGE", "redis")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_periods_are_rejected() {
        let mut config = Config::default();
        config.token.secret = "s".into();
        config.session.cleanup_period_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn cors_is_off_by_default() {
        let config = Config::default();
        assert!(!config.server.cors.enabled);
        assert!(config.server.cors.layer().unwrap().is_none());
    }

    #[test]
    fn cors_section_parses_and_validates() {
        let config = Config::from_json(
            r#"{"token": {"secret": "s"}, "server": {"cors": {"enabled": true, "allowed_origins": ["https://console.example.com"]}}}"#,
        )
        .unwrap();
        assert_eq!(config.server.addr, "127.0.0.1:3000");
        assert_eq!(config.server.cors.allowed_methods.len(), 5);
        assert!(config.server.cors.layer().unwrap().is_some());
        config.validate().unwrap();

        let mut bad = config.clone();
        bad.server.cors.allowed_methods = vec!["NOT A METHOD".into()];
        assert!(matches!(bad.validate(), Err(ConfigError::Invalid(_))));

        let mut bad = config;
        bad.server.cors.allowed_origins = vec!["https://bad\norigin".into()];
        assert!(matches!(bad.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn bad_address_is_rejected() {
        let mut config = Config::default();
        config.token.secret = "s".into();
        config.server.addr = "not an address".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
