//! Active health probing of registered services.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy,
    /// Carries a human readable reason for logs.
    Unhealthy(String),
}

impl ProbeOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Healthy)
    }
}

/// Checks a service's advertised health-check URL.
///
/// Implementations never fail: any problem reaching the service is an
/// [`ProbeOutcome::Unhealthy`] result.
#[async_trait]
pub trait HealthProber: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeOutcome;
}

/// Plain HTTP GET prober. Only `200 OK` counts as healthy.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: Client,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProber for HttpProber {
    async fn probe(&self, url: &str) -> ProbeOutcome {
        match self.client.get(url).send().await {
            Ok(res) if res.status() == StatusCode::OK => ProbeOutcome::Healthy,
            Ok(res) => ProbeOutcome::Unhealthy(format!("unexpected status {}", res.status())),
            Err(e) if e.is_timeout() => ProbeOutcome::Unhealthy("probe timed out".to_string()),
            Err(e) => ProbeOutcome::Unhealthy(e.to_string()),
        }
    }
}
