use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::health::HealthStatus;

/// A live service instance known to the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ServiceRecord {
    pub id: String,
    pub name: String,
    pub version: String,
    /// Network endpoints in the order the service advertised them.
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    #[schema(value_type = Vec<String>)]
    pub capabilities: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    pub status: HealthStatus,
    pub registered_at: u64,
    pub last_heartbeat: u64,
    /// When set, the health monitor probes this URL instead of relying on heartbeats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_url: Option<String>,
}

impl ServiceRecord {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            endpoints: Vec::new(),
            capabilities: BTreeSet::new(),
            metadata: HashMap::new(),
            status: HealthStatus::Unknown,
            registered_at: 0,
            last_heartbeat: 0,
            health_check_url: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn with_health_check(mut self, url: impl Into<String>) -> Self {
        self.health_check_url = Some(url.into());
        self
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn get_metadata(&self, key: &str) -> Option<&String> {
        self.metadata.get(key)
    }

    /// An empty capability matches every record.
    pub fn has_capability(&self, capability: &str) -> bool {
        capability.is_empty() || self.capabilities.contains(capability)
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    pub fn set_health(&mut self, status: HealthStatus) {
        self.status = status;
    }

    pub fn update_heartbeat(&mut self, timestamp: u64) {
        self.last_heartbeat = timestamp;
        self.status = HealthStatus::Healthy;
    }

    /// True when no heartbeat arrived within `tolerance_millis` of `now`.
    pub fn heartbeat_overdue(&self, now: u64, tolerance_millis: u64) -> bool {
        now.saturating_sub(self.last_heartbeat) > tolerance_millis
    }
}
