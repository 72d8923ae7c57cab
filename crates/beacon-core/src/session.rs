use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

/// Short-lived, user-associated state. Timestamps are Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub service_id: String,
    #[schema(value_type = Object)]
    pub data: HashMap<String, Value>,
    pub created_at: u64,
    pub updated_at: u64,
    pub expires_at: u64,
}

impl Session {
    pub fn new(
        user_id: impl Into<String>,
        service_id: impl Into<String>,
        data: HashMap<String, Value>,
        now: u64,
        ttl_millis: u64,
    ) -> Self {
        Self {
            id: generate_id(),
            user_id: user_id.into(),
            service_id: service_id.into(),
            data,
            created_at: now,
            updated_at: now,
            expires_at: now.saturating_add(ttl_millis),
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }

    pub fn touch(&mut self, now: u64) {
        self.updated_at = now;
    }
}

pub fn generate_id() -> String {
    format!("sess_{}", Uuid::new_v4().simple())
}
