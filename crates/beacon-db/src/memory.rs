//! In-memory storage backend
//!
//! Each table is a single map behind a reader/writer lock. Suitable for
//! development and single-instance deployments; data is lost on restart.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use beacon_core::{RegistryRepository, ServiceRecord, Session, SessionRepository, StorageError};
use tracing::debug;

#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, Session>>,
    services: RwLock<HashMap<String, ServiceRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(operation: &'static str) -> impl FnOnce(PoisonError<T>) -> StorageError {
    move |_| StorageError::backend(operation, "lock poisoned")
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn create(&self, session: &Session) -> Result<(), StorageError> {
        let mut sessions = self.sessions.write().map_err(poisoned("create session"))?;
        if sessions.contains_key(&session.id) {
            return Err(StorageError::AlreadyExists(session.id.clone()));
        }
        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Session, StorageError> {
        let sessions = self.sessions.read().map_err(poisoned("get session"))?;
        sessions
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn update(&self, session: &Session) -> Result<(), StorageError> {
        let mut sessions = self.sessions.write().map_err(poisoned("update session"))?;
        match sessions.get_mut(&session.id) {
            Some(existing) => {
                *existing = session.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(session.id.clone())),
        }
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let mut sessions = self.sessions.write().map_err(poisoned("delete session"))?;
        sessions.remove(id);
        Ok(())
    }

    async fn delete_expired(&self, now: u64) -> Result<usize, StorageError> {
        let mut sessions = self.sessions.write().map_err(poisoned("delete expired sessions"))?;
        let before = sessions.len();
        sessions.retain(|_, session| session.expires_at >= now);
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, "dropped expired sessions from memory");
        }
        Ok(removed)
    }
}

#[async_trait]
impl RegistryRepository for MemoryStore {
    async fn register(&self, record: &ServiceRecord) -> Result<(), StorageError> {
        let mut services = self.services.write().map_err(poisoned("register service"))?;
        services.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn deregister(&self, id: &str) -> Result<(), StorageError> {
        let mut services = self.services.write().map_err(poisoned("deregister service"))?;
        services.remove(id);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<ServiceRecord, StorageError> {
        let services = self.services.read().map_err(poisoned("get service"))?;
        services
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<ServiceRecord>, StorageError> {
        let services = self.services.read().map_err(poisoned("list services"))?;
        Ok(services.values().cloned().collect())
    }

    async fn update(&self, record: &ServiceRecord) -> Result<(), StorageError> {
        let mut services = self.services.write().map_err(poisoned("update service"))?;
        match services.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(record.id.clone())),
        }
    }
}
