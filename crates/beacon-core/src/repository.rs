use async_trait::async_trait;

use crate::errors::StorageError;
use crate::service::ServiceRecord;
use crate::session::Session;

/// Storage contract for sessions.
///
/// `create` must reject an identifier that already exists; `get` and
/// `update` must fail with [`StorageError::NotFound`] for unknown ones.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: &Session) -> Result<(), StorageError>;
    async fn get(&self, id: &str) -> Result<Session, StorageError>;
    async fn update(&self, session: &Session) -> Result<(), StorageError>;
    /// Deleting an unknown id is not an error.
    async fn delete(&self, id: &str) -> Result<(), StorageError>;
    /// Removes every session whose `expires_at` is before `now` and returns how many went.
    async fn delete_expired(&self, now: u64) -> Result<usize, StorageError>;
}

/// Storage contract for the service registry.
#[async_trait]
pub trait RegistryRepository: Send + Sync {
    /// Insert or overwrite by id.
    async fn register(&self, record: &ServiceRecord) -> Result<(), StorageError>;
    async fn deregister(&self, id: &str) -> Result<(), StorageError>;
    async fn get(&self, id: &str) -> Result<ServiceRecord, StorageError>;
    async fn list(&self) -> Result<Vec<ServiceRecord>, StorageError>;
    async fn update(&self, record: &ServiceRecord) -> Result<(), StorageError>;
}
