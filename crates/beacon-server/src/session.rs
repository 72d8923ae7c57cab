use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use beacon_core::time::{duration_millis, MAX_TIMESTAMP_MILLIS};
use beacon_core::{Clock, Session, SessionError, SessionRepository};
use metrics::counter;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::SessionConfig;
use crate::worker;

/// Session lifecycle on top of a [`SessionRepository`].
pub struct SessionStore {
    repo: Arc<dyn SessionRepository>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    cleanup_period: Duration,
}

impl SessionStore {
    pub fn new(repo: Arc<dyn SessionRepository>, clock: Arc<dyn Clock>, config: &SessionConfig) -> Self {
        Self {
            repo,
            clock,
            default_ttl: config.default_ttl(),
            cleanup_period: config.cleanup_period(),
        }
    }

    /// Create a session. A zero `ttl` means the configured default.
    pub async fn create(
        &self,
        user_id: &str,
        service_id: &str,
        data: HashMap<String, Value>,
        ttl: Duration,
    ) -> Result<Session, SessionError> {
        let ttl = if ttl.is_zero() { self.default_ttl } else { ttl };
        let now = self.clock.now_millis();
        let ttl_millis = duration_millis(ttl);
        if now
            .checked_add(ttl_millis)
            .is_none_or(|expires_at| expires_at > MAX_TIMESTAMP_MILLIS)
        {
            warn!(user_id, service_id, ttl_secs = ttl.as_secs(), "rejected session ttl out of range");
            return Err(SessionError::InvalidTtl(format!(
                "{}s puts expiry past the representable range",
                ttl.as_secs()
            )));
        }
        let session = Session::new(user_id, service_id, data, now, ttl_millis);

        if let Err(e) = self.repo.create(&session).await {
            error!(error = %e, user_id, service_id, "failed to create session");
            return Err(e.into());
        }

        info!(session_id = %session.id, user_id, service_id, "session created");
        Ok(session)
    }

    /// Fetch a live session. An expired record is reported as
    /// [`SessionError::Expired`] and left for the sweep to remove.
    pub async fn get(&self, id: &str) -> Result<Session, SessionError> {
        let session = self.repo.get(id).await?;
        if session.is_expired(self.clock.now_millis()) {
            warn!(session_id = id, "attempted to access expired session");
            return Err(SessionError::Expired(id.to_string()));
        }
        Ok(session)
    }

    /// Replace the session's data.
    ///
    /// Read and write are separate storage calls; a delete that lands in
    /// between surfaces as `NotFound`.
    pub async fn update(&self, id: &str, data: HashMap<String, Value>) -> Result<Session, SessionError> {
        let mut session = self.get(id).await?;
        session.data = data;
        session.touch(self.clock.now_millis());

        if let Err(e) = self.repo.update(&session).await {
            error!(error = %e, session_id = id, "failed to update session");
            return Err(e.into());
        }
        Ok(session)
    }

    pub async fn delete(&self, id: &str) -> Result<(), SessionError> {
        if let Err(e) = self.repo.delete(id).await {
            error!(error = %e, session_id = id, "failed to delete session");
            return Err(e.into());
        }
        info!(session_id = id, "session deleted");
        Ok(())
    }

    /// One cleanup sweep. Returns how many sessions were removed.
    pub async fn sweep_expired(&self) -> Result<usize, SessionError> {
        let removed = self.repo.delete_expired(self.clock.now_millis()).await?;
        counter!("beacon_sessions_expired_total").increment(removed as u64);
        Ok(removed)
    }

    /// Start the periodic cleanup task.
    pub fn spawn_cleanup(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        worker::spawn_periodic("session-cleanup", self.cleanup_period, cancel, move || {
            let store = Arc::clone(&store);
            async move {
                match store.sweep_expired().await {
                    Ok(0) => {}
                    Ok(count) => info!(count, "cleaned up expired sessions"),
                    Err(e) => error!(error = %e, "failed to delete expired sessions"),
                }
            }
        })
    }
}
