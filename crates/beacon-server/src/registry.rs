//! Service registry and its health monitor.
//!
//! Status transitions per record:
//!
//! - `healthy -> unhealthy` when heartbeats stop (no health-check URL) for
//!   longer than twice the monitor interval, or when a probe fails;
//! - `unhealthy -> healthy` on a heartbeat or a successful probe;
//! - `unknown` only exists for records seeded outside of `register`.

use std::sync::Arc;
use std::time::Duration;

use beacon_core::time::duration_millis;
use beacon_core::{
    Clock, HealthStatus, RegistryError, RegistryRepository, ServiceRecord, StorageError,
};
use futures::stream::{self, StreamExt};
use metrics::counter;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RegistryConfig;
use crate::health::{HealthProber, ProbeOutcome};
use crate::worker;

/// What one health sweep changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub checked: usize,
    pub probed: usize,
    pub marked_unhealthy: usize,
    pub recovered: usize,
}

pub struct Registry {
    repo: Arc<dyn RegistryRepository>,
    clock: Arc<dyn Clock>,
    prober: Arc<dyn HealthProber>,
    interval: Duration,
    max_concurrent_probes: usize,
}

enum Transition {
    Applied,
    Skipped,
}

impl Registry {
    pub fn new(
        repo: Arc<dyn RegistryRepository>,
        clock: Arc<dyn Clock>,
        prober: Arc<dyn HealthProber>,
        config: &RegistryConfig,
    ) -> Self {
        Self {
            repo,
            clock,
            prober,
            interval: config.health_check_interval(),
            max_concurrent_probes: config.max_concurrent_probes,
        }
    }

    /// Upsert a record. A registering service is assumed live.
    pub async fn register(&self, mut record: ServiceRecord) -> Result<ServiceRecord, RegistryError> {
        let now = self.clock.now_millis();
        record.registered_at = now;
        record.last_heartbeat = now;
        record.status = HealthStatus::Healthy;

        if let Err(e) = self.repo.register(&record).await {
            error!(error = %e, service = %record.name, "failed to register service");
            return Err(e.into());
        }

        info!(
            service_id = %record.id,
            name = %record.name,
            version = %record.version,
            "service registered"
        );
        Ok(record)
    }

    pub async fn deregister(&self, id: &str) -> Result<(), RegistryError> {
        if let Err(e) = self.repo.deregister(id).await {
            error!(error = %e, service_id = id, "failed to deregister service");
            return Err(e.into());
        }
        info!(service_id = id, "service deregistered");
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<ServiceRecord, RegistryError> {
        Ok(self.repo.get(id).await?)
    }

    pub async fn list(&self) -> Result<Vec<ServiceRecord>, RegistryError> {
        Ok(self.repo.list().await?)
    }

    /// Healthy records advertising `capability`; an empty capability matches all.
    pub async fn discover(&self, capability: &str) -> Result<Vec<ServiceRecord>, RegistryError> {
        let records = self.list().await?;
        Ok(records
            .into_iter()
            .filter(|r| r.is_healthy() && r.has_capability(capability))
            .collect())
    }

    pub async fn heartbeat(&self, id: &str) -> Result<ServiceRecord, RegistryError> {
        let mut record = self.repo.get(id).await?;
        let was = record.status;
        record.update_heartbeat(self.clock.now_millis());

        if let Err(e) = self.repo.update(&record).await {
            error!(error = %e, service_id = id, "failed to update heartbeat");
            return Err(e.into());
        }

        if was != HealthStatus::Healthy {
            counter!("beacon_health_transitions_total", "to" => "healthy").increment(1);
            info!(service_id = id, from = %was, "service recovered (heartbeat)");
        }
        Ok(record)
    }

    /// Heartbeat silence tolerated before a record is marked unhealthy.
    pub fn heartbeat_tolerance(&self) -> Duration {
        self.interval * 2
    }

    /// One pass of the health monitor over every record.
    pub async fn run_health_sweep(&self) -> Result<SweepSummary, RegistryError> {
        let records = self.repo.list().await?;
        let now = self.clock.now_millis();
        let tolerance = duration_millis(self.heartbeat_tolerance());

        let mut summary = SweepSummary {
            checked: records.len(),
            ..Default::default()
        };
        let mut probe_targets = Vec::new();

        for record in records {
            match record.health_check_url.clone() {
                None => {
                    if record.status != HealthStatus::Unhealthy
                        && record.heartbeat_overdue(now, tolerance)
                    {
                        let applied = self
                            .transition(&record.id, HealthStatus::Unhealthy, |r| {
                                r.status != HealthStatus::Unhealthy
                                    && r.heartbeat_overdue(now, tolerance)
                            })
                            .await;
                        if let Transition::Applied = applied {
                            summary.marked_unhealthy += 1;
                            warn!(
                                service_id = %record.id,
                                name = %record.name,
                                "service marked unhealthy (heartbeat timeout)"
                            );
                        }
                    }
                }
                Some(url) => probe_targets.push((record, url)),
            }
        }

        summary.probed = probe_targets.len();
        let limit = match self.max_concurrent_probes {
            0 => usize::MAX,
            n => n,
        };

        let outcomes: Vec<Option<HealthStatus>> = stream::iter(probe_targets)
            .map(|(record, url)| self.probe_service(record, url))
            .buffer_unordered(limit)
            .collect()
            .await;

        for outcome in outcomes.into_iter().flatten() {
            match outcome {
                HealthStatus::Healthy => summary.recovered += 1,
                _ => summary.marked_unhealthy += 1,
            }
        }

        Ok(summary)
    }

    /// Probe one service and persist any resulting transition.
    /// Returns the new status when one was applied.
    async fn probe_service(&self, record: ServiceRecord, url: String) -> Option<HealthStatus> {
        match self.prober.probe(&url).await {
            ProbeOutcome::Healthy => {
                if record.status == HealthStatus::Healthy {
                    return None;
                }
                match self
                    .transition(&record.id, HealthStatus::Healthy, |r| {
                        r.status != HealthStatus::Healthy
                    })
                    .await
                {
                    Transition::Applied => {
                        info!(service_id = %record.id, name = %record.name, "service recovered");
                        Some(HealthStatus::Healthy)
                    }
                    Transition::Skipped => None,
                }
            }
            ProbeOutcome::Unhealthy(reason) => {
                if record.status == HealthStatus::Unhealthy {
                    debug!(service_id = %record.id, %reason, "service still failing health check");
                    return None;
                }
                match self
                    .transition(&record.id, HealthStatus::Unhealthy, |r| {
                        r.status != HealthStatus::Unhealthy
                    })
                    .await
                {
                    Transition::Applied => {
                        warn!(
                            service_id = %record.id,
                            name = %record.name,
                            %reason,
                            "service health check failed"
                        );
                        Some(HealthStatus::Unhealthy)
                    }
                    Transition::Skipped => None,
                }
            }
        }
    }

    /// Re-read the record and move it to `to` if `applies` still holds.
    /// Records removed in the meantime are left alone.
    async fn transition<F>(&self, id: &str, to: HealthStatus, applies: F) -> Transition
    where
        F: Fn(&ServiceRecord) -> bool,
    {
        let mut record = match self.repo.get(id).await {
            Ok(record) => record,
            Err(StorageError::NotFound(_)) => {
                debug!(service_id = id, "service vanished before status change");
                return Transition::Skipped;
            }
            Err(e) => {
                error!(error = %e, service_id = id, "failed to load service for status change");
                return Transition::Skipped;
            }
        };
        if !applies(&record) {
            return Transition::Skipped;
        }

        record.set_health(to);
        match self.repo.update(&record).await {
            Ok(()) => {
                counter!("beacon_health_transitions_total", "to" => to.as_str()).increment(1);
                Transition::Applied
            }
            Err(StorageError::NotFound(_)) => Transition::Skipped,
            Err(e) => {
                error!(error = %e, service_id = id, status = %to, "failed to persist status change");
                Transition::Skipped
            }
        }
    }

    /// Start the periodic health monitor.
    pub fn spawn_health_monitor(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        worker::spawn_periodic("health-monitor", self.interval, cancel, move || {
            let registry = Arc::clone(&registry);
            async move {
                match registry.run_health_sweep().await {
                    Ok(summary) => debug!(?summary, "health sweep finished"),
                    Err(e) => error!(error = %e, "failed to list services for health check"),
                }
            }
        })
    }
}
