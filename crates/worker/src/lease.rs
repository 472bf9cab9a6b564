//! Claim policy and lease upkeep.
//!
//! The lease manager is the worker's only path to the store's claim and
//! heartbeat operations: it decides how many jobs to request, how long to
//! back off when the queue is empty, and which leases are due for renewal.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use forgeq_core::{JobId, WorkerId};
use forgeq_infra::store::{JobStore, StoreError};
use forgeq_infra::Config;
use forgeq_queue::Job;

/// Empty-poll backoff: doubles per empty result, resets on work.
///
/// Keeps idle workers from hammering the database while bounding how stale a
/// worker can be when new work arrives.
#[derive(Debug, Clone)]
pub struct PollBackoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl PollBackoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            current: min,
        }
    }

    /// The delay to sleep now; doubles the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

/// Claim-side settings, extracted from [`Config`].
#[derive(Debug, Clone)]
pub struct LeaseConfig {
    pub lease_duration: Duration,
    pub heartbeat_fraction: f64,
    pub batch_size: usize,
    pub tenant_concurrency_limit: u32,
    pub poll_interval_min: Duration,
    pub poll_interval_max: Duration,
}

impl From<&Config> for LeaseConfig {
    fn from(config: &Config) -> Self {
        Self {
            lease_duration: config.lease_duration,
            heartbeat_fraction: config.heartbeat_fraction,
            batch_size: config.worker_batch_size,
            tenant_concurrency_limit: config.tenant_concurrency_limit,
            poll_interval_min: config.poll_interval_min,
            poll_interval_max: config.poll_interval_max,
        }
    }
}

/// Result of one heartbeat pass.
#[derive(Debug, Default)]
pub struct HeartbeatReport {
    /// Leases renewed, with their new expiry.
    pub extended: Vec<(JobId, DateTime<Utc>)>,
    /// Leases the store no longer recognizes as ours. The jobs are orphaned:
    /// their handlers must be cancelled and their outcomes ignored.
    pub lost: Vec<JobId>,
}

/// Bridges the store's claim protocol to one worker.
pub struct LeaseManager<S> {
    store: Arc<S>,
    worker_id: WorkerId,
    config: LeaseConfig,
    backoff: PollBackoff,
}

impl<S: JobStore> LeaseManager<S> {
    pub fn new(store: Arc<S>, worker_id: WorkerId, config: LeaseConfig) -> Self {
        let backoff = PollBackoff::new(config.poll_interval_min, config.poll_interval_max);
        Self {
            store,
            worker_id,
            config,
            backoff,
        }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    pub fn lease_duration(&self) -> Duration {
        self.config.lease_duration
    }

    /// Claim up to `capacity` jobs (bounded by the configured batch size).
    /// A non-empty result resets the empty-poll backoff.
    pub async fn claim(&mut self, capacity: usize) -> Result<Vec<Job>, StoreError> {
        let batch = self.config.batch_size.min(capacity);
        let jobs = self
            .store
            .claim_batch(
                &self.worker_id,
                batch,
                self.config.lease_duration,
                self.config.tenant_concurrency_limit,
            )
            .await?;

        if !jobs.is_empty() {
            self.backoff.reset();
        }
        Ok(jobs)
    }

    /// How long to wait before polling again after an empty claim.
    pub fn next_idle_delay(&mut self) -> Duration {
        self.backoff.next_delay()
    }

    /// Renew every lease whose remaining time is below
    /// `heartbeat_fraction × lease_duration`.
    pub async fn heartbeat(
        &self,
        leases: &[(JobId, DateTime<Utc>)],
    ) -> Result<HeartbeatReport, StoreError> {
        let now = Utc::now();
        let threshold = self.config.lease_duration.mul_f64(self.config.heartbeat_fraction);
        let renewal = chrono::Duration::from_std(self.config.lease_duration)
            .map_err(|e| StoreError::Query(format!("lease duration out of range: {e}")))?;

        let mut report = HeartbeatReport::default();
        for (job_id, expires_at) in leases {
            let remaining = (*expires_at - now).to_std().unwrap_or(Duration::ZERO);
            if remaining >= threshold {
                continue;
            }

            let new_expiry = now + renewal;
            if self
                .store
                .extend_lease(*job_id, &self.worker_id, new_expiry)
                .await?
            {
                tracing::debug!(job_id = %job_id, "lease extended");
                report.extended.push((*job_id, new_expiry));
            } else {
                tracing::warn!(job_id = %job_id, "lease lost during heartbeat");
                report.lost.push(*job_id);
            }
        }
        Ok(report)
    }
}
