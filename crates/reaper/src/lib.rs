//! `forgeq-reaper` — crash recovery for abandoned leases.
//!
//! The reaper is the only path by which an expired lease changes state:
//! without it, a crashed worker's jobs would sit in `leased` forever. One
//! instance per cluster is enough; a second is safe (reclaim uses lock-skip
//! row locks, so sweeps never double-reclaim) but wastes cycles. The
//! worst-case extra delay a crashed worker adds to a job is
//! `lease_duration + reaper_interval`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use forgeq_events::{JobEvent, Telemetry};
use forgeq_infra::store::{JobStore, ReclaimedJob, StoreError};
use forgeq_infra::Config;
use forgeq_queue::ReclaimOutcome;

/// Error backoff bounds for the sweep loop. The reaper never exits on
/// storage failures; it is the recovery mechanism and must outlive outages.
const ERROR_BACKOFF_MIN: Duration = Duration::from_secs(1);
const ERROR_BACKOFF_MAX: Duration = Duration::from_secs(60);

/// Periodic sweeper returning expired leases to the queue (or to the
/// dead-letter state when attempts are exhausted).
pub struct Reaper<S> {
    store: Arc<S>,
    interval: Duration,
    batch: usize,
    telemetry: Telemetry,
}

impl<S: JobStore> Reaper<S> {
    pub fn new(store: Arc<S>, config: &Config, telemetry: Telemetry) -> Self {
        Self {
            store,
            interval: config.reaper_interval,
            batch: config.reaper_batch,
            telemetry,
        }
    }

    /// Sweep until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            batch = self.batch,
            "reaper starting"
        );

        let mut error_backoff = ERROR_BACKOFF_MIN;

        loop {
            let sleep_for = match self.run_once().await {
                Ok(reclaimed) => {
                    error_backoff = ERROR_BACKOFF_MIN;
                    if !reclaimed.is_empty() {
                        tracing::info!(count = reclaimed.len(), "reclaimed expired leases");
                    }
                    self.interval
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_in_secs = error_backoff.as_secs(),
                        "sweep failed; backing off"
                    );
                    let delay = error_backoff;
                    error_backoff = (error_backoff * 2).min(ERROR_BACKOFF_MAX);
                    delay
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }

        tracing::info!("reaper stopped");
    }

    /// One sweep: reclaim up to the batch limit and emit one telemetry
    /// event per reclaimed job.
    pub async fn run_once(&self) -> Result<Vec<ReclaimedJob>, StoreError> {
        let reclaimed = self.store.reclaim_expired(Utc::now(), self.batch).await?;

        for r in &reclaimed {
            let requeued = r.outcome == ReclaimOutcome::ReclaimedForRetry;
            tracing::info!(
                job_id = %r.job_id,
                tenant_id = %r.tenant_id,
                requeued,
                "lease expired"
            );
            self.telemetry.emit(JobEvent::lease_expired(
                r.job_id,
                r.tenant_id.clone(),
                requeued,
            ));
        }

        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeq_core::{TenantId, WorkerId};
    use forgeq_infra::store::InMemoryJobStore;
    use forgeq_queue::{JobSpec, JobStatus};
    use serde_json::json;

    fn spec(key: &str, max_attempts: u32) -> JobSpec {
        JobSpec::new(
            TenantId::new("t1").unwrap(),
            key,
            json!({"job_type": "echo", "data": {}}),
        )
        .with_max_attempts(max_attempts)
    }

    fn reaper(store: Arc<InMemoryJobStore>, telemetry: Telemetry) -> Reaper<InMemoryJobStore> {
        Reaper::new(store, &Config::default(), telemetry)
    }

    #[tokio::test]
    async fn sweep_requeues_expired_and_emits_one_event_per_job() {
        let store = Arc::new(InMemoryJobStore::new());
        let telemetry = Telemetry::new();
        let events = telemetry.subscribe();
        let w1 = WorkerId::new("W1").unwrap();

        let (retryable, _) = store.insert_if_absent(spec("a", 3)).await.unwrap();
        let (exhausted, _) = store.insert_if_absent(spec("b", 1)).await.unwrap();

        store
            .claim_batch(&w1, 10, Duration::from_secs(30), 10)
            .await
            .unwrap();
        let past = Utc::now() - chrono::Duration::seconds(1);
        store.set_lease_expiry(retryable.id, past);
        store.set_lease_expiry(exhausted.id, past);

        let reclaimed = reaper(store.clone(), telemetry).run_once().await.unwrap();
        assert_eq!(reclaimed.len(), 2);

        assert_eq!(
            store.get(retryable.id).await.unwrap().unwrap().status,
            JobStatus::Queued
        );
        assert_eq!(
            store.get(exhausted.id).await.unwrap().unwrap().status,
            JobStatus::DeadLetter
        );

        let emitted = events.drain();
        assert_eq!(emitted.len(), 2);
        assert!(emitted.iter().all(|e| e.event_type == "lease.expired"));
    }

    #[tokio::test]
    async fn sweep_with_nothing_expired_is_quiet() {
        let store = Arc::new(InMemoryJobStore::new());
        let telemetry = Telemetry::new();
        let events = telemetry.subscribe();

        store.insert_if_absent(spec("a", 3)).await.unwrap();

        let reclaimed = reaper(store.clone(), telemetry).run_once().await.unwrap();
        assert!(reclaimed.is_empty());
        assert!(events.drain().is_empty());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let store = Arc::new(InMemoryJobStore::new());
        let reaper = reaper(store, Telemetry::new());

        let shutdown = CancellationToken::new();
        shutdown.cancel();

        // Completes immediately: one sweep, then the cancelled branch wins.
        tokio::time::timeout(Duration::from_secs(2), reaper.run(shutdown))
            .await
            .expect("reaper did not stop on shutdown");
    }
}
