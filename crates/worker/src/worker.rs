//! The worker runtime.
//!
//! One `Worker` drives one process: it claims leased jobs through the
//! [`LeaseManager`], executes handlers as concurrent tasks, acknowledges
//! outcomes, and keeps leases alive via heartbeat. Lifecycle:
//! `Starting -> Running -> Draining -> Stopped`; a drain stops claiming,
//! waits out in-flight jobs up to the grace period, then cancels what
//! remains and lets the reaper recover the leases.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use forgeq_core::{JobId, WorkerId};
use forgeq_events::{JobEvent, Telemetry};
use forgeq_infra::store::JobStore;
use forgeq_infra::Config;
use forgeq_queue::{
    truncate_error, AckOutcome, HandlerError, HandlerRegistry, Job, JobContext, RetryPolicy,
};

use crate::lease::{LeaseConfig, LeaseManager};

/// Consecutive transient storage failures on the claim path before the
/// worker exits non-zero for the orchestrator to restart it.
const MAX_CONSECUTIVE_STORAGE_FAILURES: u32 = 10;

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    /// The registry is empty; a worker with nothing to dispatch to is a
    /// deployment mistake.
    #[error("no job handlers registered")]
    NoHandlers,

    /// The claim path failed too many times in a row.
    #[error("storage unavailable after {failures} consecutive failures: {last}")]
    StorageUnavailable { failures: u32, last: String },
}

/// Counters for one worker's lifetime.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct WorkerStats {
    pub processed: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    /// Jobs given up without an ack: lost leases, cancellations, storage
    /// failures on the ack path.
    pub surrendered: u64,
}

/// Shared view of a worker's stats, usable after the worker is consumed by
/// [`Worker::run`].
#[derive(Debug, Clone)]
pub struct StatsHandle {
    inner: Arc<Mutex<WorkerStats>>,
}

impl StatsHandle {
    pub fn snapshot(&self) -> WorkerStats {
        *self.inner.lock().unwrap()
    }
}

#[derive(Debug)]
struct InFlight {
    lease_expires_at: DateTime<Utc>,
    cancel: CancellationToken,
}

/// Everything a job task needs; cloned into each spawned execution.
struct ExecEnv<S> {
    store: Arc<S>,
    registry: Arc<HandlerRegistry>,
    worker_id: WorkerId,
    retry_policy: RetryPolicy,
    telemetry: Telemetry,
    in_flight: Arc<Mutex<HashMap<JobId, InFlight>>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl<S> Clone for ExecEnv<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            registry: self.registry.clone(),
            worker_id: self.worker_id.clone(),
            retry_policy: self.retry_policy.clone(),
            telemetry: self.telemetry.clone(),
            in_flight: self.in_flight.clone(),
            stats: self.stats.clone(),
        }
    }
}

/// A long-running job processor.
pub struct Worker<S> {
    lease: LeaseManager<S>,
    env: ExecEnv<S>,
    max_in_flight: usize,
    grace_period: Duration,
    heartbeat_interval: Duration,
    state: WorkerState,
}

impl<S: JobStore + 'static> Worker<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<HandlerRegistry>,
        worker_id: WorkerId,
        config: &Config,
        telemetry: Telemetry,
    ) -> Self {
        let lease = LeaseManager::new(store.clone(), worker_id.clone(), LeaseConfig::from(config));
        let env = ExecEnv {
            store,
            registry,
            worker_id,
            retry_policy: config.retry_policy(),
            telemetry,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            stats: Arc::new(Mutex::new(WorkerStats::default())),
        };
        Self {
            lease,
            env,
            max_in_flight: config.worker_max_in_flight.max(1),
            grace_period: config.grace_period,
            heartbeat_interval: config.heartbeat_interval(),
            state: WorkerState::Starting,
        }
    }

    pub fn stats_handle(&self) -> StatsHandle {
        StatsHandle {
            inner: self.env.stats.clone(),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Run until `shutdown` fires, then drain.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), WorkerError> {
        if self.env.registry.is_empty() {
            return Err(WorkerError::NoHandlers);
        }

        tracing::info!(
            worker_id = %self.lease.worker_id(),
            max_in_flight = self.max_in_flight,
            "worker starting"
        );
        self.state = WorkerState::Running;

        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut storage_failures: u32 = 0;
        let mut next_poll = Duration::ZERO;

        enum Tick {
            Shutdown,
            Heartbeat,
            TaskDone,
            Poll,
        }

        loop {
            let capacity = self.max_in_flight.saturating_sub(tasks.len());

            let tick = tokio::select! {
                biased;
                _ = shutdown.cancelled() => Tick::Shutdown,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "job task aborted");
                    }
                    Tick::TaskDone
                }
                _ = heartbeat.tick() => Tick::Heartbeat,
                _ = tokio::time::sleep(next_poll), if capacity > 0 => Tick::Poll,
            };

            match tick {
                Tick::Shutdown => {
                    self.state = WorkerState::Draining;
                    tracing::info!("drain requested; claiming stopped");
                    break;
                }
                Tick::TaskDone => {
                    // Capacity freed; claim again on the next poll tick.
                    next_poll = Duration::ZERO;
                }
                Tick::Heartbeat => self.run_heartbeat().await,
                Tick::Poll => match self.lease.claim(capacity).await {
                    Ok(jobs) if jobs.is_empty() => {
                        next_poll = self.lease.next_idle_delay();
                    }
                    Ok(jobs) => {
                        storage_failures = 0;
                        next_poll = Duration::ZERO;
                        for job in jobs {
                            self.spawn_job(&mut tasks, job);
                        }
                    }
                    Err(e) => {
                        if e.is_transient() {
                            storage_failures += 1;
                            if storage_failures >= MAX_CONSECUTIVE_STORAGE_FAILURES {
                                tracing::error!(
                                    error = %e,
                                    failures = storage_failures,
                                    "storage unavailable past threshold; exiting"
                                );
                                return Err(WorkerError::StorageUnavailable {
                                    failures: storage_failures,
                                    last: e.to_string(),
                                });
                            }
                        }
                        tracing::warn!(error = %e, "claim failed");
                        next_poll = self.lease.next_idle_delay();
                    }
                },
            }
        }

        self.drain(tasks).await;
        self.state = WorkerState::Stopped;
        tracing::info!(worker_id = %self.lease.worker_id(), "worker stopped");
        Ok(())
    }

    /// Await outstanding jobs up to the grace period, keeping their leases
    /// alive; past the deadline, cancel and abandon them to the reaper.
    async fn drain(&mut self, mut tasks: JoinSet<()>) {
        if tasks.is_empty() {
            return;
        }

        tracing::info!(
            outstanding = tasks.len(),
            grace_secs = self.grace_period.as_secs(),
            "draining"
        );

        let deadline = tokio::time::Instant::now() + self.grace_period;
        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let timed_out = tokio::select! {
                joined = tasks.join_next() => {
                    match joined {
                        Some(_) if tasks.is_empty() => return,
                        Some(_) => false,
                        None => return,
                    }
                }
                _ = heartbeat.tick() => false,
                _ = tokio::time::sleep_until(deadline) => true,
            };

            if timed_out {
                break;
            }
            // Heartbeat outside the select so `self` is not borrowed twice.
            self.run_heartbeat().await;
        }

        tracing::warn!(
            outstanding = tasks.len(),
            "grace period elapsed; cancelling remaining jobs"
        );
        for entry in self.env.in_flight.lock().unwrap().values() {
            entry.cancel.cancel();
        }

        // A short window for cancelled handlers to unwind, then abort.
        let settle = async {
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(Duration::from_secs(1), settle).await.is_err() {
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }

    async fn run_heartbeat(&mut self) {
        let leases: Vec<(JobId, DateTime<Utc>)> = {
            let in_flight = self.env.in_flight.lock().unwrap();
            in_flight
                .iter()
                .map(|(id, f)| (*id, f.lease_expires_at))
                .collect()
        };
        if leases.is_empty() {
            return;
        }

        match self.lease.heartbeat(&leases).await {
            Ok(report) => {
                let mut in_flight = self.env.in_flight.lock().unwrap();
                for (id, expiry) in report.extended {
                    if let Some(f) = in_flight.get_mut(&id) {
                        f.lease_expires_at = expiry;
                    }
                }
                for id in report.lost {
                    // The job is someone else's problem now: cancel the
                    // handler and ignore whatever it returns.
                    if let Some(f) = in_flight.remove(&id) {
                        f.cancel.cancel();
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "heartbeat failed"),
        }
    }

    fn spawn_job(&self, tasks: &mut JoinSet<()>, job: Job) {
        let cancel = CancellationToken::new();
        self.env.in_flight.lock().unwrap().insert(
            job.id,
            InFlight {
                lease_expires_at: job.lease_expires_at.unwrap_or_else(Utc::now),
                cancel: cancel.clone(),
            },
        );
        tasks.spawn(execute_job(self.env.clone(), job, cancel));
    }
}

/// How one execution ended, for the stats counters.
enum ExecOutcome {
    Completed,
    Retried,
    DeadLettered,
    Surrendered,
}

async fn execute_job<S: JobStore>(env: ExecEnv<S>, job: Job, cancel: CancellationToken) {
    let job_id = job.id;
    let outcome = run_one(&env, job, cancel).await;

    env.in_flight.lock().unwrap().remove(&job_id);
    let mut stats = env.stats.lock().unwrap();
    stats.processed += 1;
    match outcome {
        ExecOutcome::Completed => stats.succeeded += 1,
        ExecOutcome::Retried => stats.retried += 1,
        ExecOutcome::DeadLettered => stats.dead_lettered += 1,
        ExecOutcome::Surrendered => stats.surrendered += 1,
    }
}

async fn run_one<S: JobStore>(env: &ExecEnv<S>, job: Job, cancel: CancellationToken) -> ExecOutcome {
    let Some(job_type) = job.job_type().map(str::to_owned) else {
        return ack_fatal(env, &job, "payload has no job_type discriminator").await;
    };
    let Some(handler) = env.registry.get(&job_type) else {
        tracing::warn!(job_id = %job.id, job_type = %job_type, "no handler registered for job type");
        return ack_fatal(
            env,
            &job,
            &format!("no handler registered for job type: {job_type}"),
        )
        .await;
    };

    match env.store.start(job.id, &env.worker_id).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(job_id = %job.id, "lease lost before start; surrendering job");
            return ExecOutcome::Surrendered;
        }
        Err(e) => {
            tracing::warn!(job_id = %job.id, error = %e, "could not start job; surrendering");
            return ExecOutcome::Surrendered;
        }
    }

    env.telemetry.emit(JobEvent::started(
        job.id,
        job.tenant_id.clone(),
        &env.worker_id,
        job.attempt,
    ));
    tracing::info!(
        job_id = %job.id,
        tenant_id = %job.tenant_id,
        job_type = %job_type,
        attempt = job.attempt,
        "executing job"
    );

    let ctx = JobContext {
        job_id: job.id,
        tenant_id: job.tenant_id.clone(),
        attempt: job.attempt,
        max_attempts: job.max_attempts,
        payload: job.payload.clone(),
        lease_expires_at: job.lease_expires_at.unwrap_or_else(Utc::now),
    };

    // The handler runs on its own task so a panic is contained and reported
    // as an ordinary failure.
    let mut handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { handler.run(ctx, cancel).await })
    };

    let result: Result<(), HandlerError> = tokio::select! {
        joined = &mut handle => match joined {
            Ok(result) => result,
            Err(join_err) => Err(HandlerError::new(format!("handler panicked: {join_err}"))),
        },
        _ = cancel.cancelled() => {
            // Drain or lease loss. The outcome is void either way; stop
            // waiting and let the lease lapse.
            handle.abort();
            tracing::warn!(job_id = %job.id, "job cancelled; surrendering without ack");
            return ExecOutcome::Surrendered;
        }
    };

    match result {
        Ok(()) => match env.store.ack_success(job.id, &env.worker_id).await {
            Ok(true) => {
                env.telemetry
                    .emit(JobEvent::completed(job.id, job.tenant_id.clone()));
                tracing::info!(job_id = %job.id, "job succeeded");
                ExecOutcome::Completed
            }
            Ok(false) => {
                // The work is done but unrecorded: the job will run again
                // somewhere. Not a failure; handlers are idempotent by
                // contract.
                tracing::warn!(job_id = %job.id, "success ack rejected: lease lost; job may re-execute");
                env.telemetry.emit(JobEvent::at_least_once_warning(
                    job.id,
                    job.tenant_id.clone(),
                    &env.worker_id,
                ));
                ExecOutcome::Surrendered
            }
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "success ack failed; job may re-execute");
                env.telemetry.emit(JobEvent::at_least_once_warning(
                    job.id,
                    job.tenant_id.clone(),
                    &env.worker_id,
                ));
                ExecOutcome::Surrendered
            }
        },
        Err(err) => {
            let message = truncate_error(&err.message);
            match env
                .store
                .ack_failure(job.id, &env.worker_id, &message, &env.retry_policy)
                .await
            {
                Ok(AckOutcome::Retried { next_attempt_at }) => {
                    tracing::info!(
                        job_id = %job.id,
                        attempt = job.attempt,
                        next_attempt_at = %next_attempt_at,
                        error = %message,
                        "job failed; queued for retry"
                    );
                    env.telemetry.emit(JobEvent::retried(
                        job.id,
                        job.tenant_id.clone(),
                        &message,
                        job.attempt,
                        next_attempt_at,
                    ));
                    ExecOutcome::Retried
                }
                Ok(AckOutcome::DeadLettered) => {
                    tracing::warn!(job_id = %job.id, error = %message, "job dead-lettered");
                    env.telemetry.emit(JobEvent::dead_lettered(
                        job.id,
                        job.tenant_id.clone(),
                        &message,
                        job.attempt,
                    ));
                    ExecOutcome::DeadLettered
                }
                Ok(AckOutcome::LeaseLost) => {
                    tracing::warn!(job_id = %job.id, "failure ack rejected: lease lost");
                    ExecOutcome::Surrendered
                }
                Err(e) => {
                    tracing::warn!(job_id = %job.id, error = %e, "failure ack failed; surrendering");
                    ExecOutcome::Surrendered
                }
            }
        }
    }
}

/// Terminal failure: straight to the dead-letter state.
async fn ack_fatal<S: JobStore>(env: &ExecEnv<S>, job: &Job, reason: &str) -> ExecOutcome {
    match env.store.ack_fatal(job.id, &env.worker_id, reason).await {
        Ok(AckOutcome::DeadLettered) => {
            env.telemetry.emit(JobEvent::dead_lettered(
                job.id,
                job.tenant_id.clone(),
                reason,
                job.max_attempts,
            ));
            ExecOutcome::DeadLettered
        }
        Ok(_) => {
            tracing::warn!(job_id = %job.id, "fatal ack rejected: lease lost");
            ExecOutcome::Surrendered
        }
        Err(e) => {
            tracing::warn!(job_id = %job.id, error = %e, "fatal ack failed; surrendering");
            ExecOutcome::Surrendered
        }
    }
}
