//! Job persistence.
//!
//! The store exclusively owns row mutation. Every operation is a single
//! database transaction; no locks are held across operation boundaries, and
//! no operation blocks on rows locked by a concurrent worker (claim and
//! reclaim use lock-skip semantics).

pub mod in_memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use forgeq_core::{JobId, TenantId, WorkerId};
use forgeq_queue::{AckOutcome, Job, JobSpec, JobStatus, ReclaimOutcome, RetryPolicy};

pub use in_memory::InMemoryJobStore;
pub use postgres::PostgresJobStore;

/// Candidate multiplier for the claim query. Locking more rows than the
/// batch size leaves room for candidates skipped by the tenant cap.
pub const CLAIM_OVERSCAN: usize = 3;

/// Storage-layer error.
///
/// Kept separate from [`forgeq_core::DomainError`]: these are infrastructure
/// failures, not business failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection loss, pool exhaustion. Transient; callers retry with
    /// backoff.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The query itself failed (constraint, syntax, unexpected shape).
    #[error("storage query failed: {0}")]
    Query(String),

    /// A row came back in a shape we cannot decode.
    #[error("row decode failed: {0}")]
    Decode(String),

    /// The job does not exist.
    #[error("job not found")]
    NotFound,

    /// The operation is not legal from the job's current status.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl StoreError {
    /// Whether retrying the same call later can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Per-status row counts, optionally scoped to one tenant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub queued: u64,
    pub leased: u64,
    pub running: u64,
    pub succeeded: u64,
    pub dead_letter: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.queued + self.leased + self.running + self.succeeded + self.dead_letter
    }

    /// Rows currently counting against tenant concurrency.
    pub fn in_flight(&self) -> u64 {
        self.leased + self.running
    }

    pub(crate) fn record(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Queued => self.queued += count,
            JobStatus::Leased => self.leased += count,
            JobStatus::Running => self.running += count,
            JobStatus::Succeeded => self.succeeded += count,
            JobStatus::DeadLetter => self.dead_letter += count,
            // Never persisted; tolerated here so decoding stays total.
            JobStatus::Failed => {}
        }
    }
}

/// One page of a job listing.
#[derive(Debug, Clone)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    /// Total matching rows, independent of pagination.
    pub total: u64,
}

/// A lease reclaimed by the reaper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimedJob {
    pub job_id: JobId,
    pub tenant_id: TenantId,
    pub outcome: ReclaimOutcome,
}

/// Transactional job persistence.
///
/// Implementations must uphold, at every transaction boundary:
/// - one row per (tenant, idempotency key);
/// - lease fields non-null exactly when status is leased/running;
/// - `attempt <= max_attempts`;
/// - dead-letter rows carry a non-null `last_error`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job unless one already exists for the spec's
    /// (tenant, idempotency key). Returns the persisted row and whether this
    /// call created it. A duplicate is not an error.
    async fn insert_if_absent(&self, spec: JobSpec) -> Result<(Job, bool), StoreError>;

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, StoreError>;

    /// Tenant-scoped listing, newest first.
    async fn list(
        &self,
        tenant_id: &TenantId,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<JobPage, StoreError>;

    /// The claim hot path. Atomically leases up to `batch_size` eligible
    /// jobs for `worker_id`, incrementing each job's attempt counter.
    ///
    /// Eligibility: `status = queued AND scheduled_at <= now`, minus
    /// candidates whose tenant already has `tenant_concurrency_limit` jobs
    /// in flight. Returned jobs are ordered by (priority weight descending,
    /// `scheduled_at` ascending); no order is promised across calls.
    /// Concurrent claimers never block each other and never receive
    /// overlapping batches.
    async fn claim_batch(
        &self,
        worker_id: &WorkerId,
        batch_size: usize,
        lease_duration: Duration,
        tenant_concurrency_limit: u32,
    ) -> Result<Vec<Job>, StoreError>;

    /// Guarded `leased -> running` transition, taken when execution begins.
    /// False means the lease is no longer held.
    async fn start(&self, job_id: JobId, worker_id: &WorkerId) -> Result<bool, StoreError>;

    /// Heartbeat. Extends a live lease owned by `worker_id`; false means the
    /// lease expired or was reassigned, and the worker must surrender the
    /// job.
    async fn extend_lease(
        &self,
        job_id: JobId,
        worker_id: &WorkerId,
        new_expiry: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Guarded success ack. False means the lease was lost; the job may be
    /// re-executed elsewhere and this worker must not assume its outcome.
    async fn ack_success(&self, job_id: JobId, worker_id: &WorkerId) -> Result<bool, StoreError>;

    /// Guarded failure ack: requeues with backoff while attempts remain,
    /// otherwise promotes to the dead-letter state.
    async fn ack_failure(
        &self,
        job_id: JobId,
        worker_id: &WorkerId,
        error: &str,
        retry_policy: &RetryPolicy,
    ) -> Result<AckOutcome, StoreError>;

    /// Guarded terminal failure ack: straight to the dead-letter state,
    /// bypassing remaining attempts. Used when retrying cannot help
    /// (no handler registered for the job type).
    async fn ack_fatal(
        &self,
        job_id: JobId,
        worker_id: &WorkerId,
        error: &str,
    ) -> Result<AckOutcome, StoreError>;

    /// Crash recovery. Returns up to `max_batch` jobs whose lease expired at
    /// or before `now` to the queue (immediately claimable), or to the
    /// dead-letter state when their attempts are exhausted.
    async fn reclaim_expired(
        &self,
        now: DateTime<Utc>,
        max_batch: usize,
    ) -> Result<Vec<ReclaimedJob>, StoreError>;

    /// Administrative revive of a dead-lettered job. With `reset_attempts`
    /// the attempt counter restarts at zero; otherwise exactly one further
    /// attempt is granted.
    async fn revive_from_dead_letter(
        &self,
        job_id: JobId,
        reset_attempts: bool,
    ) -> Result<Job, StoreError>;

    /// Row counts by status, optionally scoped to one tenant. Cheap read.
    async fn counts_by_state(
        &self,
        tenant_id: Option<&TenantId>,
    ) -> Result<StatusCounts, StoreError>;

    /// Number of queued jobs, optionally scoped to one tenant.
    async fn queue_depth(&self, tenant_id: Option<&TenantId>) -> Result<u64, StoreError>;
}
