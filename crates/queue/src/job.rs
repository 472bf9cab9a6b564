//! The job entity and its lifecycle vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use forgeq_core::{DomainError, JobId, TenantId, WorkerId};

/// Upper bound on persisted error messages (bytes).
pub const MAX_ERROR_LEN: usize = 2048;

/// Default retry cap for submissions that do not specify one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Job lifecycle states.
///
/// Transitions:
/// - `Queued -> Leased` (claim)
/// - `Leased -> Running` (execution started)
/// - `Running -> Succeeded` (ack)
/// - `Running -> Queued` (retryable failure, rescheduled with backoff)
/// - `Running -> DeadLetter` (attempts exhausted)
/// - `Leased/Running -> Queued | DeadLetter` (lease expired, reaper)
/// - `DeadLetter -> Queued` (administrative revive)
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed.
    Queued,
    /// Claimed by a worker, execution not yet started.
    Leased,
    /// A worker is executing the handler.
    Running,
    /// Terminal: handler acknowledged success.
    Succeeded,
    /// Transient classification for a failed attempt. Never persisted: the
    /// same transaction either requeues the job or promotes it to
    /// `DeadLetter`.
    Failed,
    /// Terminal: retries exhausted; revivable administratively.
    DeadLetter,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Leased => "leased",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::DeadLetter => "dead_letter",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "leased" => Ok(JobStatus::Leased),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "dead_letter" => Ok(JobStatus::DeadLetter),
            other => Err(DomainError::validation(format!(
                "unknown job status: {other}"
            ))),
        }
    }

    /// Terminal states are immutable except for administrative revive.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::DeadLetter)
    }

    /// States that hold a lease and count against tenant concurrency.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, JobStatus::Leased | JobStatus::Running)
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claim-ordering priority. The weight is a sort key only; it never preempts
/// running work.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Critical,
    High,
    Normal,
    Low,
}

impl JobPriority {
    pub fn weight(&self) -> i16 {
        match self {
            JobPriority::Critical => 100,
            JobPriority::High => 10,
            JobPriority::Normal => 5,
            JobPriority::Low => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::Critical => "critical",
            JobPriority::High => "high",
            JobPriority::Normal => "normal",
            JobPriority::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "critical" => Ok(JobPriority::Critical),
            "high" => Ok(JobPriority::High),
            "normal" => Ok(JobPriority::Normal),
            "low" => Ok(JobPriority::Low),
            other => Err(DomainError::validation(format!(
                "unknown priority: {other} (expected critical|high|normal|low)"
            ))),
        }
    }
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

impl core::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job row. The single entity every component communicates through.
///
/// The store exclusively owns mutation; everything else reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub tenant_id: TenantId,
    /// Client-supplied key; (tenant_id, idempotency_key) is unique.
    pub idempotency_key: String,
    /// Opaque payload. The core reads only the top-level `job_type` string.
    pub payload: Value,
    pub status: JobStatus,
    pub priority: JobPriority,
    /// Prior execution attempts. Incremented by each claim.
    pub attempt: u32,
    pub max_attempts: u32,
    /// Earliest instant the job is eligible for claim.
    pub scheduled_at: DateTime<Utc>,
    pub lease_owner: Option<WorkerId>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Job {
    /// The handler-dispatch discriminator, if the payload carries one.
    pub fn job_type(&self) -> Option<&str> {
        self.payload.get("job_type").and_then(Value::as_str)
    }

    /// Whether another attempt is allowed after a failure.
    pub fn is_retryable(&self) -> bool {
        self.attempt < self.max_attempts
    }

    pub fn is_lease_expired(&self, now: DateTime<Utc>) -> bool {
        match self.lease_expires_at {
            Some(at) => at <= now,
            None => true,
        }
    }
}

/// A validated submission, ready for `insert_if_absent`.
///
/// Construction goes through the submitter, which owns validation; tests may
/// build specs directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub tenant_id: TenantId,
    pub idempotency_key: String,
    pub payload: Value,
    pub priority: JobPriority,
    pub max_attempts: u32,
    /// `None` means eligible immediately.
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl JobSpec {
    pub fn new(tenant_id: TenantId, idempotency_key: impl Into<String>, payload: Value) -> Self {
        Self {
            tenant_id,
            idempotency_key: idempotency_key.into(),
            payload,
            priority: JobPriority::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            scheduled_at: None,
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }
}

/// Outcome of acknowledging a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// Requeued with backoff; next attempt no earlier than the given instant.
    Retried { next_attempt_at: DateTime<Utc> },
    /// Attempts exhausted; the job is now in the dead-letter state.
    DeadLettered,
    /// The guard failed: the lease expired or belongs to another worker.
    /// The job's outcome is unknown to this worker and must not be assumed.
    LeaseLost,
}

/// Outcome of reclaiming one expired lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReclaimOutcome {
    /// Returned to `queued`, immediately claimable.
    ReclaimedForRetry,
    /// Attempts exhausted; promoted to `dead_letter`.
    ReclaimedToDeadLetter,
}

/// Truncate an error message to [`MAX_ERROR_LEN`] bytes on a char boundary.
pub fn truncate_error(error: &str) -> String {
    if error.len() <= MAX_ERROR_LEN {
        return error.to_string();
    }
    let mut end = MAX_ERROR_LEN;
    while !error.is_char_boundary(end) {
        end -= 1;
    }
    error[..end].to_string()
}
