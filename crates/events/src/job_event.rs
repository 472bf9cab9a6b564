//! Job lifecycle events.
//!
//! Emitted by the submitter, worker, and reaper as jobs move through the
//! state machine. Export wiring (websockets, metrics pipelines) is out of
//! scope here; consumers subscribe in-process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use forgeq_core::{JobId, TenantId, WorkerId};
use forgeq_queue::JobStatus;

/// One state-change notification for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub event_type: String,
    pub job_id: JobId,
    pub tenant_id: TenantId,
    pub status: JobStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JobEvent {
    fn new(
        event_type: &str,
        job_id: JobId,
        tenant_id: TenantId,
        status: JobStatus,
        data: Option<Value>,
    ) -> Self {
        Self {
            event_type: event_type.to_string(),
            job_id,
            tenant_id,
            status,
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn created(job_id: JobId, tenant_id: TenantId, job_type: Option<&str>) -> Self {
        Self::new(
            "job.created",
            job_id,
            tenant_id,
            JobStatus::Queued,
            Some(json!({ "job_type": job_type })),
        )
    }

    pub fn started(job_id: JobId, tenant_id: TenantId, worker_id: &WorkerId, attempt: u32) -> Self {
        Self::new(
            "job.started",
            job_id,
            tenant_id,
            JobStatus::Running,
            Some(json!({ "worker_id": worker_id, "attempt": attempt })),
        )
    }

    pub fn completed(job_id: JobId, tenant_id: TenantId) -> Self {
        Self::new("job.completed", job_id, tenant_id, JobStatus::Succeeded, None)
    }

    pub fn retried(
        job_id: JobId,
        tenant_id: TenantId,
        error: &str,
        attempt: u32,
        next_attempt_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            "job.retried",
            job_id,
            tenant_id,
            JobStatus::Queued,
            Some(json!({
                "error": error,
                "attempt": attempt,
                "next_attempt_at": next_attempt_at,
            })),
        )
    }

    pub fn dead_lettered(job_id: JobId, tenant_id: TenantId, error: &str, attempts: u32) -> Self {
        Self::new(
            "job.dlq",
            job_id,
            tenant_id,
            JobStatus::DeadLetter,
            Some(json!({ "error": error, "total_attempts": attempts })),
        )
    }

    /// Reaper reclaimed an expired lease. `requeued` is false when the job
    /// went to the dead-letter state instead.
    pub fn lease_expired(job_id: JobId, tenant_id: TenantId, requeued: bool) -> Self {
        let status = if requeued {
            JobStatus::Queued
        } else {
            JobStatus::DeadLetter
        };
        Self::new(
            "lease.expired",
            job_id,
            tenant_id,
            status,
            Some(json!({ "requeued": requeued })),
        )
    }

    /// A worker finished a job but could not acknowledge it: the lease was
    /// already lost, so the job may execute again elsewhere.
    pub fn at_least_once_warning(job_id: JobId, tenant_id: TenantId, worker_id: &WorkerId) -> Self {
        Self::new(
            "lease.at_least_once_warning",
            job_id,
            tenant_id,
            JobStatus::Running,
            Some(json!({ "worker_id": worker_id })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_expired_status_follows_outcome() {
        let tenant = TenantId::new("t1").unwrap();
        let requeued = JobEvent::lease_expired(JobId::new(), tenant.clone(), true);
        assert_eq!(requeued.status, JobStatus::Queued);

        let dead = JobEvent::lease_expired(JobId::new(), tenant, false);
        assert_eq!(dead.status, JobStatus::DeadLetter);
        assert_eq!(dead.event_type, "lease.expired");
    }

    #[test]
    fn events_serialize_with_snake_case_status() {
        let tenant = TenantId::new("t1").unwrap();
        let event = JobEvent::dead_lettered(JobId::new(), tenant, "boom", 3);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["status"], "dead_letter");
        assert_eq!(value["data"]["total_attempts"], 3);
    }
}
