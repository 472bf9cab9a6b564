//! Job submission.
//!
//! The submitter is the write-side front door: it validates the request,
//! charges the tenant's rate bucket, and persists through
//! `insert_if_absent`. A duplicate (tenant, idempotency key) is success with
//! `created = false` — never an error — and leaves the persisted row
//! untouched.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use forgeq_core::{DomainError, TenantId, MAX_IDENT_LEN};
use forgeq_events::{JobEvent, Telemetry};
use forgeq_queue::{Job, JobPriority, JobSpec};

use crate::rate_limit::RateLimiter;
use crate::store::{JobStore, StoreError};

/// Upper bound on client-supplied retry budgets.
pub const MAX_ATTEMPTS_LIMIT: u32 = 100;

/// An unvalidated submission, as it arrives from a client.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub tenant_id: String,
    pub idempotency_key: String,
    /// Must be a JSON object with a string `job_type` field.
    pub payload: Value,
    /// `critical | high | normal | low`; defaults to `normal`.
    #[serde(default)]
    pub priority: Option<String>,
    /// 1..=100; defaults to 3.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Optional future execution instant.
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Outcome of a submission.
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    pub job: Job,
    /// Whether this call created the row (false: idempotent duplicate).
    pub created: bool,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    /// Validation failure or rate limiting; the job was not created.
    #[error(transparent)]
    Rejected(#[from] DomainError),

    /// Storage failure; retry with backoff.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Validates and persists new submissions.
pub struct Submitter<S> {
    store: Arc<S>,
    limiter: RateLimiter,
    telemetry: Telemetry,
}

impl<S: JobStore> Submitter<S> {
    pub fn new(store: Arc<S>, limiter: RateLimiter, telemetry: Telemetry) -> Self {
        Self {
            store,
            limiter,
            telemetry,
        }
    }

    #[instrument(skip(self, request), fields(tenant_id = %request.tenant_id, idempotency_key = %request.idempotency_key), err)]
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitReceipt, SubmitError> {
        // Every attempt from an identifiable tenant costs a token, valid or
        // not; the bucket is the first gate after tenant parsing.
        let tenant_id = TenantId::new(request.tenant_id.clone())?;
        self.limiter.check(&tenant_id)?;

        let spec = validate(tenant_id, request)?;
        let job_type = spec
            .payload
            .get("job_type")
            .and_then(Value::as_str)
            .map(str::to_owned);

        let (job, created) = self.store.insert_if_absent(spec).await?;

        if created {
            self.telemetry.emit(JobEvent::created(
                job.id,
                job.tenant_id.clone(),
                job_type.as_deref(),
            ));
        }

        Ok(SubmitReceipt { job, created })
    }
}

fn validate(tenant_id: TenantId, request: SubmitRequest) -> Result<JobSpec, DomainError> {
    if request.idempotency_key.trim().is_empty() {
        return Err(DomainError::validation("idempotency_key must not be empty"));
    }
    if request.idempotency_key.len() > MAX_IDENT_LEN {
        return Err(DomainError::validation(format!(
            "idempotency_key exceeds {MAX_IDENT_LEN} bytes"
        )));
    }

    if !request.payload.is_object() {
        return Err(DomainError::validation("payload must be a JSON object"));
    }
    match request.payload.get("job_type") {
        Some(Value::String(s)) if !s.is_empty() => {}
        _ => {
            return Err(DomainError::validation(
                "payload.job_type must be a non-empty string",
            ))
        }
    }

    let priority = match request.priority.as_deref() {
        Some(raw) => JobPriority::parse(raw)?,
        None => JobPriority::default(),
    };

    let max_attempts = request.max_attempts.unwrap_or(forgeq_queue::DEFAULT_MAX_ATTEMPTS);
    if !(1..=MAX_ATTEMPTS_LIMIT).contains(&max_attempts) {
        return Err(DomainError::validation(format!(
            "max_attempts must be between 1 and {MAX_ATTEMPTS_LIMIT}"
        )));
    }

    let mut spec = JobSpec::new(tenant_id, request.idempotency_key, request.payload)
        .with_priority(priority)
        .with_max_attempts(max_attempts);
    if let Some(at) = request.scheduled_at {
        spec = spec.scheduled_at(at);
    }
    Ok(spec)
}
