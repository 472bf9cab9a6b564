//! Postgres-backed job store.
//!
//! This is the component the whole system's guarantees hang on: durability,
//! submission idempotency, and the no-double-lease property are all enforced
//! here, in single-statement or single-transaction operations.
//!
//! ## Claim protocol
//!
//! The claim query locks candidate rows with `FOR UPDATE SKIP LOCKED`, so
//! concurrent workers receive disjoint batches and never wait on each
//! other's locks; contention degrades latency, not throughput. Tenant
//! fairness is applied inside the same statement: a grouped in-flight count
//! per tenant plus a per-tenant ranking of the locked candidates caps how
//! many rows each tenant may add to its in-flight set. Candidate
//! concurrency counts are read without locking, so two overlapping claims
//! can transiently overshoot a tenant's cap by the in-flight delta; the cap
//! is eventually correct, which is the contract.
//!
//! ## Error mapping
//!
//! SQLx errors are funneled through [`map_sqlx_error`]: connection/pool
//! failures become `StoreError::Unavailable` (transient, caller retries),
//! everything else `Query`/`Decode`. Unique-constraint conflicts on
//! submission never surface: `insert_if_absent` turns them into "existing
//! row returned".

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{FromRow, Row};
use tracing::instrument;

use forgeq_core::{JobId, TenantId, WorkerId};
use forgeq_queue::{
    truncate_error, AckOutcome, Job, JobPriority, JobSpec, JobStatus, ReclaimOutcome, RetryPolicy,
};

use super::{
    JobPage, JobStore, ReclaimedJob, StatusCounts, StoreError, CLAIM_OVERSCAN,
};

const JOB_COLUMNS: &str = "id, tenant_id, idempotency_key, payload, status, priority, \
     attempt, max_attempts, scheduled_at, lease_owner, lease_expires_at, \
     created_at, updated_at, completed_at, last_error";

/// Postgres-backed [`JobStore`].
///
/// Cheap to clone; all operations use the shared connection pool, one pooled
/// connection per operation for the duration of its transaction.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect a pool and wrap it.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("connect: {e}")))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, spec), fields(tenant_id = %spec.tenant_id, idempotency_key = %spec.idempotency_key), err)]
    async fn insert_if_absent(&self, spec: JobSpec) -> Result<(Job, bool), StoreError> {
        let id = JobId::new();
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO jobs (
                id, tenant_id, idempotency_key, payload,
                status, priority, priority_weight,
                attempt, max_attempts, scheduled_at
            )
            VALUES ($1, $2, $3, $4, 'queued', $5, $6, 0, $7, COALESCE($8, now()))
            ON CONFLICT (tenant_id, idempotency_key) DO NOTHING
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(spec.tenant_id.as_str())
        .bind(&spec.idempotency_key)
        .bind(&spec.payload)
        .bind(spec.priority.as_str())
        .bind(spec.priority.weight())
        .bind(spec.max_attempts as i32)
        .bind(spec.scheduled_at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_if_absent", e))?;

        if let Some(row) = row {
            let job = decode_job(&row)?;
            tracing::info!(job_id = %job.id, "job created");
            return Ok((job, true));
        }

        // Conflict: another row owns this (tenant, key). Fetch and return it
        // unchanged; the first submission wins.
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE tenant_id = $1 AND idempotency_key = $2"
        ))
        .bind(spec.tenant_id.as_str())
        .bind(&spec.idempotency_key)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_if_absent/fetch_existing", e))?
        .ok_or_else(|| {
            StoreError::Query("row missing after idempotency conflict".to_string())
        })?;

        let job = decode_job(&row)?;
        tracing::debug!(job_id = %job.id, "duplicate submission, returning existing job");
        Ok((job, false))
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn get(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.as_ref().map(decode_job).transpose()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn list(
        &self,
        tenant_id: &TenantId,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<JobPage, StoreError> {
        let status_str = status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM jobs
            WHERE tenant_id = $1 AND ($2::text IS NULL OR status = $2)
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(status_str)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list/count", e))?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE tenant_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(tenant_id.as_str())
        .bind(status_str)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list", e))?;

        let jobs = rows.iter().map(decode_job).collect::<Result<Vec<_>, _>>()?;
        Ok(JobPage {
            jobs,
            total: total as u64,
        })
    }

    #[instrument(skip(self), fields(worker_id = %worker_id), err)]
    async fn claim_batch(
        &self,
        worker_id: &WorkerId,
        batch_size: usize,
        lease_duration: Duration,
        tenant_concurrency_limit: u32,
    ) -> Result<Vec<Job>, StoreError> {
        if batch_size == 0 {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let expires = now
            + chrono::Duration::from_std(lease_duration)
                .map_err(|e| StoreError::Query(format!("lease duration out of range: {e}")))?;

        // Single statement, single transaction. `locked` takes the row locks
        // (skipping rows locked by concurrent claimers), `ranked` applies
        // the per-tenant cap on top of the grouped in-flight counts, and the
        // UPDATE leases the winners.
        let rows = sqlx::query(&format!(
            r#"
            WITH locked AS (
                SELECT id, tenant_id, priority_weight, scheduled_at
                FROM jobs
                WHERE status = 'queued' AND scheduled_at <= $1
                ORDER BY priority_weight DESC, scheduled_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            ),
            in_flight AS (
                SELECT tenant_id, COUNT(*) AS active
                FROM jobs
                WHERE status IN ('leased', 'running')
                GROUP BY tenant_id
            ),
            ranked AS (
                SELECT
                    l.id,
                    ROW_NUMBER() OVER (
                        PARTITION BY l.tenant_id
                        ORDER BY l.priority_weight DESC, l.scheduled_at ASC, l.id ASC
                    ) AS tenant_seq,
                    ROW_NUMBER() OVER (
                        ORDER BY l.priority_weight DESC, l.scheduled_at ASC, l.id ASC
                    ) AS overall_seq,
                    COALESCE(f.active, 0) AS active
                FROM locked l
                LEFT JOIN in_flight f ON f.tenant_id = l.tenant_id
            ),
            chosen AS (
                SELECT id FROM ranked
                WHERE active + tenant_seq <= $3
                ORDER BY overall_seq
                LIMIT $4
            )
            UPDATE jobs j
            SET status = 'leased',
                lease_owner = $5,
                lease_expires_at = $6,
                attempt = attempt + 1,
                updated_at = $1
            FROM chosen c
            WHERE j.id = c.id
            RETURNING {prefixed}
            "#,
            prefixed = prefixed_job_columns("j")
        ))
        .bind(now)
        .bind((batch_size * CLAIM_OVERSCAN) as i64)
        .bind(tenant_concurrency_limit as i64)
        .bind(batch_size as i64)
        .bind(worker_id.as_str())
        .bind(expires)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_batch", e))?;

        let mut jobs = rows
            .iter()
            .map(decode_job)
            .collect::<Result<Vec<_>, _>>()?;

        // RETURNING gives no order guarantee; restore the claim order.
        jobs.sort_by(|a, b| {
            b.priority
                .weight()
                .cmp(&a.priority.weight())
                .then(a.scheduled_at.cmp(&b.scheduled_at))
                .then(a.id.as_uuid().cmp(b.id.as_uuid()))
        });

        if !jobs.is_empty() {
            tracing::info!(count = jobs.len(), "leased jobs");
        }
        Ok(jobs)
    }

    #[instrument(skip(self), fields(job_id = %job_id, worker_id = %worker_id), err)]
    async fn start(&self, job_id: JobId, worker_id: &WorkerId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'running', updated_at = now()
            WHERE id = $1
              AND status = 'leased'
              AND lease_owner = $2
              AND lease_expires_at > now()
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(worker_id.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("start", e))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(job_id = %job_id, worker_id = %worker_id), err)]
    async fn extend_lease(
        &self,
        job_id: JobId,
        worker_id: &WorkerId,
        new_expiry: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_at = $3, updated_at = now()
            WHERE id = $1
              AND lease_owner = $2
              AND status IN ('leased', 'running')
              AND lease_expires_at > now()
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(worker_id.as_str())
        .bind(new_expiry)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("extend_lease", e))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(job_id = %job_id, worker_id = %worker_id), err)]
    async fn ack_success(&self, job_id: JobId, worker_id: &WorkerId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'succeeded',
                completed_at = now(),
                updated_at = now(),
                lease_owner = NULL,
                lease_expires_at = NULL
            WHERE id = $1
              AND lease_owner = $2
              AND status IN ('leased', 'running')
              AND lease_expires_at > now()
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(worker_id.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("ack_success", e))?;

        let acked = result.rows_affected() > 0;
        if acked {
            tracing::info!("job succeeded");
        } else {
            tracing::warn!("success ack rejected: lease lost");
        }
        Ok(acked)
    }

    #[instrument(skip(self, retry_policy), fields(job_id = %job_id, worker_id = %worker_id), err)]
    async fn ack_failure(
        &self,
        job_id: JobId,
        worker_id: &WorkerId,
        error: &str,
        retry_policy: &RetryPolicy,
    ) -> Result<AckOutcome, StoreError> {
        let now = Utc::now();
        let error = truncate_error(error);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("ack_failure/begin", e))?;

        // Lock the row to read the attempt budget; the backoff delay depends
        // on it.
        let row = sqlx::query(
            r#"
            SELECT attempt, max_attempts FROM jobs
            WHERE id = $1
              AND lease_owner = $2
              AND status IN ('leased', 'running')
              AND lease_expires_at > $3
            FOR UPDATE
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(worker_id.as_str())
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("ack_failure/guard", e))?;

        let Some(row) = row else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("ack_failure/rollback", e))?;
            tracing::warn!("failure ack rejected: lease lost");
            return Ok(AckOutcome::LeaseLost);
        };

        let attempt: i32 = row
            .try_get("attempt")
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        let max_attempts: i32 = row
            .try_get("max_attempts")
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        let outcome = if attempt < max_attempts {
            let delay = retry_policy.delay_for_attempt(attempt.max(0) as u32);
            let next_attempt_at = now
                + chrono::Duration::from_std(delay)
                    .map_err(|e| StoreError::Query(format!("backoff out of range: {e}")))?;

            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'queued',
                    scheduled_at = $2,
                    last_error = $3,
                    lease_owner = NULL,
                    lease_expires_at = NULL,
                    updated_at = $4
                WHERE id = $1
                "#,
            )
            .bind(job_id.as_uuid())
            .bind(next_attempt_at)
            .bind(&error)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("ack_failure/requeue", e))?;

            tracing::info!(attempt, next_attempt_at = %next_attempt_at, "job queued for retry");
            AckOutcome::Retried { next_attempt_at }
        } else {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'dead_letter',
                    last_error = $2,
                    completed_at = $3,
                    lease_owner = NULL,
                    lease_expires_at = NULL,
                    updated_at = $3
                WHERE id = $1
                "#,
            )
            .bind(job_id.as_uuid())
            .bind(&error)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("ack_failure/dead_letter", e))?;

            tracing::warn!(attempt, "job dead-lettered");
            AckOutcome::DeadLettered
        };

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("ack_failure/commit", e))?;
        Ok(outcome)
    }

    #[instrument(skip(self), fields(job_id = %job_id, worker_id = %worker_id), err)]
    async fn ack_fatal(
        &self,
        job_id: JobId,
        worker_id: &WorkerId,
        error: &str,
    ) -> Result<AckOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'dead_letter',
                attempt = max_attempts,
                last_error = $3,
                completed_at = now(),
                updated_at = now(),
                lease_owner = NULL,
                lease_expires_at = NULL
            WHERE id = $1
              AND lease_owner = $2
              AND status IN ('leased', 'running')
              AND lease_expires_at > now()
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(worker_id.as_str())
        .bind(truncate_error(error))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("ack_fatal", e))?;

        if result.rows_affected() > 0 {
            tracing::warn!("job dead-lettered (fatal failure)");
            Ok(AckOutcome::DeadLettered)
        } else {
            Ok(AckOutcome::LeaseLost)
        }
    }

    #[instrument(skip(self), err)]
    async fn reclaim_expired(
        &self,
        now: DateTime<Utc>,
        max_batch: usize,
    ) -> Result<Vec<ReclaimedJob>, StoreError> {
        let rows = sqlx::query(
            r#"
            WITH expired AS (
                SELECT id FROM jobs
                WHERE status IN ('leased', 'running') AND lease_expires_at <= $1
                ORDER BY lease_expires_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs j
            SET status = CASE WHEN j.attempt < j.max_attempts
                              THEN 'queued' ELSE 'dead_letter' END,
                scheduled_at = CASE WHEN j.attempt < j.max_attempts
                                    THEN $1 ELSE j.scheduled_at END,
                completed_at = CASE WHEN j.attempt < j.max_attempts
                                    THEN j.completed_at ELSE $1 END,
                last_error = CASE WHEN j.attempt < j.max_attempts
                                  THEN j.last_error
                                  ELSE COALESCE(j.last_error, 'lease expired') END,
                lease_owner = NULL,
                lease_expires_at = NULL,
                updated_at = $1
            FROM expired e
            WHERE j.id = e.id
            RETURNING j.id, j.tenant_id, j.status
            "#,
        )
        .bind(now)
        .bind(max_batch as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("reclaim_expired", e))?;

        let mut reclaimed = Vec::with_capacity(rows.len());
        for row in rows {
            let id: uuid::Uuid = row
                .try_get("id")
                .map_err(|e| StoreError::Decode(e.to_string()))?;
            let tenant: String = row
                .try_get("tenant_id")
                .map_err(|e| StoreError::Decode(e.to_string()))?;
            let status: String = row
                .try_get("status")
                .map_err(|e| StoreError::Decode(e.to_string()))?;

            let outcome = if status == "queued" {
                ReclaimOutcome::ReclaimedForRetry
            } else {
                ReclaimOutcome::ReclaimedToDeadLetter
            };
            reclaimed.push(ReclaimedJob {
                job_id: JobId::from_uuid(id),
                tenant_id: TenantId::new(tenant).map_err(|e| StoreError::Decode(e.to_string()))?,
                outcome,
            });
        }

        if !reclaimed.is_empty() {
            tracing::info!(count = reclaimed.len(), "reclaimed expired leases");
        }
        Ok(reclaimed)
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn revive_from_dead_letter(
        &self,
        job_id: JobId,
        reset_attempts: bool,
    ) -> Result<Job, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("revive/begin", e))?;

        let row = sqlx::query("SELECT status FROM jobs WHERE id = $1 FOR UPDATE")
            .bind(job_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("revive/guard", e))?;

        let Some(row) = row else {
            return Err(StoreError::NotFound);
        };
        let status: String = row
            .try_get("status")
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        if status != "dead_letter" {
            return Err(StoreError::InvalidState(format!(
                "cannot revive job in status {status}"
            )));
        }

        // Without a reset, grant exactly one further attempt: the counter
        // drops by one so the next claim's increment stays within the cap.
        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET status = 'queued',
                attempt = CASE WHEN $2 THEN 0 ELSE GREATEST(attempt - 1, 0) END,
                last_error = NULL,
                completed_at = NULL,
                scheduled_at = now(),
                updated_at = now()
            WHERE id = $1
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id.as_uuid())
        .bind(reset_attempts)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("revive/update", e))?;

        let job = decode_job(&row)?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("revive/commit", e))?;

        tracing::info!("job revived from dead letter");
        Ok(job)
    }

    #[instrument(skip(self), err)]
    async fn counts_by_state(
        &self,
        tenant_id: Option<&TenantId>,
    ) -> Result<StatusCounts, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS count
            FROM jobs
            WHERE ($1::text IS NULL OR tenant_id = $1)
            GROUP BY status
            "#,
        )
        .bind(tenant_id.map(TenantId::as_str))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("counts_by_state", e))?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row
                .try_get("status")
                .map_err(|e| StoreError::Decode(e.to_string()))?;
            let count: i64 = row
                .try_get("count")
                .map_err(|e| StoreError::Decode(e.to_string()))?;
            let status =
                JobStatus::parse(&status).map_err(|e| StoreError::Decode(e.to_string()))?;
            counts.record(status, count as u64);
        }
        Ok(counts)
    }

    #[instrument(skip(self), err)]
    async fn queue_depth(&self, tenant_id: Option<&TenantId>) -> Result<u64, StoreError> {
        let depth: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM jobs
            WHERE status = 'queued' AND ($1::text IS NULL OR tenant_id = $1)
            "#,
        )
        .bind(tenant_id.map(TenantId::as_str))
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("queue_depth", e))?;

        Ok(depth as u64)
    }
}

/// `JOB_COLUMNS` with a table alias prefix, for RETURNING clauses.
fn prefixed_job_columns(alias: &str) -> String {
    JOB_COLUMNS
        .split(", ")
        .map(|c| format!("{alias}.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Map SQLx errors onto the store taxonomy.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("{operation}: {e}")),
        sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("{operation}: connection pool timed out"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("{operation}: connection pool closed"))
        }
        sqlx::Error::Database(db_err) => {
            StoreError::Query(format!("{operation}: {}", db_err.message()))
        }
        sqlx::Error::RowNotFound => {
            // Our queries use fetch_optional/fetch_all; this indicates a bug.
            StoreError::Query(format!("{operation}: unexpected empty result"))
        }
        sqlx::Error::ColumnDecode { index, source } => {
            StoreError::Decode(format!("{operation}: column {index}: {source}"))
        }
        other => StoreError::Query(format!("{operation}: {other}")),
    }
}

// Row decoding

#[derive(Debug)]
struct JobRow {
    id: uuid::Uuid,
    tenant_id: String,
    idempotency_key: String,
    payload: serde_json::Value,
    status: String,
    priority: String,
    attempt: i32,
    max_attempts: i32,
    scheduled_at: DateTime<Utc>,
    lease_owner: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for JobRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            idempotency_key: row.try_get("idempotency_key")?,
            payload: row.try_get("payload")?,
            status: row.try_get("status")?,
            priority: row.try_get("priority")?,
            attempt: row.try_get("attempt")?,
            max_attempts: row.try_get("max_attempts")?,
            scheduled_at: row.try_get("scheduled_at")?,
            lease_owner: row.try_get("lease_owner")?,
            lease_expires_at: row.try_get("lease_expires_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
            last_error: row.try_get("last_error")?,
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: JobId::from_uuid(row.id),
            tenant_id: TenantId::new(row.tenant_id)
                .map_err(|e| StoreError::Decode(e.to_string()))?,
            idempotency_key: row.idempotency_key,
            payload: row.payload,
            status: JobStatus::parse(&row.status)
                .map_err(|e| StoreError::Decode(e.to_string()))?,
            priority: JobPriority::parse(&row.priority)
                .map_err(|e| StoreError::Decode(e.to_string()))?,
            attempt: row.attempt.max(0) as u32,
            max_attempts: row.max_attempts.max(0) as u32,
            scheduled_at: row.scheduled_at,
            lease_owner: row
                .lease_owner
                .map(WorkerId::new)
                .transpose()
                .map_err(|e| StoreError::Decode(e.to_string()))?,
            lease_expires_at: row.lease_expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
            last_error: row.last_error,
        })
    }
}

fn decode_job(row: &PgRow) -> Result<Job, StoreError> {
    let job_row = JobRow::from_row(row)
        .map_err(|e| StoreError::Decode(format!("failed to decode job row: {e}")))?;
    Job::try_from(job_row)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_columns_alias_every_column() {
        let prefixed = prefixed_job_columns("j");
        assert!(prefixed.starts_with("j.id, j.tenant_id"));
        assert_eq!(
            prefixed.matches("j.").count(),
            JOB_COLUMNS.split(", ").count()
        );
    }

    #[test]
    fn pool_errors_are_transient() {
        let err = map_sqlx_error("claim_batch", sqlx::Error::PoolTimedOut);
        assert!(err.is_transient());

        let err = map_sqlx_error("claim_batch", sqlx::Error::RowNotFound);
        assert!(!err.is_transient());
    }
}
