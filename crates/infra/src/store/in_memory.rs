//! In-memory job store for tests and single-process development.
//!
//! Implements the same semantics as the Postgres store — claim ordering,
//! tenant caps, lease guards — with one process-wide mutex standing in for
//! the database's row locks. Not meant for production: no durability, no
//! cross-process safety.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use forgeq_core::{JobId, TenantId, WorkerId};
use forgeq_queue::{
    truncate_error, AckOutcome, Job, JobSpec, JobStatus, ReclaimOutcome, RetryPolicy,
};

use super::{
    JobPage, JobStore, ReclaimedJob, StatusCounts, StoreError, CLAIM_OVERSCAN,
};

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test support: move a job's eligibility instant, standing in for the
    /// passage of wall-clock time. Returns false if the job is unknown.
    pub fn set_scheduled_at(&self, job_id: JobId, at: DateTime<Utc>) -> bool {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&job_id) {
            Some(job) => {
                job.scheduled_at = at;
                true
            }
            None => false,
        }
    }

    /// Test support: rewrite a held lease's expiry, standing in for a worker
    /// that stopped heartbeating. Returns false if the job holds no lease.
    pub fn set_lease_expiry(&self, job_id: JobId, at: DateTime<Utc>) -> bool {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&job_id) {
            Some(job) if job.lease_expires_at.is_some() => {
                job.lease_expires_at = Some(at);
                true
            }
            _ => false,
        }
    }

    fn lease_guard_holds(job: &Job, worker_id: &WorkerId, now: DateTime<Utc>) -> bool {
        job.status.is_in_flight()
            && job.lease_owner.as_ref() == Some(worker_id)
            && job.lease_expires_at.map(|at| at > now).unwrap_or(false)
    }

    fn clear_lease(job: &mut Job) {
        job.lease_owner = None;
        job.lease_expires_at = None;
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert_if_absent(&self, spec: JobSpec) -> Result<(Job, bool), StoreError> {
        let mut jobs = self.jobs.lock().unwrap();

        if let Some(existing) = jobs.values().find(|j| {
            j.tenant_id == spec.tenant_id && j.idempotency_key == spec.idempotency_key
        }) {
            return Ok((existing.clone(), false));
        }

        let now = Utc::now();
        let job = Job {
            id: JobId::new(),
            tenant_id: spec.tenant_id,
            idempotency_key: spec.idempotency_key,
            payload: spec.payload,
            status: JobStatus::Queued,
            priority: spec.priority,
            attempt: 0,
            max_attempts: spec.max_attempts,
            scheduled_at: spec.scheduled_at.unwrap_or(now),
            lease_owner: None,
            lease_expires_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            last_error: None,
        };
        jobs.insert(job.id, job.clone());
        Ok((job, true))
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.lock().unwrap().get(&job_id).cloned())
    }

    async fn list(
        &self,
        tenant_id: &TenantId,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<JobPage, StoreError> {
        let jobs = self.jobs.lock().unwrap();
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|j| {
                j.tenant_id == *tenant_id && status.map(|s| j.status == s).unwrap_or(true)
            })
            .cloned()
            .collect();

        // Newest first, id as a stable tiebreak.
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.as_uuid().cmp(a.id.as_uuid())));

        let total = matching.len() as u64;
        let page = matching.into_iter().skip(offset).take(limit).collect();
        Ok(JobPage { jobs: page, total })
    }

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

        let mut jobs = self.jobs.lock().unwrap();
        let now = Utc::now();

        let mut candidates: Vec<(i16, DateTime<Utc>, JobId, TenantId)> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued && j.scheduled_at <= now)
            .map(|j| (j.priority.weight(), j.scheduled_at, j.id, j.tenant_id.clone()))
            .collect();
        // Claim order: weight descending, then FIFO by schedule; id is a
        // stable tiebreak so batches are deterministic.
        candidates.sort_by(|a, b| {
            (Reverse(a.0), a.1, a.2.as_uuid()).cmp(&(Reverse(b.0), b.1, b.2.as_uuid()))
        });
        candidates.truncate(batch_size * CLAIM_OVERSCAN);

        let mut in_flight: HashMap<TenantId, u32> = HashMap::new();
        for job in jobs.values() {
            if job.status.is_in_flight() {
                *in_flight.entry(job.tenant_id.clone()).or_default() += 1;
            }
        }

        let mut claimed_ids = Vec::with_capacity(batch_size);
        for (_, _, id, tenant) in candidates.drain(..) {
            if claimed_ids.len() >= batch_size {
                break;
            }
            let active = in_flight.entry(tenant).or_default();
            if *active >= tenant_concurrency_limit {
                continue;
            }
            *active += 1;
            claimed_ids.push(id);
        }

        let expires = now
            + chrono::Duration::from_std(lease_duration)
                .map_err(|e| StoreError::Query(format!("lease duration out of range: {e}")))?;

        let mut claimed = Vec::with_capacity(claimed_ids.len());
        for id in claimed_ids {
            let job = jobs.get_mut(&id).expect("candidate id came from the map");
            job.status = JobStatus::Leased;
            job.lease_owner = Some(worker_id.clone());
            job.lease_expires_at = Some(expires);
            job.attempt += 1;
            job.updated_at = now;
            claimed.push(job.clone());
        }

        Ok(claimed)
    }

    async fn start(&self, job_id: JobId, worker_id: &WorkerId) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let now = Utc::now();
        match jobs.get_mut(&job_id) {
            Some(job)
                if job.status == JobStatus::Leased
                    && Self::lease_guard_holds(job, worker_id, now) =>
            {
                job.status = JobStatus::Running;
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn extend_lease(
        &self,
        job_id: JobId,
        worker_id: &WorkerId,
        new_expiry: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let now = Utc::now();
        match jobs.get_mut(&job_id) {
            Some(job) if Self::lease_guard_holds(job, worker_id, now) => {
                job.lease_expires_at = Some(new_expiry);
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ack_success(&self, job_id: JobId, worker_id: &WorkerId) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let now = Utc::now();
        match jobs.get_mut(&job_id) {
            Some(job) if Self::lease_guard_holds(job, worker_id, now) => {
                job.status = JobStatus::Succeeded;
                job.completed_at = Some(now);
                job.updated_at = now;
                Self::clear_lease(job);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ack_failure(
        &self,
        job_id: JobId,
        worker_id: &WorkerId,
        error: &str,
        retry_policy: &RetryPolicy,
    ) -> Result<AckOutcome, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let now = Utc::now();
        let job = match jobs.get_mut(&job_id) {
            Some(job) if Self::lease_guard_holds(job, worker_id, now) => job,
            _ => return Ok(AckOutcome::LeaseLost),
        };

        job.last_error = Some(truncate_error(error));
        job.updated_at = now;
        Self::clear_lease(job);

        if job.attempt < job.max_attempts {
            let delay = retry_policy.delay_for_attempt(job.attempt);
            let next_attempt_at = now
                + chrono::Duration::from_std(delay)
                    .map_err(|e| StoreError::Query(format!("backoff out of range: {e}")))?;
            job.status = JobStatus::Queued;
            job.scheduled_at = next_attempt_at;
            Ok(AckOutcome::Retried { next_attempt_at })
        } else {
            job.status = JobStatus::DeadLetter;
            job.completed_at = Some(now);
            Ok(AckOutcome::DeadLettered)
        }
    }

    async fn ack_fatal(
        &self,
        job_id: JobId,
        worker_id: &WorkerId,
        error: &str,
    ) -> Result<AckOutcome, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let now = Utc::now();
        let job = match jobs.get_mut(&job_id) {
            Some(job) if Self::lease_guard_holds(job, worker_id, now) => job,
            _ => return Ok(AckOutcome::LeaseLost),
        };

        job.status = JobStatus::DeadLetter;
        job.attempt = job.max_attempts;
        job.last_error = Some(truncate_error(error));
        job.completed_at = Some(now);
        job.updated_at = now;
        Self::clear_lease(job);
        Ok(AckOutcome::DeadLettered)
    }

    async fn reclaim_expired(
        &self,
        now: DateTime<Utc>,
        max_batch: usize,
    ) -> Result<Vec<ReclaimedJob>, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();

        let mut expired: Vec<(DateTime<Utc>, JobId)> = jobs
            .values()
            .filter(|j| j.status.is_in_flight() && j.is_lease_expired(now))
            .map(|j| (j.lease_expires_at.unwrap_or(now), j.id))
            .collect();
        expired.sort_by_key(|(at, _)| *at);
        expired.truncate(max_batch);

        let mut reclaimed = Vec::with_capacity(expired.len());
        for (_, id) in expired {
            let job = jobs.get_mut(&id).expect("expired id came from the map");
            Self::clear_lease(job);
            job.updated_at = now;

            let outcome = if job.attempt < job.max_attempts {
                job.status = JobStatus::Queued;
                job.scheduled_at = now;
                ReclaimOutcome::ReclaimedForRetry
            } else {
                job.status = JobStatus::DeadLetter;
                job.completed_at = Some(now);
                job.last_error
                    .get_or_insert_with(|| "lease expired".to_string());
                ReclaimOutcome::ReclaimedToDeadLetter
            };

            reclaimed.push(ReclaimedJob {
                job_id: id,
                tenant_id: job.tenant_id.clone(),
                outcome,
            });
        }

        Ok(reclaimed)
    }

    async fn revive_from_dead_letter(
        &self,
        job_id: JobId,
        reset_attempts: bool,
    ) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let now = Utc::now();
        let job = jobs.get_mut(&job_id).ok_or(StoreError::NotFound)?;

        if job.status != JobStatus::DeadLetter {
            return Err(StoreError::InvalidState(format!(
                "cannot revive job in status {}",
                job.status
            )));
        }

        job.status = JobStatus::Queued;
        job.attempt = if reset_attempts {
            0
        } else {
            // One more try, while keeping attempt <= max_attempts after the
            // next claim increments it.
            job.attempt.saturating_sub(1)
        };
        job.last_error = None;
        job.completed_at = None;
        job.scheduled_at = now;
        job.updated_at = now;

        Ok(job.clone())
    }

    async fn counts_by_state(
        &self,
        tenant_id: Option<&TenantId>,
    ) -> Result<StatusCounts, StoreError> {
        let jobs = self.jobs.lock().unwrap();
        let mut counts = StatusCounts::default();
        for job in jobs.values() {
            if tenant_id.map(|t| job.tenant_id == *t).unwrap_or(true) {
                counts.record(job.status, 1);
            }
        }
        Ok(counts)
    }

    async fn queue_depth(&self, tenant_id: Option<&TenantId>) -> Result<u64, StoreError> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .values()
            .filter(|j| {
                j.status == JobStatus::Queued
                    && tenant_id.map(|t| j.tenant_id == *t).unwrap_or(true)
            })
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeq_queue::JobPriority;
    use serde_json::json;

    fn tenant(name: &str) -> TenantId {
        TenantId::new(name).unwrap()
    }

    fn worker(name: &str) -> WorkerId {
        WorkerId::new(name).unwrap()
    }

    fn spec(tenant_name: &str, key: &str) -> JobSpec {
        JobSpec::new(
            tenant(tenant_name),
            key,
            json!({"job_type": "echo", "data": {}}),
        )
    }

    const LEASE: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn insert_is_idempotent_per_tenant_and_key() {
        let store = InMemoryJobStore::new();

        let (first, created) = store.insert_if_absent(spec("t1", "k1")).await.unwrap();
        assert!(created);

        // Same key, different payload: the original row wins.
        let mut dup = spec("t1", "k1");
        dup.payload = json!({"job_type": "other"});
        let (second, created) = store.insert_if_absent(dup).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(second.payload["job_type"], "echo");

        // Same key under another tenant is a distinct job.
        let (third, created) = store.insert_if_absent(spec("t2", "k1")).await.unwrap();
        assert!(created);
        assert_ne!(first.id, third.id);
    }

    #[tokio::test]
    async fn claim_orders_by_priority_then_schedule() {
        let store = InMemoryJobStore::new();

        let (low, _) = store
            .insert_if_absent(spec("t1", "low").with_priority(JobPriority::Low))
            .await
            .unwrap();
        let (critical, _) = store
            .insert_if_absent(spec("t1", "critical").with_priority(JobPriority::Critical))
            .await
            .unwrap();
        let (normal, _) = store
            .insert_if_absent(spec("t1", "normal").with_priority(JobPriority::Normal))
            .await
            .unwrap();

        let claimed = store
            .claim_batch(&worker("w1"), 10, LEASE, 10)
            .await
            .unwrap();

        let ids: Vec<JobId> = claimed.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![critical.id, normal.id, low.id]);
        assert!(claimed.iter().all(|j| j.status == JobStatus::Leased));
        assert!(claimed.iter().all(|j| j.attempt == 1));
    }

    #[tokio::test]
    async fn priority_tie_breaks_fifo_by_schedule() {
        let store = InMemoryJobStore::new();
        let earlier = Utc::now() - chrono::Duration::seconds(60);

        let (second, _) = store.insert_if_absent(spec("t1", "b")).await.unwrap();
        let (first, _) = store
            .insert_if_absent(spec("t1", "a").scheduled_at(earlier))
            .await
            .unwrap();

        let claimed = store
            .claim_batch(&worker("w1"), 2, LEASE, 10)
            .await
            .unwrap();
        assert_eq!(
            claimed.iter().map(|j| j.id).collect::<Vec<_>>(),
            vec![first.id, second.id]
        );
    }

    #[tokio::test]
    async fn future_jobs_are_invisible_to_claim() {
        let store = InMemoryJobStore::new();
        let future = Utc::now() + chrono::Duration::seconds(3600);

        let (job, _) = store
            .insert_if_absent(spec("t1", "later").scheduled_at(future))
            .await
            .unwrap();

        assert!(store
            .claim_batch(&worker("w1"), 10, LEASE, 10)
            .await
            .unwrap()
            .is_empty());

        // Becomes visible once its instant arrives.
        store.set_scheduled_at(job.id, Utc::now() - chrono::Duration::seconds(1));
        assert_eq!(
            store
                .claim_batch(&worker("w1"), 10, LEASE, 10)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn tenant_cap_skips_but_still_fills_batch() {
        let store = InMemoryJobStore::new();
        for i in 0..5 {
            store
                .insert_if_absent(spec("t1", &format!("t1-{i}")))
                .await
                .unwrap();
        }
        for i in 0..3 {
            store
                .insert_if_absent(spec("t2", &format!("t2-{i}")))
                .await
                .unwrap();
        }

        let claimed = store
            .claim_batch(&worker("w1"), 10, LEASE, 2)
            .await
            .unwrap();

        let t1_count = claimed.iter().filter(|j| j.tenant_id == tenant("t1")).count();
        let t2_count = claimed.iter().filter(|j| j.tenant_id == tenant("t2")).count();
        assert_eq!(t1_count, 2);
        assert_eq!(t2_count, 2);

        // A second claim finds every remaining tenant slot occupied.
        assert!(store
            .claim_batch(&worker("w2"), 10, LEASE, 2)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn ack_success_is_guarded_by_lease_owner() {
        let store = InMemoryJobStore::new();
        store.insert_if_absent(spec("t1", "k1")).await.unwrap();

        let claimed = store
            .claim_batch(&worker("w1"), 1, LEASE, 10)
            .await
            .unwrap();
        let job = &claimed[0];

        assert!(!store.ack_success(job.id, &worker("w2")).await.unwrap());
        assert!(store.ack_success(job.id, &worker("w1")).await.unwrap());

        let done = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Succeeded);
        assert!(done.completed_at.is_some());
        assert!(done.lease_owner.is_none());
        assert!(done.lease_expires_at.is_none());
    }

    #[tokio::test]
    async fn ack_failure_requeues_then_dead_letters() {
        let store = InMemoryJobStore::new();
        let policy = RetryPolicy::default();
        store
            .insert_if_absent(spec("t1", "k1").with_max_attempts(2))
            .await
            .unwrap();
        let w = worker("w1");

        let job = store.claim_batch(&w, 1, LEASE, 10).await.unwrap().remove(0);
        let outcome = store
            .ack_failure(job.id, &w, "nope", &policy)
            .await
            .unwrap();
        let next_attempt_at = match outcome {
            AckOutcome::Retried { next_attempt_at } => next_attempt_at,
            other => panic!("expected retry, got {other:?}"),
        };

        let requeued = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(requeued.status, JobStatus::Queued);
        assert_eq!(requeued.last_error.as_deref(), Some("nope"));
        assert_eq!(requeued.scheduled_at, next_attempt_at);
        assert!(requeued.lease_owner.is_none());

        // Backoff respects the policy envelope for attempt 1.
        let (lo, hi) = policy.delay_bounds(1);
        let delta = (next_attempt_at - requeued.updated_at).to_std().unwrap();
        assert!(delta >= lo && delta <= hi, "delay {delta:?} outside [{lo:?}, {hi:?}]");

        // Second and final attempt.
        store.set_scheduled_at(job.id, Utc::now());
        let job = store.claim_batch(&w, 1, LEASE, 10).await.unwrap().remove(0);
        assert_eq!(job.attempt, 2);
        let outcome = store
            .ack_failure(job.id, &w, "still nope", &policy)
            .await
            .unwrap();
        assert_eq!(outcome, AckOutcome::DeadLettered);

        let dead = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(dead.status, JobStatus::DeadLetter);
        assert_eq!(dead.attempt, 2);
        assert_eq!(dead.last_error.as_deref(), Some("still nope"));
        assert!(dead.completed_at.is_some());
    }

    #[tokio::test]
    async fn single_attempt_jobs_dead_letter_on_first_failure() {
        let store = InMemoryJobStore::new();
        store
            .insert_if_absent(spec("t1", "k1").with_max_attempts(1))
            .await
            .unwrap();
        let w = worker("w1");

        let job = store.claim_batch(&w, 1, LEASE, 10).await.unwrap().remove(0);
        let outcome = store
            .ack_failure(job.id, &w, "boom", &RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(outcome, AckOutcome::DeadLettered);
    }

    #[tokio::test]
    async fn expired_lease_cannot_ack_or_extend() {
        let store = InMemoryJobStore::new();
        store.insert_if_absent(spec("t1", "k1")).await.unwrap();
        let w = worker("w1");

        let job = store.claim_batch(&w, 1, LEASE, 10).await.unwrap().remove(0);
        store.set_lease_expiry(job.id, Utc::now() - chrono::Duration::seconds(1));

        assert!(!store
            .extend_lease(job.id, &w, Utc::now() + chrono::Duration::seconds(30))
            .await
            .unwrap());
        assert!(!store.ack_success(job.id, &w).await.unwrap());
        assert_eq!(
            store
                .ack_failure(job.id, &w, "late", &RetryPolicy::default())
                .await
                .unwrap(),
            AckOutcome::LeaseLost
        );
    }

    #[tokio::test]
    async fn extend_lease_moves_expiry_for_owner_only() {
        let store = InMemoryJobStore::new();
        store.insert_if_absent(spec("t1", "k1")).await.unwrap();
        let w = worker("w1");

        let job = store.claim_batch(&w, 1, LEASE, 10).await.unwrap().remove(0);
        let new_expiry = Utc::now() + chrono::Duration::seconds(90);

        assert!(!store
            .extend_lease(job.id, &worker("w2"), new_expiry)
            .await
            .unwrap());
        assert!(store.extend_lease(job.id, &w, new_expiry).await.unwrap());
        assert_eq!(
            store.get(job.id).await.unwrap().unwrap().lease_expires_at,
            Some(new_expiry)
        );
    }

    #[tokio::test]
    async fn reclaim_requeues_or_dead_letters_expired_leases() {
        let store = InMemoryJobStore::new();
        let w = worker("w1");

        let (retryable, _) = store.insert_if_absent(spec("t1", "retryable")).await.unwrap();
        let (exhausted, _) = store
            .insert_if_absent(spec("t1", "exhausted").with_max_attempts(1))
            .await
            .unwrap();

        let claimed = store.claim_batch(&w, 2, LEASE, 10).await.unwrap();
        assert_eq!(claimed.len(), 2);

        let past = Utc::now() - chrono::Duration::seconds(1);
        store.set_lease_expiry(retryable.id, past);
        store.set_lease_expiry(exhausted.id, past);

        let reclaimed = store.reclaim_expired(Utc::now(), 10).await.unwrap();
        assert_eq!(reclaimed.len(), 2);

        let by_id: HashMap<JobId, ReclaimOutcome> = reclaimed
            .into_iter()
            .map(|r| (r.job_id, r.outcome))
            .collect();
        assert_eq!(by_id[&retryable.id], ReclaimOutcome::ReclaimedForRetry);
        assert_eq!(by_id[&exhausted.id], ReclaimOutcome::ReclaimedToDeadLetter);

        let requeued = store.get(retryable.id).await.unwrap().unwrap();
        assert_eq!(requeued.status, JobStatus::Queued);
        assert!(requeued.lease_owner.is_none());

        let dead = store.get(exhausted.id).await.unwrap().unwrap();
        assert_eq!(dead.status, JobStatus::DeadLetter);
        assert!(dead.last_error.is_some());
    }

    #[tokio::test]
    async fn reclaim_ignores_live_leases() {
        let store = InMemoryJobStore::new();
        store.insert_if_absent(spec("t1", "k1")).await.unwrap();
        store
            .claim_batch(&worker("w1"), 1, LEASE, 10)
            .await
            .unwrap();

        assert!(store.reclaim_expired(Utc::now(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn revive_requires_dead_letter_state() {
        let store = InMemoryJobStore::new();
        let (job, _) = store.insert_if_absent(spec("t1", "k1")).await.unwrap();

        let err = store
            .revive_from_dead_letter(job.id, true)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidState(_)));

        let err = store
            .revive_from_dead_letter(JobId::new(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn revive_resets_or_grants_one_attempt() {
        let store = InMemoryJobStore::new();
        let w = worker("w1");
        let policy = RetryPolicy::default();

        let (job, _) = store
            .insert_if_absent(spec("t1", "k1").with_max_attempts(1))
            .await
            .unwrap();
        store.claim_batch(&w, 1, LEASE, 10).await.unwrap();
        store.ack_failure(job.id, &w, "boom", &policy).await.unwrap();

        let revived = store.revive_from_dead_letter(job.id, false).await.unwrap();
        assert_eq!(revived.status, JobStatus::Queued);
        assert_eq!(revived.attempt, 0);
        assert!(revived.last_error.is_none());

        // The granted attempt keeps the counter within the cap.
        let claimed = store.claim_batch(&w, 1, LEASE, 10).await.unwrap();
        assert_eq!(claimed[0].attempt, 1);
        assert_eq!(claimed[0].max_attempts, 1);
    }

    #[tokio::test]
    async fn counts_and_depth_scope_by_tenant() {
        let store = InMemoryJobStore::new();
        store.insert_if_absent(spec("t1", "a")).await.unwrap();
        store.insert_if_absent(spec("t1", "b")).await.unwrap();
        store.insert_if_absent(spec("t2", "c")).await.unwrap();

        store
            .claim_batch(&worker("w1"), 1, LEASE, 10)
            .await
            .unwrap();

        let all = store.counts_by_state(None).await.unwrap();
        assert_eq!(all.queued + all.leased, 3);
        assert_eq!(all.in_flight(), 1);

        let t2 = tenant("t2");
        let t2_counts = store.counts_by_state(Some(&t2)).await.unwrap();
        assert_eq!(t2_counts.total(), 1);

        assert_eq!(store.queue_depth(Some(&t2)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn list_paginates_newest_first() {
        let store = InMemoryJobStore::new();
        for i in 0..5 {
            store
                .insert_if_absent(spec("t1", &format!("k{i}")))
                .await
                .unwrap();
        }

        let t1 = tenant("t1");
        let page = store.list(&t1, None, 2, 0).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.jobs.len(), 2);

        let rest = store.list(&t1, None, 10, 2).await.unwrap();
        assert_eq!(rest.jobs.len(), 3);

        let queued_only = store
            .list(&t1, Some(JobStatus::Succeeded), 10, 0)
            .await
            .unwrap();
        assert_eq!(queued_only.total, 0);
    }
}
