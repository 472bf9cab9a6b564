//! Per-tenant submission rate limiting.
//!
//! A token bucket per tenant, in memory, per process. Sufficient for a
//! single submitter instance; a distributed deployment can substitute a
//! shared implementation behind the same check without touching callers.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::Instant;

use forgeq_core::{DomainError, TenantId};

/// Token bucket: capacity-bounded, continuously refilled.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    fn try_consume(
        &mut self,
        capacity: f64,
        refill_rate: f64,
        tokens: f64,
        now: Instant,
    ) -> Result<(), f64> {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_refill = now;

        if self.tokens >= tokens {
            self.tokens -= tokens;
            Ok(())
        } else {
            Err((tokens - self.tokens) / refill_rate)
        }
    }
}

/// In-memory per-tenant rate limiter.
///
/// The bucket map is guarded by a read-write lock; each bucket has its own
/// mutex, so steady-state checks for distinct tenants contend only on the
/// map read lock.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    /// Tokens per second.
    refill_rate: f64,
    buckets: RwLock<HashMap<TenantId, Mutex<TokenBucket>>>,
}

impl RateLimiter {
    /// `rate_per_minute` submissions per tenant, with burst capacity
    /// `burst_multiplier × rate_per_minute / 60` (never below one token, or
    /// nothing would ever pass).
    pub fn new(rate_per_minute: u32, burst_multiplier: f64) -> Self {
        let refill_rate = f64::from(rate_per_minute) / 60.0;
        Self {
            capacity: (burst_multiplier * refill_rate).max(1.0),
            refill_rate,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Consume one token for a submission attempt.
    ///
    /// On depletion returns [`DomainError::RateLimited`] carrying the time
    /// until a token is available.
    pub fn check(&self, tenant_id: &TenantId) -> Result<(), DomainError> {
        self.check_at(tenant_id, Instant::now())
    }

    fn check_at(&self, tenant_id: &TenantId, now: Instant) -> Result<(), DomainError> {
        {
            let buckets = self.buckets.read().unwrap();
            if let Some(bucket) = buckets.get(tenant_id) {
                return self.consume(bucket, now);
            }
        }

        let mut buckets = self.buckets.write().unwrap();
        let bucket = buckets
            .entry(tenant_id.clone())
            .or_insert_with(|| Mutex::new(TokenBucket::full(self.capacity, now)));
        self.consume(bucket, now)
    }

    fn consume(&self, bucket: &Mutex<TokenBucket>, now: Instant) -> Result<(), DomainError> {
        bucket
            .lock()
            .unwrap()
            .try_consume(self.capacity, self.refill_rate, 1.0, now)
            .map_err(DomainError::rate_limited)
    }

    /// Forget a tenant's bucket (it refills to full on next use).
    pub fn reset(&self, tenant_id: &TenantId) {
        self.buckets.write().unwrap().remove(tenant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn tenant(name: &str) -> TenantId {
        TenantId::new(name).unwrap()
    }

    #[test]
    fn burst_capacity_then_rate_limited() {
        // 60/min -> 1 token/s, capacity 2.
        let limiter = RateLimiter::new(60, 2.0);
        let t = tenant("t1");
        let now = Instant::now();

        assert!(limiter.check_at(&t, now).is_ok());
        assert!(limiter.check_at(&t, now).is_ok());

        let err = limiter.check_at(&t, now).unwrap_err();
        match err {
            DomainError::RateLimited {
                retry_after_seconds,
            } => {
                assert!(retry_after_seconds > 0.0 && retry_after_seconds <= 1.0);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn tokens_refill_over_time() {
        let limiter = RateLimiter::new(60, 1.0); // 1 token/s, capacity 1
        let t = tenant("t1");
        let start = Instant::now();

        assert!(limiter.check_at(&t, start).is_ok());
        assert!(limiter.check_at(&t, start).is_err());

        // After 1.5 simulated seconds one token is back.
        assert!(limiter.check_at(&t, start + Duration::from_millis(1500)).is_ok());
    }

    #[test]
    fn tenants_have_independent_buckets() {
        let limiter = RateLimiter::new(60, 1.0);
        let now = Instant::now();

        assert!(limiter.check_at(&tenant("a"), now).is_ok());
        assert!(limiter.check_at(&tenant("a"), now).is_err());
        assert!(limiter.check_at(&tenant("b"), now).is_ok());
    }

    #[test]
    fn capacity_never_drops_below_one_token() {
        // 1/min with small multiplier would give capacity 0.03; clamped to 1.
        let limiter = RateLimiter::new(1, 2.0);
        assert!(limiter.check_at(&tenant("t"), Instant::now()).is_ok());
    }

    #[test]
    fn reset_restores_a_full_bucket() {
        let limiter = RateLimiter::new(60, 1.0);
        let t = tenant("t1");
        let now = Instant::now();

        assert!(limiter.check_at(&t, now).is_ok());
        assert!(limiter.check_at(&t, now).is_err());

        limiter.reset(&t);
        assert!(limiter.check_at(&t, now).is_ok());
    }
}
