//! Handler contract and registry.
//!
//! Handlers are external to the core: the queue dispatches on the payload's
//! `job_type` string and treats the handler as an opaque function that
//! succeeds or fails. Handlers MUST tolerate being invoked more than once
//! with the same input; the queue guarantees at-least-once, not exactly-once.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use forgeq_core::{JobId, TenantId};

/// Failure reported by a handler. Retried up to the job's attempt budget.
#[derive(Debug, Error, Clone)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// Context passed to a handler for one execution attempt.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub tenant_id: TenantId,
    /// 1-indexed: the claim that produced this execution already counted.
    pub attempt: u32,
    pub max_attempts: u32,
    pub payload: Value,
    pub lease_expires_at: DateTime<Utc>,
}

impl JobContext {
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt)
    }

    /// The `data` object of the payload, if present.
    pub fn data(&self) -> Option<&Value> {
        self.payload.get("data")
    }
}

/// A job handler.
///
/// The cancellation token fires when the worker drains or the job's lease is
/// lost; a cancelled handler's outcome is ignored, so returning early is
/// always safe.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: JobContext, cancel: CancellationToken) -> Result<(), HandlerError>;
}

/// Blanket impl so plain async closures wrapped in a newtype are not needed
/// for the common case of a stateless function handler.
#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(JobContext, CancellationToken) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn run(&self, ctx: JobContext, cancel: CancellationToken) -> Result<(), HandlerError> {
        self(ctx, cancel).await
    }
}

/// Maps `job_type` strings to handlers.
///
/// Populated at startup, read-only afterwards; no synchronization needed on
/// the dispatch path.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a job type. Last registration wins.
    pub fn register(&mut self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_type.into(), handler);
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn job_types(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }
}

impl core::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(attempt: u32, max_attempts: u32) -> JobContext {
        JobContext {
            job_id: JobId::new(),
            tenant_id: TenantId::new("t1").unwrap(),
            attempt,
            max_attempts,
            payload: json!({"job_type": "noop", "data": {"k": "v"}}),
            lease_expires_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn function_handlers_dispatch_by_job_type() {
        let mut registry = HandlerRegistry::new();
        registry.register(
            "noop",
            Arc::new(|_ctx: JobContext, _cancel: CancellationToken| async {
                Ok::<(), HandlerError>(())
            }),
        );

        assert!(registry.get("noop").is_some());
        assert!(registry.get("missing").is_none());

        let handler = registry.get("noop").unwrap();
        let result = handler.run(ctx(1, 3), CancellationToken::new()).await;
        assert!(result.is_ok());
    }

    #[test]
    fn context_attempt_accounting() {
        let c = ctx(1, 3);
        assert!(!c.is_last_attempt());
        assert_eq!(c.remaining_attempts(), 2);

        let last = ctx(3, 3);
        assert!(last.is_last_attempt());
        assert_eq!(last.remaining_attempts(), 0);
    }

    #[test]
    fn context_exposes_payload_data() {
        let c = ctx(1, 3);
        assert_eq!(c.data().unwrap()["k"], "v");
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = HandlerRegistry::new();
        registry.register(
            "dup",
            Arc::new(|_: JobContext, _: CancellationToken| async {
                Err::<(), HandlerError>("first".into())
            }),
        );
        registry.register(
            "dup",
            Arc::new(|_: JobContext, _: CancellationToken| async {
                Ok::<(), HandlerError>(())
            }),
        );
        assert_eq!(registry.len(), 1);
    }
}
