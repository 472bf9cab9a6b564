//! Built-in handlers.
//!
//! Operational handlers every deployment gets for smoke-testing the queue:
//! `echo` (succeed immediately), `sleep` (hold a lease, exercises heartbeat),
//! and `failing_job` (always fail, exercises retry and dead-letter).
//! Real handlers register alongside these at startup.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use forgeq_queue::{HandlerError, HandlerRegistry, JobContext, JobHandler};

/// Succeeds immediately. The no-op of job handlers.
pub struct EchoHandler;

#[async_trait]
impl JobHandler for EchoHandler {
    async fn run(&self, ctx: JobContext, _cancel: CancellationToken) -> Result<(), HandlerError> {
        tracing::info!(job_id = %ctx.job_id, attempt = ctx.attempt, "echo");
        Ok(())
    }
}

/// Sleeps for `data.duration_seconds` (default 1). Long sleeps exercise
/// lease extension; the handler honors cancellation.
pub struct SleepHandler;

#[async_trait]
impl JobHandler for SleepHandler {
    async fn run(&self, ctx: JobContext, cancel: CancellationToken) -> Result<(), HandlerError> {
        let seconds = ctx
            .data()
            .and_then(|d| d.get("duration_seconds"))
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(1.0)
            .max(0.0);

        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs_f64(seconds)) => Ok(()),
            _ = cancel.cancelled() => Err(HandlerError::new("cancelled while sleeping")),
        }
    }
}

/// Always fails, carrying the attempt number in the message.
pub struct FailingHandler;

#[async_trait]
impl JobHandler for FailingHandler {
    async fn run(&self, ctx: JobContext, _cancel: CancellationToken) -> Result<(), HandlerError> {
        Err(HandlerError::new(format!(
            "intentional failure on attempt {}",
            ctx.attempt
        )))
    }
}

/// Register the built-in handlers.
pub fn register_builtin(registry: &mut HandlerRegistry) {
    registry.register("echo", Arc::new(EchoHandler));
    registry.register("sleep", Arc::new(SleepHandler));
    registry.register("failing_job", Arc::new(FailingHandler));
}
