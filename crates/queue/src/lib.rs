//! `forgeq-queue` — the job queue's domain vocabulary.
//!
//! This crate defines **what** a job is; the store decides how it is
//! persisted, the worker how it is executed.
//!
//! - [`Job`]: the single entity all components communicate through
//! - [`RetryPolicy`]: exponential backoff with mandatory jitter
//! - [`JobHandler`]/[`HandlerRegistry`]: the dispatch seam to external code

pub mod handler;
pub mod job;
pub mod retry;

pub use handler::{HandlerError, HandlerRegistry, JobContext, JobHandler};
pub use job::{
    truncate_error, AckOutcome, Job, JobPriority, JobSpec, JobStatus, ReclaimOutcome,
    DEFAULT_MAX_ATTEMPTS, MAX_ERROR_LEN,
};
pub use retry::RetryPolicy;
