//! `forgeq-worker` — the job processor.
//!
//! - [`LeaseManager`]: claim policy, empty-poll backoff, heartbeat
//! - [`Worker`]: the per-process runtime with graceful drain
//! - [`handlers`]: built-in smoke-test handlers

pub mod handlers;
pub mod identity;
pub mod lease;
pub mod worker;

pub use handlers::register_builtin;
pub use identity::default_worker_id;
pub use lease::{HeartbeatReport, LeaseConfig, LeaseManager, PollBackoff};
pub use worker::{StatsHandle, Worker, WorkerError, WorkerState, WorkerStats};
