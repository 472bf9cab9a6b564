//! `forgeq-infra` — persistence and submission for the forgeq job queue.
//!
//! - [`store`]: the `JobStore` contract with Postgres and in-memory
//!   implementations. The store exclusively owns job-row mutation.
//! - [`submit`]: validation + idempotent persistence of new submissions.
//! - [`rate_limit`]: per-tenant token buckets.
//! - [`config`]: environment-driven process configuration.

pub mod config;
pub mod rate_limit;
pub mod store;
pub mod submit;


pub use config::Config;
pub use rate_limit::RateLimiter;
pub use store::{
    InMemoryJobStore, JobPage, JobStore, PostgresJobStore, ReclaimedJob, StatusCounts, StoreError,
};
pub use submit::{SubmitError, SubmitReceipt, SubmitRequest, Submitter, MAX_ATTEMPTS_LIMIT};
