//! Domain error model.
//!
//! Domain errors represent **business failures**: validation, illegal state
//! transitions, missing resources. Infrastructure failures (connection loss,
//! query errors) live in the store layer's own error type and are kept
//! separate so callers can tell "you asked for something wrong" apart from
//! "the database is down".

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error (deterministic business failures).
///
/// Errors are `Clone` and `PartialEq` so they can cross thread boundaries
/// and be compared in tests.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// An operation was attempted from a state that does not allow it
    /// (e.g. reviving a job that is not in the dead-letter state).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A requested resource was not found.
    #[error("not found")]
    NotFound,

    /// The per-tenant submission bucket is empty.
    #[error("rate limited; retry after {retry_after_seconds:.1}s")]
    RateLimited { retry_after_seconds: f64 },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn rate_limited(retry_after_seconds: f64) -> Self {
        Self::RateLimited {
            retry_after_seconds,
        }
    }
}
