//! Core domain types shared by every forgeq crate.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{JobId, TenantId, WorkerId, MAX_IDENT_LEN};
