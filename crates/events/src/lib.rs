//! `forgeq-events` — job lifecycle events and their in-process fan-out.
//!
//! [`JobEvent`] is the queue's change feed: one notification per state
//! transition, tenant-scoped like everything else in the system. The
//! [`Telemetry`] handle fans events out to in-process taps, best-effort and
//! at-least-once; exporting them off the process (dashboards, metrics) is a
//! separate concern and not handled here.

pub mod job_event;
pub mod telemetry;

pub use job_event::JobEvent;
pub use telemetry::{EventSubscription, Telemetry};
