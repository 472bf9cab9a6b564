//! In-process fan-out of job lifecycle events.
//!
//! The submitter, worker, and reaper emit [`JobEvent`]s; consumers tap the
//! stream, either the whole queue or one tenant's slice of it. Delivery is
//! strictly best-effort and at-least-once: a slow, dropped, or poisoned tap
//! never fails the store operation that produced the event, and consumers
//! must tolerate duplicates the same way handlers do.

use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use forgeq_core::TenantId;

use crate::job_event::JobEvent;

/// A tap on the event stream.
///
/// Events buffer until received; dropping the subscription detaches the tap
/// on the next emit.
#[derive(Debug)]
pub struct EventSubscription {
    receiver: mpsc::Receiver<JobEvent>,
}

impl EventSubscription {
    /// Next event, if one is already buffered.
    pub fn try_recv(&self) -> Option<JobEvent> {
        self.receiver.try_recv().ok()
    }

    /// Block up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<JobEvent> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Everything currently buffered, in emission order.
    pub fn drain(&self) -> Vec<JobEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }
}

#[derive(Debug)]
struct Tap {
    /// `None` taps the whole queue; `Some` only that tenant's jobs.
    tenant: Option<TenantId>,
    tx: mpsc::Sender<JobEvent>,
}

impl Tap {
    fn wants(&self, event: &JobEvent) -> bool {
        match &self.tenant {
            Some(tenant) => *tenant == event.tenant_id,
            None => true,
        }
    }
}

/// Shared handle for publishing and tapping [`JobEvent`]s.
///
/// Created once at startup and injected into the submitter, worker, and
/// reaper. Cheap to clone; all clones feed the same taps.
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    taps: Arc<Mutex<Vec<Tap>>>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an event to every interested tap, detaching dead ones.
    /// Never fails: a poisoned tap list only costs this event.
    pub fn emit(&self, event: JobEvent) {
        let Ok(mut taps) = self.taps.lock() else {
            return;
        };
        taps.retain(|tap| {
            if !tap.wants(&event) {
                return true;
            }
            tap.tx.send(event.clone()).is_ok()
        });
    }

    /// Tap every event in the queue.
    pub fn subscribe(&self) -> EventSubscription {
        self.tap(None)
    }

    /// Tap one tenant's events only.
    pub fn subscribe_tenant(&self, tenant_id: TenantId) -> EventSubscription {
        self.tap(Some(tenant_id))
    }

    fn tap(&self, tenant: Option<TenantId>) -> EventSubscription {
        let (tx, receiver) = mpsc::channel();
        if let Ok(mut taps) = self.taps.lock() {
            taps.push(Tap { tenant, tx });
        }
        EventSubscription { receiver }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeq_core::JobId;

    fn tenant(name: &str) -> TenantId {
        TenantId::new(name).unwrap()
    }

    #[test]
    fn every_tap_sees_every_event_in_order() {
        let telemetry = Telemetry::new();
        let a = telemetry.subscribe();
        let b = telemetry.subscribe();

        let t1 = tenant("t1");
        telemetry.emit(JobEvent::created(JobId::new(), t1.clone(), Some("echo")));
        telemetry.emit(JobEvent::completed(JobId::new(), t1));

        for tap in [a, b] {
            let events = tap.drain();
            assert_eq!(events.len(), 2);
            assert_eq!(events[0].event_type, "job.created");
            assert_eq!(events[1].event_type, "job.completed");
        }
    }

    #[test]
    fn tenant_taps_only_see_their_tenant() {
        let telemetry = Telemetry::new();
        let t1_tap = telemetry.subscribe_tenant(tenant("t1"));
        let firehose = telemetry.subscribe();

        telemetry.emit(JobEvent::completed(JobId::new(), tenant("t1")));
        telemetry.emit(JobEvent::completed(JobId::new(), tenant("t2")));

        let t1_events = t1_tap.drain();
        assert_eq!(t1_events.len(), 1);
        assert_eq!(t1_events[0].tenant_id, tenant("t1"));

        assert_eq!(firehose.drain().len(), 2);
    }

    #[test]
    fn dropped_taps_are_detached_on_emit() {
        let telemetry = Telemetry::new();
        drop(telemetry.subscribe());
        let live = telemetry.subscribe();

        telemetry.emit(JobEvent::completed(JobId::new(), tenant("t1")));
        telemetry.emit(JobEvent::completed(JobId::new(), tenant("t1")));

        assert_eq!(live.drain().len(), 2);
    }

    #[test]
    fn emit_without_taps_is_a_no_op() {
        let telemetry = Telemetry::new();
        telemetry.emit(JobEvent::completed(JobId::new(), tenant("t1")));
    }

    #[test]
    fn recv_timeout_returns_buffered_events() {
        let telemetry = Telemetry::new();
        let tap = telemetry.subscribe();

        telemetry.emit(JobEvent::completed(JobId::new(), tenant("t1")));
        assert!(tap.recv_timeout(Duration::from_millis(10)).is_some());
        assert!(tap.recv_timeout(Duration::from_millis(10)).is_none());
    }
}
