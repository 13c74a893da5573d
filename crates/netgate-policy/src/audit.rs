//! Per-lookup audit events
//!
//! The engine hands one [`AuditEvent`] per classification to an
//! [`AuditSink`]. Formatting, storage and transport belong to whoever sits
//! on the other side of the sink.

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use netgate_common::{Action, AtomicCounter, ConnectionTuple, GenerationId, RuleId, Timestamp, Verdict};
use serde::Serialize;

/// Audit record for one classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    /// Classified tuple
    pub tuple: ConnectionTuple,
    /// Decision
    pub verdict: Action,
    /// Deciding rule, `None` for the default policy
    pub rule_id: Option<RuleId>,
    /// Generation consulted
    pub generation_id: GenerationId,
    /// Wall-clock time of the lookup
    pub timestamp_nanos: u64,
}

impl AuditEvent {
    /// Build an event for a verdict, stamped now
    pub fn new(tuple: ConnectionTuple, verdict: &Verdict) -> Self {
        Self {
            tuple,
            verdict: verdict.action,
            rule_id: verdict.rule_id,
            generation_id: verdict.generation,
            timestamp_nanos: Timestamp::now().as_nanos(),
        }
    }
}

/// Receiver of audit events
///
/// Called on the lookup path, so implementations must not block.
pub trait AuditSink: Send + Sync {
    /// Accept one event
    fn record(&self, event: AuditEvent);

    /// Whether events should be built at all
    fn is_enabled(&self) -> bool {
        true
    }

    /// Events lost because the receiver could not keep up
    fn dropped(&self) -> u64 {
        0
    }
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: AuditEvent) {}

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Bounded channel sink
///
/// A full or disconnected channel drops the event and counts it; the lookup
/// never waits on the consumer.
#[derive(Debug)]
pub struct ChannelAuditSink {
    tx: Sender<AuditEvent>,
    dropped: AtomicCounter,
}

impl ChannelAuditSink {
    /// Create sink and the receiving end for the collaborator
    ///
    /// Capacity is at least one: a rendezvous channel would drop nearly every event.
    pub fn bounded(capacity: usize) -> (Self, Receiver<AuditEvent>) {
        let (tx, rx) = channel::bounded(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicCounter::new(0),
            },
            rx,
        )
    }
}

impl AuditSink for ChannelAuditSink {
    #[inline]
    fn record(&self, event: AuditEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.inc();
            }
        }
    }

    fn dropped(&self) -> u64 {
        self.dropped.get()
    }
}
