//! Lifecycle audit sinks.
//!
//! The supervisor records every process state transition, and the arbiter
//! every terminal transaction failure, as an [`AuditEvent`]. Events are
//! recorded while the owning registry lock is held, so the audit trail never
//! disagrees with the state it describes.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::util::clock::now_ms;

/// Audit event structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Monotonic sequence number within the recording component.
    pub seq: u64,
    /// Component that recorded the event (`supervisor`, `arbiter`).
    pub component: String,
    /// Process or device name.
    pub subject: String,
    /// Action taken (`starting`, `running`, `failed`, `failed_exhausted`, `stopped`, `bus_error`, ...).
    pub action: String,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: AuditEvent);
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: AuditEvent) {}
}

/// Bounded in-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: Mutex<VecDeque<AuditEvent>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events.min(1024))),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Actions recorded for one subject, oldest first.
    #[must_use]
    pub fn actions_for(&self, subject: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.subject == subject)
            .map(|e| e.action.clone())
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Helper to build an audit event from context.
pub fn build_audit_event(
    seq: u64,
    component: impl Into<String>,
    subject: impl Into<String>,
    action: impl Into<String>,
    detail: Option<String>,
) -> AuditEvent {
    AuditEvent {
        seq,
        component: component.into(),
        subject: subject.into(),
        action: action.into(),
        created_at_ms: now_ms(),
        detail,
    }
}
