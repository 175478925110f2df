//! Tests for audit sinks

use robosched::core::{build_audit_event, AuditSink, InMemoryAuditSink, NullAuditSink};

#[test]
fn test_in_memory_audit_sink() {
    let sink = InMemoryAuditSink::new(10);
    sink.record(build_audit_event(1, "supervisor", "gait", "starting", None));
    sink.record(build_audit_event(
        2,
        "supervisor",
        "gait",
        "failed",
        Some("exit code 1".into()),
    ));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].seq, 1);
    assert_eq!(events[1].action, "failed");
    assert_eq!(events[1].detail.as_deref(), Some("exit code 1"));
}

#[test]
fn test_audit_sink_overflow() {
    let sink = InMemoryAuditSink::new(2);
    for seq in 1..=3 {
        sink.record(build_audit_event(seq, "arbiter", "imu", "bus_error", None));
    }

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].seq, 2); // First one popped
    assert_eq!(events[1].seq, 3);
}

#[test]
fn test_actions_for_filters_by_subject() {
    let sink = InMemoryAuditSink::new(16);
    sink.record(build_audit_event(1, "supervisor", "gait", "starting", None));
    sink.record(build_audit_event(2, "supervisor", "vision", "starting", None));
    sink.record(build_audit_event(3, "supervisor", "gait", "running", None));

    assert_eq!(sink.actions_for("gait"), vec!["starting", "running"]);
    assert!(sink.actions_for("lidar").is_empty());
}

#[test]
fn test_build_audit_event() {
    let event = build_audit_event(7, "arbiter", "servo", "registered", None);
    assert_eq!(event.seq, 7);
    assert_eq!(event.component, "arbiter");
    assert_eq!(event.subject, "servo");
    assert_eq!(event.action, "registered");
    assert_eq!(event.detail, None);
    assert!(event.created_at_ms > 0);
}

#[test]
fn test_null_sink_accepts_events() {
    let sink: &dyn AuditSink = &NullAuditSink;
    sink.record(build_audit_event(1, "supervisor", "gait", "stopped", None));
}
