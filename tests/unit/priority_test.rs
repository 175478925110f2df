//! Tests for the priority model and backoff policy

use std::time::Duration;

use robosched::core::{translate, translate_with, BackoffPolicy, OsSchedule, PriorityLevel, SchedPolicy};

#[test]
fn test_every_pair_of_levels_is_monotonic() {
    for (i, lo) in PriorityLevel::ALL.iter().enumerate() {
        for hi in &PriorityLevel::ALL[i + 1..] {
            assert!(translate(*hi).favorability() >= translate(*lo).favorability());
            for policy in [SchedPolicy::Fifo, SchedPolicy::RoundRobin, SchedPolicy::Normal] {
                assert!(
                    translate_with(*hi, policy).favorability()
                        > translate_with(*lo, policy).favorability()
                );
            }
        }
    }
}

#[test]
fn test_values_stay_in_kernel_ranges() {
    for level in PriorityLevel::ALL {
        assert!((1..=99).contains(&level.rt_priority()), "{level}");
        assert!((-20..=19).contains(&level.niceness()), "{level}");
    }
}

#[test]
fn test_servo_class() {
    let servo: Vec<_> = PriorityLevel::ALL
        .into_iter()
        .filter(|l| l.is_latency_critical())
        .collect();
    assert_eq!(servo, vec![PriorityLevel::Critical, PriorityLevel::Emergency]);
}

#[test]
fn test_schedule_display() {
    assert_eq!(translate(PriorityLevel::Emergency).to_string(), "rt-fifo:95");
    assert_eq!(OsSchedule::nice(-5).to_string(), "nice:-5");
    assert_eq!(
        translate_with(PriorityLevel::Medium, SchedPolicy::RoundRobin).to_string(),
        "rt-rr:40"
    );
}

#[test]
fn test_backoff_is_linear_then_capped() {
    let backoff = BackoffPolicy::new(Duration::from_millis(5), Duration::from_millis(12));
    let delays: Vec<_> = (1..=4).map(|n| backoff.delay(n).as_millis()).collect();
    assert_eq!(delays, vec![5, 10, 12, 12]);
    assert_eq!(backoff.delay(u32::MAX), Duration::from_millis(12));
}

#[test]
fn test_backoff_rejects_cap_below_base() {
    let backoff = BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(5));
    assert!(backoff.validate().is_err());
}
