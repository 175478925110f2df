//! Tests for utility helpers

use std::time::{Duration, UNIX_EPOCH};

use robosched::util::{init_tracing, now_ms, system_time_ms};

#[test]
fn test_now_ms_advances() {
    let a = now_ms();
    std::thread::sleep(Duration::from_millis(2));
    assert!(now_ms() > a);
}

#[test]
fn test_system_time_ms() {
    assert_eq!(system_time_ms(UNIX_EPOCH + Duration::from_millis(1_500)), 1_500);
    assert_eq!(system_time_ms(UNIX_EPOCH - Duration::from_secs(1)), 0);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
}
