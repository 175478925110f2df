//! Integration tests for the bus arbiter
//!
//! These tests drive an arbiter over a scripted simulated bus:
//! - Priority order and FIFO tie-breaking
//! - Per-device ordering across retries
//! - Retry budgets and error mapping
//! - Cancellation, queue limits, rate limiting and shutdown
//! - Bus clock tuning and congestion sampling

mod common;

use std::thread;
use std::time::Duration;

use common::{arbiter, arbiter_with, fast_arbiter_config, wait_until, BUS, DEADLINE, MAX_HZ};
use rand::Rng;
use robosched::config::DeviceConfig;
use robosched::core::{
    BusError, ConfigError, DeviceHandle, PriorityLevel, TransactionHandle, TransactionStatus,
};
use robosched::infra::bus::{EndpointError, SimOutcome};

// ============================================================================
// HELPERS
// ============================================================================

const BLOCKER: u16 = 0x10;

fn device(fx: &common::ArbiterFixture, name: &str, address: u16, priority: PriorityLevel) -> DeviceHandle {
    fx.arbiter
        .register_device(DeviceConfig::new(name, BUS, address).with_priority(priority))
        .unwrap()
}

/// Occupy the bus with one held transaction so later submissions queue up.
fn occupy_bus(fx: &common::ArbiterFixture) -> TransactionHandle {
    let blocker = device(fx, "blocker", BLOCKER, PriorityLevel::Background);
    fx.bus.hold(BLOCKER);
    let handle = fx.arbiter.submit(&blocker, vec![0xFF], 0, None).unwrap();
    assert!(wait_until(DEADLINE, || fx.bus.waiting() == 1));
    handle
}

fn addresses_after_blocker(fx: &common::ArbiterFixture) -> Vec<u16> {
    fx.bus
        .attempts()
        .iter()
        .map(|a| a.address)
        .filter(|a| *a != BLOCKER)
        .collect()
}

// ============================================================================
// ORDERING
// ============================================================================

#[test]
fn test_higher_priority_runs_first_but_in_flight_is_not_preempted() {
    let fx = arbiter();
    let blocker = occupy_bus(&fx);

    let low = device(&fx, "logger", 0x20, PriorityLevel::Low);
    let medium = device(&fx, "battery", 0x21, PriorityLevel::Medium);
    let emergency = device(&fx, "estop", 0x22, PriorityLevel::Emergency);
    let critical = device(&fx, "servo", 0x23, PriorityLevel::Critical);
    let handles: Vec<_> = [&low, &medium, &emergency, &critical]
        .into_iter()
        .map(|d| fx.arbiter.submit(d, vec![1], 0, None).unwrap())
        .collect();
    assert_eq!(blocker.status(), TransactionStatus::Executing);
    assert_eq!(fx.arbiter.queue_depth(), 4);

    fx.bus.release(BLOCKER);
    assert_eq!(blocker.wait(), Ok(Vec::new()));
    for handle in &handles {
        assert_eq!(handle.wait(), Ok(Vec::new()));
    }
    assert_eq!(addresses_after_blocker(&fx), vec![0x22, 0x23, 0x21, 0x20]);
    fx.arbiter.shutdown();
}

#[test]
fn test_equal_priority_is_served_in_submission_order() {
    let fx = arbiter();
    let _blocker = occupy_bus(&fx);

    let devices: Vec<_> = (0..5_u16)
        .map(|i| device(&fx, &format!("joint-{i}"), 0x30 + i, PriorityLevel::High))
        .collect();
    // Submit in reverse address order.
    let handles: Vec<_> = devices
        .iter()
        .rev()
        .map(|d| fx.arbiter.submit(d, vec![0], 0, None).unwrap())
        .collect();

    fx.bus.release(BLOCKER);
    for handle in &handles {
        handle.wait().unwrap();
    }
    assert_eq!(
        addresses_after_blocker(&fx),
        vec![0x34, 0x33, 0x32, 0x31, 0x30]
    );
    fx.arbiter.shutdown();
}

#[test]
fn test_same_device_completes_in_submission_order_across_retries() {
    let fx = arbiter();
    let imu = device(&fx, "imu", 0x68, PriorityLevel::Critical);
    fx.bus.script(
        0x68,
        [
            SimOutcome::Fail(EndpointError::NoAck),
            SimOutcome::Fail(EndpointError::Timeout),
        ],
    );

    let first = fx.arbiter.submit(&imu, vec![1], 1, None).unwrap();
    let second = fx.arbiter.submit(&imu, vec![2], 1, None).unwrap();
    let third = fx.arbiter.submit(&imu, vec![3], 1, None).unwrap();
    assert_eq!(first.wait(), Ok(vec![1]));
    assert_eq!(second.wait(), Ok(vec![2]));
    assert_eq!(third.wait(), Ok(vec![3]));

    let payloads: Vec<u8> = fx.bus.attempts().iter().map(|a| a.payload[0]).collect();
    assert_eq!(payloads, vec![1, 1, 1, 2, 3]);
    assert_eq!(first.attempts(), 3);
    fx.arbiter.shutdown();
}

#[test]
fn test_retrying_device_does_not_block_other_devices() {
    let config = fast_arbiter_config().with_retry_backoff(robosched::core::BackoffPolicy::new(
        Duration::from_millis(100),
        Duration::from_millis(100),
    ));
    let fx = arbiter_with(config);
    let flaky = device(&fx, "flaky", 0x40, PriorityLevel::Critical);
    let steady = device(&fx, "steady", 0x41, PriorityLevel::Low);
    fx.bus.script(0x40, [SimOutcome::Fail(EndpointError::NoAck)]);

    let flaky_txn = fx.arbiter.submit(&flaky, vec![1], 0, None).unwrap();
    assert!(wait_until(DEADLINE, || fx.bus.attempt_count(0x40) == 1));
    let steady_txn = fx.arbiter.submit(&steady, vec![2], 0, None).unwrap();

    // The low device runs while the critical one waits out its backoff.
    assert_eq!(steady_txn.wait(), Ok(Vec::new()));
    assert_eq!(flaky_txn.status(), TransactionStatus::Queued);
    assert_eq!(flaky_txn.wait(), Ok(Vec::new()));
    assert_eq!(addresses_after_blocker(&fx), vec![0x40, 0x41, 0x40]);
    fx.arbiter.shutdown();
}

// ============================================================================
// FAILURES
// ============================================================================

#[test]
fn test_retry_budget_bounds_attempts() {
    let fx = arbiter();
    let gripper = fx
        .arbiter
        .register_device(DeviceConfig::new("gripper", BUS, 0x50).with_retry_budget(3))
        .unwrap();
    fx.bus.set_default(0x50, SimOutcome::Fail(EndpointError::NoAck));

    let handle = fx.arbiter.submit(&gripper, vec![0x01], 0, None).unwrap();
    assert_eq!(handle.wait(), Err(BusError::NoAck { attempts: 3 }));
    assert_eq!(handle.status(), TransactionStatus::Failed);
    assert_eq!(fx.bus.attempt_count(0x50), 3);

    let stats = fx.arbiter.device_stats("gripper").unwrap();
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.attempts, 3);
    assert!((stats.error_rate - 1.0).abs() < f64::EPSILON);
    assert_eq!(fx.arbiter.bus_stats(BUS).unwrap().errors, 1);

    let bus_errors: Vec<_> = fx
        .audit
        .events()
        .into_iter()
        .filter(|e| e.action == "bus_error")
        .collect();
    assert_eq!(bus_errors.len(), 1);
    assert_eq!(bus_errors[0].subject, "gripper");
    assert_eq!(bus_errors[0].component, "arbiter");
    fx.arbiter.shutdown();
}

#[test]
fn test_timeout_and_short_read_are_reported() {
    let fx = arbiter();
    let sonar = fx
        .arbiter
        .register_device(DeviceConfig::new("sonar", BUS, 0x70).with_retry_budget(1))
        .unwrap();

    fx.bus.script(0x70, [SimOutcome::Fail(EndpointError::Timeout)]);
    let timed_out = fx.arbiter.submit(&sonar, vec![0], 2, None).unwrap();
    assert_eq!(timed_out.wait(), Err(BusError::Timeout { attempts: 1 }));

    fx.bus.script(0x70, [SimOutcome::ShortRead(1)]);
    let short = fx.arbiter.submit(&sonar, vec![0], 2, None).unwrap();
    assert!(matches!(
        short.wait(),
        Err(BusError::BusFault { attempts: 1, .. })
    ));
    fx.arbiter.shutdown();
}

#[test]
fn test_randomized_failures_never_exceed_budget() {
    let fx = arbiter();
    let budget = 4;
    let arm = fx
        .arbiter
        .register_device(DeviceConfig::new("arm", BUS, 0x60).with_retry_budget(budget))
        .unwrap();

    let mut rng = rand::rng();
    let script: Vec<SimOutcome> = (0..200)
        .map(|_| {
            if rng.random_bool(0.4) {
                SimOutcome::Fail(EndpointError::NoAck)
            } else {
                SimOutcome::Succeed
            }
        })
        .collect();
    fx.bus.script(0x60, script);

    let handles: Vec<_> = (0..40)
        .map(|i| fx.arbiter.submit(&arm, vec![i], 0, None).unwrap())
        .collect();
    let mut finished = 0;
    for handle in &handles {
        let result = handle.wait();
        assert!(handle.attempts() <= budget);
        if let Err(err) = result {
            assert_eq!(err, BusError::NoAck { attempts: budget });
        }
        finished += 1;
    }

    let stats = fx.arbiter.device_stats("arm").unwrap();
    assert_eq!(finished, 40);
    assert_eq!(stats.completed + stats.errors, 40);
    assert_eq!(
        stats.attempts,
        handles.iter().map(|h| u64::from(h.attempts())).sum::<u64>()
    );
    fx.arbiter.shutdown();
}

// ============================================================================
// CANCEL, LIMITS, SHUTDOWN
// ============================================================================

#[test]
fn test_cancel_only_affects_queued_transactions() {
    let fx = arbiter();
    let blocker = occupy_bus(&fx);
    let camera = device(&fx, "camera", 0x3C, PriorityLevel::Medium);
    let queued = fx.arbiter.submit(&camera, vec![0], 4, None).unwrap();

    assert!(fx.arbiter.cancel(queued.id()));
    assert_eq!(queued.wait(), Err(BusError::Cancelled));
    assert_eq!(queued.status(), TransactionStatus::Cancelled);
    assert!(!fx.arbiter.cancel(queued.id()));
    assert!(!fx.arbiter.cancel(blocker.id()));
    assert_eq!(fx.arbiter.queue_depth(), 0);

    fx.bus.release(BLOCKER);
    assert!(blocker.wait().is_ok());
    assert_eq!(fx.bus.attempt_count(0x3C), 0);
    fx.arbiter.shutdown();
}

#[test]
fn test_full_queue_rejects_submissions() {
    let fx = arbiter_with(fast_arbiter_config().with_max_queue_depth(2));
    let _blocker = occupy_bus(&fx);
    let camera = device(&fx, "camera", 0x3C, PriorityLevel::Medium);

    fx.arbiter.submit(&camera, vec![0], 0, None).unwrap();
    fx.arbiter.submit(&camera, vec![1], 0, None).unwrap();
    assert_eq!(
        fx.arbiter.submit(&camera, vec![2], 0, None).unwrap_err(),
        BusError::QueueFull(2)
    );
    fx.bus.release(BLOCKER);
    fx.arbiter.shutdown();
}

#[test]
fn test_rate_limit_spaces_transactions() {
    let fx = arbiter();
    let thermo = fx
        .arbiter
        .register_device(DeviceConfig::new("thermo", BUS, 0x48).with_max_rate_hz(20.0))
        .unwrap();

    let handles: Vec<_> = (0..3)
        .map(|i| fx.arbiter.submit(&thermo, vec![i], 0, None).unwrap())
        .collect();
    for handle in &handles {
        handle.wait().unwrap();
    }

    let starts: Vec<_> = fx.bus.attempts().iter().map(|a| a.at).collect();
    assert_eq!(starts.len(), 3);
    for pair in starts.windows(2) {
        assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(45));
    }
    fx.arbiter.shutdown();
}

#[test]
fn test_shutdown_fails_queued_and_finishes_in_flight() {
    let fx = arbiter();
    let blocker = occupy_bus(&fx);
    let camera = device(&fx, "camera", 0x3C, PriorityLevel::Emergency);
    let queued = fx.arbiter.submit(&camera, vec![0], 0, None).unwrap();

    let shutdown = {
        let arbiter = fx.arbiter.clone();
        thread::spawn(move || arbiter.shutdown())
    };
    thread::sleep(Duration::from_millis(20));
    assert_eq!(
        fx.arbiter.submit(&camera, vec![1], 0, None).unwrap_err(),
        BusError::Shutdown
    );
    fx.bus.release(BLOCKER);
    shutdown.join().unwrap();

    assert_eq!(blocker.wait(), Ok(Vec::new()));
    assert_eq!(queued.wait(), Err(BusError::Shutdown));
    assert_eq!(fx.bus.attempt_count(0x3C), 0);
}

#[test]
fn test_deregister_cancels_queued_and_invalidates_handle() {
    let fx = arbiter();
    let _blocker = occupy_bus(&fx);
    let camera = device(&fx, "camera", 0x3C, PriorityLevel::Medium);
    let queued = fx.arbiter.submit(&camera, vec![0], 0, None).unwrap();

    fx.arbiter.deregister_device(&camera).unwrap();
    assert_eq!(queued.wait(), Err(BusError::Cancelled));
    assert_eq!(
        fx.arbiter.submit(&camera, vec![0], 0, None).unwrap_err(),
        BusError::UnknownDevice("camera".into())
    );
    assert_eq!(
        fx.arbiter.deregister_device(&camera),
        Err(BusError::UnknownDevice("camera".into()))
    );

    // A new registration under the same name gets a fresh handle.
    let again = device(&fx, "camera", 0x3C, PriorityLevel::Medium);
    assert_ne!(again.registration, camera.registration);
    assert!(fx.arbiter.submit(&camera, vec![0], 0, None).is_err());
    fx.bus.release(BLOCKER);
    fx.arbiter.shutdown();
}

#[test]
fn test_registration_conflicts_are_rejected() {
    let fx = arbiter();
    device(&fx, "imu", 0x68, PriorityLevel::Critical);
    assert!(matches!(
        fx.arbiter
            .register_device(DeviceConfig::new("imu-2", BUS, 0x68)),
        Err(ConfigError::DuplicateDevice { address: 0x68, .. })
    ));
    assert!(matches!(
        fx.arbiter.register_device(DeviceConfig::new("imu", BUS, 0x69)),
        Err(ConfigError::DuplicateDevice { .. })
    ));
    assert_eq!(
        fx.arbiter.register_device(DeviceConfig::new("ghost", 9, 0x10)),
        Err(ConfigError::UnknownBus {
            name: "ghost".into(),
            bus: 9
        })
    );
    fx.arbiter.shutdown();
}

// ============================================================================
// BUS CLOCK AND CONGESTION
// ============================================================================

#[test]
fn test_bus_clock_follows_latency_critical_devices() {
    let fx = arbiter();
    assert_eq!(fx.arbiter.bus_frequency(BUS), Some(100_000));

    let servo = fx
        .arbiter
        .register_device(
            DeviceConfig::new("servo", BUS, 0x40)
                .with_priority(PriorityLevel::Critical)
                .with_required_frequency_hz(400_000),
        )
        .unwrap();
    assert_eq!(fx.arbiter.bus_frequency(BUS), Some(400_000));

    // Low-priority requirements never raise the clock.
    fx.arbiter
        .register_device(
            DeviceConfig::new("fan", BUS, 0x41)
                .with_priority(PriorityLevel::Low)
                .with_required_frequency_hz(MAX_HZ),
        )
        .unwrap();
    assert_eq!(fx.arbiter.bus_frequency(BUS), Some(400_000));

    // Capped at the hardware ceiling.
    let estop = fx
        .arbiter
        .register_device(
            DeviceConfig::new("estop", BUS, 0x42)
                .with_priority(PriorityLevel::Emergency)
                .with_required_frequency_hz(3_400_000),
        )
        .unwrap();
    assert_eq!(fx.arbiter.bus_frequency(BUS), Some(MAX_HZ));

    fx.arbiter.deregister_device(&estop).unwrap();
    fx.arbiter.deregister_device(&servo).unwrap();
    assert_eq!(fx.arbiter.bus_frequency(BUS), Some(100_000));
    assert_eq!(
        fx.bus.frequency_history(),
        vec![100_000, 400_000, MAX_HZ, 400_000, 100_000]
    );
    fx.arbiter.shutdown();
}

#[test]
fn test_utilization_tracks_active_devices_in_window() {
    let fx = arbiter();
    let busy = device(&fx, "busy", 0x20, PriorityLevel::Medium);
    device(&fx, "idle", 0x21, PriorityLevel::Medium);

    // Keep one device busy until a sample sees it.
    assert!(wait_until(DEADLINE, || {
        fx.arbiter.submit(&busy, vec![0], 0, None).unwrap().wait().unwrap();
        fx.arbiter
            .bus_stats(BUS)
            .is_some_and(|b| (b.utilization - 0.5).abs() < f64::EPSILON)
    }));
    // Goes back to zero once the window passes without activity.
    assert!(wait_until(DEADLINE, || {
        fx.arbiter
            .bus_stats(BUS)
            .is_some_and(|b| b.utilization == 0.0)
    }));
    let stats = fx.arbiter.bus_stats(BUS).unwrap();
    assert_eq!(stats.devices, 2);
    assert!(stats.transactions >= 1);
    fx.arbiter.shutdown();
}

#[test]
fn test_latency_average_is_recorded() {
    let fx = arbiter();
    fx.bus.set_latency(Duration::from_millis(3));
    let servo = device(&fx, "servo", 0x40, PriorityLevel::Critical);
    for _ in 0..3 {
        fx.arbiter.submit(&servo, vec![0], 0, None).unwrap().wait().unwrap();
    }
    let stats = fx.arbiter.device_stats("servo").unwrap();
    assert_eq!(stats.completed, 3);
    assert!(stats.avg_latency_ms.unwrap() >= 3.0);
    assert!(stats.last_activity_ms.is_some());
    fx.arbiter.shutdown();
}

// ============================================================================
// ASYNC
// ============================================================================

#[tokio::test]
async fn test_handle_can_be_awaited() {
    let fx = arbiter();
    let imu = device(&fx, "imu", 0x68, PriorityLevel::Critical);
    let bytes = fx.arbiter.submit(&imu, vec![0x3B, 0x3C], 4, None).unwrap().await;
    assert_eq!(bytes, Ok(vec![0x3B, 0x3C, 0x3B, 0x3C]));
    fx.arbiter.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cloned_handles_awaited_on_separate_tasks_all_complete() {
    let fx = arbiter();
    let imu = device(&fx, "imu", 0x68, PriorityLevel::Critical);
    fx.bus.hold(0x68);
    let handle = fx.arbiter.submit(&imu, vec![0x3B], 2, None).unwrap();
    assert!(wait_until(DEADLINE, || fx.bus.waiting() == 1));

    let first = tokio::spawn(handle.clone());
    let second = tokio::spawn(handle.clone());
    tokio::time::sleep(Duration::from_millis(20)).await;
    fx.bus.release(0x68);

    let first = tokio::time::timeout(Duration::from_secs(1), first).await;
    let second = tokio::time::timeout(Duration::from_secs(1), second).await;
    assert_eq!(first.expect("first awaiter woke").unwrap(), Ok(vec![0x3B, 0x3B]));
    assert_eq!(second.expect("second awaiter woke").unwrap(), Ok(vec![0x3B, 0x3B]));
    assert_eq!(handle.status(), TransactionStatus::Completed);
    fx.arbiter.shutdown();
}

#[test]
fn test_handles_join_with_futures() {
    let fx = arbiter();
    let imu = device(&fx, "imu", 0x68, PriorityLevel::Critical);
    let handles: Vec<_> = (0..4)
        .map(|i| fx.arbiter.submit(&imu, vec![i], 1, None).unwrap())
        .collect();
    let results = futures::executor::block_on(futures::future::join_all(handles));
    assert_eq!(
        results,
        vec![Ok(vec![0]), Ok(vec![1]), Ok(vec![2]), Ok(vec![3])]
    );
    fx.arbiter.shutdown();
}
