//! Tests for error types

use robosched::core::{
    BusError, ConfigError, LaunchError, SchedulingError, StartupError, SupervisorError,
};

#[test]
fn test_bus_error_display() {
    assert_eq!(
        BusError::NoAck { attempts: 3 }.to_string(),
        "device did not acknowledge after 3 attempt(s)"
    );
    assert_eq!(BusError::QueueFull(8).to_string(), "queue full (depth 8)");
    assert_eq!(
        BusError::UnknownDevice("imu".into()).to_string(),
        "unknown device `imu`"
    );
}

#[test]
fn test_config_error_display() {
    let err = ConfigError::DuplicateDevice {
        name: "imu".into(),
        bus: 1,
        address: 0x68,
    };
    assert_eq!(
        err.to_string(),
        "device `imu` conflicts with an existing device on bus 1 address 0x68"
    );
    let err = ConfigError::InvalidCpu {
        name: "gait".into(),
        cpu: 9,
        available: 4,
    };
    assert!(err.to_string().contains("cpu 9 out of range"));
}

#[test]
fn test_supervisor_error_wraps_launch_error() {
    let err: SupervisorError = LaunchError::NoFallback {
        name: "servo".into(),
        reason: "EPERM".into(),
    }
    .into();
    assert_eq!(
        err.to_string(),
        "process `servo` has no usable scheduling fallback: EPERM"
    );
    assert!(matches!(err, SupervisorError::Launch(_)));
}

#[test]
fn test_startup_error_from_config() {
    let err: StartupError = ConfigError::InvalidValue("bus 1 listed twice".into()).into();
    assert_eq!(err.to_string(), "invalid value: bus 1 listed twice");
}

#[test]
fn test_scheduling_error_serializes() {
    let err = SchedulingError::NicenessRejected {
        value: -15,
        reason: "EPERM".into(),
    };
    let json = serde_json::to_string(&err).unwrap();
    let back: SchedulingError = serde_json::from_str(&json).unwrap();
    assert_eq!(back, err);
    assert_eq!(err.to_string(), "niceness -15 refused: EPERM");
}
