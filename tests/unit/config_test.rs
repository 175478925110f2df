//! Tests for configuration

use std::collections::HashMap;
use std::time::Duration;

use robosched::config::{CoreConfig, DeviceConfig, Manifest, ProcessConfig, RestartPolicy};
use robosched::core::{ConfigError, OsSchedule, PriorityLevel, SchedPolicy};

#[test]
fn test_core_config_json_round_trip() {
    let mut cfg = CoreConfig::default();
    cfg.supervisor.monitor_interval_ms = 20;
    cfg.arbiter.default_bus_frequency_hz = 400_000;
    cfg.telemetry.bus_utilization_target = 0.5;

    let json = serde_json::to_string(&cfg).unwrap();
    let parsed = CoreConfig::from_json_str(&json).unwrap();
    assert_eq!(parsed, cfg);
}

#[test]
fn test_core_config_rejects_invalid_sections() {
    let err = CoreConfig::from_json_str(r#"{"supervisor": {"monitor_interval_ms": 0}}"#)
        .unwrap_err();
    assert!(err.starts_with("supervisor invalid"), "{err}");

    let err = CoreConfig::from_json_str(r#"{"telemetry": {"device_error_rate_target": 2.0}}"#)
        .unwrap_err();
    assert!(err.starts_with("telemetry invalid"), "{err}");

    assert!(CoreConfig::from_json_str("not json").is_err());
}

#[test]
fn test_overrides_apply_on_top_of_defaults() {
    let vars: HashMap<&str, &str> = [
        ("ROBOSCHED_RESTART_BASE_MS", "500"),
        ("ROBOSCHED_RESTART_MAX_MS", "4000"),
        ("ROBOSCHED_SERVO_LATENCY_TARGET_MS", "1.5"),
    ]
    .into_iter()
    .collect();
    let mut cfg = CoreConfig::default();
    cfg.apply_overrides(|k| vars.get(k).map(|v| (*v).to_string()))
        .unwrap();

    assert_eq!(
        cfg.supervisor.restart_backoff.delay(3),
        Duration::from_millis(1_500)
    );
    assert_eq!(
        cfg.supervisor.restart_backoff.delay(20),
        Duration::from_millis(4_000)
    );
    assert!((cfg.telemetry.servo_latency_target_ms - 1.5).abs() < f64::EPSILON);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_process_builder() {
    let cfg = ProcessConfig::new("gait", "/opt/gait")
        .with_args(["--rate", "500"])
        .with_env("RUST_LOG", "info")
        .with_priority(PriorityLevel::Critical)
        .with_affinity(vec![2, 3])
        .with_restart(true, 5);

    assert_eq!(cfg.schedule(), OsSchedule { policy: SchedPolicy::Fifo, value: 80 });
    assert_eq!(cfg.restart, RestartPolicy { enabled: true, max_restarts: 5 });
    let spec = cfg.launch_spec();
    assert_eq!(spec.args, vec!["--rate", "500"]);
    assert_eq!(spec.env.get("RUST_LOG").map(String::as_str), Some("info"));
    assert!(cfg.validate(4).is_ok());
    assert!(matches!(
        cfg.validate(2),
        Err(ConfigError::InvalidCpu { cpu: 2, available: 2, .. })
    ));
}

#[test]
fn test_process_validation() {
    assert_eq!(
        ProcessConfig::new(" ", "/opt/x").validate(4),
        Err(ConfigError::EmptyName)
    );
    assert!(ProcessConfig::new("x", "/opt/x")
        .with_affinity(Vec::new())
        .validate(4)
        .is_err());
    assert!(ProcessConfig::new("x", "/opt/x")
        .with_memory_limit_mb(0)
        .validate(4)
        .is_err());
    assert!(ProcessConfig::new("x", "/opt/x")
        .with_cpu_limit_percent(f64::NAN)
        .validate(4)
        .is_err());
}

#[test]
fn test_device_validation() {
    assert!(DeviceConfig::new("imu", 1, 0x68).validate().is_ok());
    assert!(DeviceConfig::new("imu", 1, 0x400).validate().is_err());
    assert!(DeviceConfig::new("imu", 1, 0x68)
        .with_retry_budget(0)
        .validate()
        .is_err());
    assert!(DeviceConfig::new("imu", 1, 0x68)
        .with_max_rate_hz(-1.0)
        .validate()
        .is_err());
    assert!(DeviceConfig::new("imu", 1, 0x68)
        .with_timeout_ms(0)
        .validate()
        .is_err());
}

#[test]
fn test_device_defaults_from_json() {
    let cfg: DeviceConfig =
        serde_json::from_str(r#"{"name": "imu", "bus": 1, "address": 104}"#).unwrap();
    assert_eq!(cfg.priority, PriorityLevel::Medium);
    assert_eq!(cfg.retry_budget, 3);
    assert_eq!(cfg.timeout(), Duration::from_millis(10));
    assert_eq!(cfg.min_interval(), None);
}

#[test]
fn test_manifest_rejects_malformed_json() {
    assert!(Manifest::from_json_str(r#"{"processes": [{"name": "x"}]}"#).is_err());
    assert_eq!(Manifest::from_json_str("{}").unwrap(), Manifest::default());
}
