//! Bring a small robot up from a JSON manifest and take it down again.

use std::sync::Arc;
use std::time::Duration;

use robosched::builders::{build_core, register_manifest, CorePorts};
use robosched::config::{CoreConfig, Manifest};
use robosched::core::{BusError, PriorityLevel, ProcessState};
use robosched::infra::bus::{BusSpec, SimulatedBus};
use robosched::infra::scheduling::CpuTopology;

const MANIFEST: &str = r#"{
    "processes": [
        {"name": "balance", "command": "/opt/robot/balance", "priority": "critical"},
        {"name": "vision", "command": "/opt/robot/vision", "priority": "low",
         "memory_limit_mb": 512}
    ],
    "devices": [
        {"name": "imu", "bus": 1, "address": 104, "priority": "emergency",
         "required_frequency_hz": 400000},
        {"name": "battery", "bus": 1, "address": 11, "priority": "background",
         "max_rate_hz": 10.0}
    ]
}"#;

#[test]
fn test_manifest_bring_up_and_shutdown() {
    let bus = Arc::new(SimulatedBus::new());
    let mut config = CoreConfig::default();
    config.supervisor.startup_grace_ms = 0;
    let core = build_core(
        &config,
        CorePorts::simulated(
            CpuTopology::uniform(4).with_isolated([3]),
            vec![BusSpec::new(1, 400_000, bus.clone())],
        ),
    )
    .unwrap();

    let manifest = Manifest::from_json_str(MANIFEST).unwrap();
    let (processes, devices) = register_manifest(&core, manifest).unwrap();
    assert_eq!(processes.len(), 2);
    assert_eq!(devices[0].priority, PriorityLevel::Emergency);

    for p in &processes {
        core.start(&p.name).unwrap();
    }
    let reading = core.submit(&devices[0], vec![0x3B], 6, None).unwrap();
    assert_eq!(reading.wait().unwrap().len(), 6);

    let report = core.snapshot();
    assert_eq!(report.process("balance").unwrap().affinity, vec![3]);
    assert_eq!(report.process("vision").unwrap().affinity, vec![0, 1, 2]);
    assert_eq!(report.bus(1).unwrap().frequency_hz, 400_000);
    // The simulated host is unprivileged, so the servo-class process degrades.
    assert_eq!(core.health().degraded, vec!["balance".to_string()]);

    core.stop("vision", Duration::from_millis(100)).unwrap();
    assert_eq!(core.process_state("vision"), Some(ProcessState::Stopped));

    core.shutdown();
    assert_eq!(core.process_state("balance"), Some(ProcessState::Stopped));
    assert_eq!(
        core.submit(&devices[1], vec![0], 2, None).unwrap_err(),
        BusError::Shutdown
    );
}
