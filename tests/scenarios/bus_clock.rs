//! Bus clock chosen from mixed-priority devices.

use std::sync::Arc;

use robosched::builders::{build_core, CorePorts};
use robosched::config::{CoreConfig, DeviceConfig};
use robosched::core::PriorityLevel;
use robosched::infra::bus::{BusSpec, SimulatedBus};
use robosched::infra::scheduling::CpuTopology;

#[test]
fn test_critical_device_sets_bus_clock() {
    let bus = Arc::new(SimulatedBus::new());
    let core = build_core(
        &CoreConfig::default(),
        CorePorts::simulated(
            CpuTopology::uniform(2),
            vec![BusSpec::new(3, 1_000_000, bus.clone())],
        ),
    )
    .unwrap();

    core.register_device(
        DeviceConfig::new("wheel-servo", 3, 0x40)
            .with_priority(PriorityLevel::Critical)
            .with_required_frequency_hz(1_000_000),
    )
    .unwrap();
    core.register_device(
        DeviceConfig::new("fan", 3, 0x2C)
            .with_priority(PriorityLevel::Low)
            .with_required_frequency_hz(100_000),
    )
    .unwrap();

    assert_eq!(core.arbiter().bus_frequency(3), Some(1_000_000));
    assert_eq!(bus.frequency(), Some(1_000_000));
    assert_eq!(core.snapshot().bus(3).unwrap().frequency_hz, 1_000_000);
    core.shutdown();
}
