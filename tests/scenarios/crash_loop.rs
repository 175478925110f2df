//! A servo-class process that keeps crashing.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use robosched::builders::{build_core, CorePorts};
use robosched::config::{CoreConfig, ProcessConfig};
use robosched::core::{PriorityLevel, ProcessState, SchedPolicy};
use robosched::infra::launcher::SimulatedLauncher;
use robosched::infra::scheduling::{CpuTopology, SimulatedScheduler};

use crate::common::{fast_supervisor_config, wait_until, DEADLINE};

#[test]
fn test_rt_fifo_process_exhausts_two_restarts() {
    let launcher = SimulatedLauncher::new();
    let config = CoreConfig {
        supervisor: fast_supervisor_config(),
        ..CoreConfig::default()
    };
    let core = build_core(
        &config,
        CorePorts {
            scheduler: Arc::new(SimulatedScheduler::privileged(CpuTopology::uniform(4))),
            launcher: Arc::new(launcher.clone()),
            buses: Vec::new(),
        },
    )
    .unwrap();

    core.register_process(
        ProcessConfig::new("balance", "/opt/robot/balance")
            .with_policy(SchedPolicy::Fifo)
            .with_priority(PriorityLevel::Critical)
            .with_restart(true, 2),
    )
    .unwrap();
    core.start("balance").unwrap();

    // Crash every running incarnation until the supervisor gives up.
    assert!(wait_until(DEADLINE, || {
        match core.process_state("balance") {
            Some(ProcessState::Running) => {
                launcher.crash("balance", 139);
                false
            }
            state => state == Some(ProcessState::FailedExhausted),
        }
    }));
    thread::sleep(Duration::from_millis(50));

    let states: Vec<String> = core
        .audit_events()
        .into_iter()
        .filter(|e| e.subject == "balance")
        .map(|e| e.action)
        .filter(|a| a != "registered" && a != "restart_scheduled")
        .collect();
    assert_eq!(
        states,
        vec![
            "starting",
            "running",
            "failed",
            "starting",
            "running",
            "failed",
            "starting",
            "running",
            "failed",
            "failed_exhausted",
        ]
    );

    let status = core.supervisor().status("balance").unwrap();
    assert_eq!(status.restart_count, 2);
    assert_eq!(status.applied, Some(status.requested));
    assert_eq!(launcher.launch_count("balance"), 3);
    assert!(core.snapshot().needs_attention().contains(&"balance"));
    core.shutdown();
}
