//! Monitor thread: exit detection, delayed restarts and usage sampling.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};

use super::{Registry, SupervisorShared};
use crate::core::process::{ManagedProcess, ProcessState, ResourceUsage};

pub(super) const THREAD_NAME: &str = "rs-monitor";

const BYTES_PER_MB: u64 = 1024 * 1024;

pub(super) fn spawn_monitor(
    shared: Arc<SupervisorShared>,
    shutdown_rx: Receiver<()>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(THREAD_NAME.into())
        .spawn(move || {
            debug!("monitor thread started");
            let interval = shared.config.monitor_interval();
            let every = u64::from(shared.config.sample_every_ticks.max(1));
            let mut tick: u64 = 0;
            loop {
                match shutdown_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                tick = tick.wrapping_add(1);
                shared.tick(Instant::now(), tick % every == 0);
            }
            debug!("monitor thread exiting");
        })
}

impl SupervisorShared {
    /// One monitor pass over the registry.
    pub(super) fn tick(&self, now: Instant, sample: bool) {
        let mut registry = self.registry.lock();
        let Registry {
            processes,
            audit_seq,
        } = &mut *registry;
        for process in processes.values_mut() {
            if process.stopping {
                continue;
            }
            match process.state {
                ProcessState::Running => {
                    self.reap_exit(audit_seq, process, now);
                    if sample && process.state == ProcessState::Running {
                        self.sample_usage(process, now);
                    }
                }
                ProcessState::Failed
                    if process.next_restart_at.is_some_and(|at| at <= now) =>
                {
                    self.restart_now(audit_seq, process, now);
                }
                _ => {}
            }
        }
    }

    fn reap_exit(&self, seq: &mut u64, process: &mut ManagedProcess, now: Instant) {
        let Some(child) = process.child.as_mut() else {
            return;
        };
        let exit = match child.try_wait() {
            Ok(Some(exit)) => exit,
            Ok(None) => return,
            Err(err) => {
                warn!(process = %process.config.name, error = %err, "exit check failed");
                return;
            }
        };
        warn!(
            process = %process.config.name,
            pid = ?process.pid,
            exit = %exit,
            "process exited unexpectedly"
        );
        process.clear_child();
        process.last_exit = Some(exit);
        self.transition(seq, process, ProcessState::Failed, Some(exit.to_string()));
        self.on_failure(seq, process, now);
    }

    fn restart_now(&self, seq: &mut u64, process: &mut ManagedProcess, now: Instant) {
        process.next_restart_at = None;
        process.restart_count += 1;
        info!(
            process = %process.config.name,
            attempt = process.restart_count,
            max_restarts = process.config.restart.max_restarts,
            "restarting process"
        );
        self.transition(seq, process, ProcessState::Starting, None);
        match self.launch(process) {
            Ok(()) => self.transition(seq, process, ProcessState::Running, None),
            Err(err) => {
                warn!(process = %process.config.name, error = %err, "restart failed");
                self.transition(seq, process, ProcessState::Failed, Some(err.to_string()));
                self.on_failure(seq, process, now);
            }
        }
    }

    fn sample_usage(&self, process: &mut ManagedProcess, now: Instant) {
        let Some(pid) = process.pid else {
            return;
        };
        let Some(sample) = self.scheduler.sample_usage(pid) else {
            return;
        };
        let previous = process.last_cpu_sample.replace((now, sample.cpu_time_ms));
        let cpu_percent = previous.map(|(at, cpu_ms)| {
            let wall_ms = now.saturating_duration_since(at).as_secs_f64() * 1000.0;
            if wall_ms > 0.0 {
                #[allow(clippy::cast_precision_loss)]
                let used = sample.cpu_time_ms.saturating_sub(cpu_ms) as f64;
                used / wall_ms * 100.0
            } else {
                0.0
            }
        });
        process.usage = Some(ResourceUsage {
            cpu_percent: cpu_percent.unwrap_or(0.0),
            memory_bytes: sample.rss_bytes,
        });

        let name = &process.config.name;
        if let Some(limit_mb) = process.config.memory_limit_mb {
            let over = sample.rss_bytes > limit_mb.saturating_mul(BYTES_PER_MB);
            if over && !process.over_memory {
                warn!(
                    process = %name,
                    rss_bytes = sample.rss_bytes,
                    limit_mb,
                    "memory above ceiling"
                );
            }
            process.over_memory = over;
        }
        if let (Some(limit), Some(cpu)) = (process.config.cpu_limit_percent, cpu_percent) {
            let over = cpu > limit;
            if over && !process.over_cpu {
                warn!(process = %name, cpu_percent = cpu, limit_percent = limit, "cpu above ceiling");
            }
            process.over_cpu = over;
        }
    }
}
