//! Bus arbiter.
//!
//! Serializes transactions onto shared buses in priority order with FIFO
//! within a priority, per-device ordering, rate limiting and retry with
//! capped backoff. One drain thread executes transactions; only it touches
//! bus endpoints, so a bus never carries two transactions at once and an
//! executing transaction is never preempted.
//!
//! Each registration recomputes the bus clock as the highest frequency any
//! latency-critical device on that bus requires, capped at the bus ceiling.

mod drain;
mod queue;
mod ticket;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ArbiterConfig, DeviceConfig};
use crate::core::audit::{build_audit_event, AuditSink};
use crate::core::error::{BusError, ConfigError, StartupError};
use crate::core::priority::PriorityLevel;
use crate::infra::bus::{BusEndpoint, BusSpec};
use crate::util::clock::system_time_ms;

use queue::{Transaction, TransactionQueue};
use ticket::Ticket;
pub use ticket::{TransactionHandle, TransactionStatus};

/// Arbiter-assigned transaction id, increasing in submission order.
pub type TransactionId = u64;

const COMPONENT: &str = "arbiter";

/// Returned by device registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceHandle {
    /// Device name.
    pub name: String,
    /// Bus id.
    pub bus: u8,
    /// Address on the bus.
    pub address: u16,
    /// Priority every transaction to this device inherits.
    pub priority: PriorityLevel,
    /// Unique per registration.
    pub registration: Uuid,
}

/// Per-device statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStats {
    /// Device name.
    pub name: String,
    /// Bus id.
    pub bus: u8,
    /// Address on the bus.
    pub address: u16,
    /// Device priority.
    pub priority: PriorityLevel,
    /// Smoothed latency of successful attempts.
    pub avg_latency_ms: Option<f64>,
    /// Transactions that completed.
    pub completed: u64,
    /// Transactions that failed after exhausting their retries.
    pub errors: u64,
    /// Bus attempts, retries included.
    pub attempts: u64,
    /// `errors / (completed + errors)`.
    pub error_rate: f64,
    /// Transactions waiting in the queue.
    pub queued: usize,
    /// Wall-clock time of the last attempt.
    pub last_activity_ms: Option<u128>,
}

/// Per-bus statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusStats {
    /// Bus id.
    pub id: u8,
    /// Current clock.
    pub frequency_hz: u32,
    /// Hardware ceiling.
    pub max_frequency_hz: u32,
    /// Registered devices.
    pub devices: usize,
    /// Share of devices active in the last congestion window, 0.0..=1.0.
    pub utilization: f64,
    /// Attempts executed.
    pub transactions: u64,
    /// Transactions that failed terminally.
    pub errors: u64,
}

pub(crate) struct DeviceEntry {
    registration: Uuid,
    config: DeviceConfig,
    avg_latency_ms: Option<f64>,
    completed: u64,
    errors: u64,
    attempts: u64,
    last_activity: Option<Instant>,
    last_activity_wall: Option<SystemTime>,
    next_allowed: Option<Instant>,
    pending: VecDeque<TransactionId>,
}

impl DeviceEntry {
    fn new(config: DeviceConfig) -> Self {
        Self {
            registration: Uuid::new_v4(),
            config,
            avg_latency_ms: None,
            completed: 0,
            errors: 0,
            attempts: 0,
            last_activity: None,
            last_activity_wall: None,
            next_allowed: None,
            pending: VecDeque::new(),
        }
    }

    fn handle(&self) -> DeviceHandle {
        DeviceHandle {
            name: self.config.name.clone(),
            bus: self.config.bus,
            address: self.config.address,
            priority: self.config.priority,
            registration: self.registration,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_latency(&mut self, latency: Duration, alpha: f64) {
        let sample = latency.as_micros() as f64 / 1000.0;
        self.avg_latency_ms = Some(match self.avg_latency_ms {
            Some(avg) => alpha.mul_add(sample, (1.0 - alpha) * avg),
            None => sample,
        });
    }

    #[allow(clippy::cast_precision_loss)]
    fn stats(&self, queued: usize) -> DeviceStats {
        let finished = self.completed + self.errors;
        DeviceStats {
            name: self.config.name.clone(),
            bus: self.config.bus,
            address: self.config.address,
            priority: self.config.priority,
            avg_latency_ms: self.avg_latency_ms,
            completed: self.completed,
            errors: self.errors,
            attempts: self.attempts,
            error_rate: if finished == 0 {
                0.0
            } else {
                self.errors as f64 / finished as f64
            },
            queued,
            last_activity_ms: self.last_activity_wall.map(system_time_ms),
        }
    }
}

pub(crate) struct BusState {
    spec: BusSpec,
    frequency_hz: u32,
    utilization: f64,
    transactions: u64,
    errors: u64,
}

struct InFlight {
    id: TransactionId,
    device: String,
}

/// Everything the drain thread and callers share, under one lock.
pub(crate) struct ArbiterState {
    queue: TransactionQueue,
    devices: BTreeMap<String, DeviceEntry>,
    addresses: HashMap<(u8, u16), String>,
    buses: BTreeMap<u8, BusState>,
    in_flight: Option<InFlight>,
    next_id: TransactionId,
    next_sample: Instant,
    shutdown: bool,
    audit_seq: u64,
}

impl ArbiterState {
    pub(crate) fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn in_flight(&self) -> Option<(TransactionId, &str)> {
        self.in_flight
            .as_ref()
            .map(|f| (f.id, f.device.as_str()))
    }

    pub(crate) fn device_stats(&self) -> Vec<DeviceStats> {
        self.devices
            .values()
            .map(|d| d.stats(self.queue.depth_for(&d.config.name)))
            .collect()
    }

    pub(crate) fn bus_stats(&self) -> Vec<BusStats> {
        self.buses
            .values()
            .map(|b| BusStats {
                id: b.spec.id,
                frequency_hz: b.frequency_hz,
                max_frequency_hz: b.spec.max_frequency_hz,
                devices: self.devices.values().filter(|d| d.config.bus == b.spec.id).count(),
                utilization: b.utilization,
                transactions: b.transactions,
                errors: b.errors,
            })
            .collect()
    }

    /// Recompute a bus clock; returns the endpoint to notify when it changed.
    fn retune(&mut self, bus_id: u8, default_hz: u32) -> Option<(u32, Arc<dyn BusEndpoint>)> {
        let required = self
            .devices
            .values()
            .filter(|d| d.config.bus == bus_id && d.config.priority.is_latency_critical())
            .map(|d| d.config.required_frequency_hz)
            .max()
            .unwrap_or(default_hz);
        let bus = self.buses.get_mut(&bus_id)?;
        let hz = required.min(bus.spec.max_frequency_hz);
        if hz == bus.frequency_hz {
            return None;
        }
        info!(bus = bus_id, from_hz = bus.frequency_hz, to_hz = hz, "retuning bus clock");
        bus.frequency_hz = hz;
        Some((hz, Arc::clone(&bus.spec.endpoint)))
    }

    #[allow(clippy::cast_precision_loss)]
    fn sample_congestion(&mut self, now: Instant, window: Duration) {
        for bus in self.buses.values_mut() {
            let (active, total) = self
                .devices
                .values()
                .filter(|d| d.config.bus == bus.spec.id)
                .fold((0_usize, 0_usize), |(active, total), d| {
                    let recent = d
                        .last_activity
                        .is_some_and(|at| now.saturating_duration_since(at) <= window);
                    (active + usize::from(recent), total + 1)
                });
            bus.utilization = if total == 0 {
                0.0
            } else {
                active as f64 / total as f64
            };
        }
    }

    fn record(&mut self, audit: &dyn AuditSink, subject: &str, action: &str, detail: Option<String>) {
        self.audit_seq += 1;
        audit.record(build_audit_event(self.audit_seq, COMPONENT, subject, action, detail));
    }
}

pub(crate) struct ArbiterShared {
    config: ArbiterConfig,
    state: Mutex<ArbiterState>,
    wake: Condvar,
    audit: Arc<dyn AuditSink>,
}

/// Arbitrates transactions onto shared buses.
pub struct BusArbiter {
    shared: Arc<ArbiterShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BusArbiter {
    /// Create an arbiter over `buses` and start its drain thread.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError`] for an invalid config, duplicate bus ids, or
    /// when the drain thread cannot be spawned.
    pub fn new(
        config: ArbiterConfig,
        buses: Vec<BusSpec>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, StartupError> {
        config.validate().map_err(ConfigError::InvalidValue)?;
        let mut bus_states = BTreeMap::new();
        for spec in buses {
            if spec.max_frequency_hz == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "bus {}: max_frequency_hz must be greater than 0",
                    spec.id
                ))
                .into());
            }
            let frequency_hz = config.default_bus_frequency_hz.min(spec.max_frequency_hz);
            if let Err(err) = spec.endpoint.set_frequency(frequency_hz) {
                warn!(bus = spec.id, error = %err, "initial clock not applied");
            }
            let id = spec.id;
            let state = BusState {
                spec,
                frequency_hz,
                utilization: 0.0,
                transactions: 0,
                errors: 0,
            };
            if bus_states.insert(id, state).is_some() {
                return Err(ConfigError::InvalidValue(format!("bus {id} listed twice")).into());
            }
        }
        info!(
            buses = ?bus_states.keys().collect::<Vec<_>>(),
            max_queue_depth = config.max_queue_depth,
            "starting bus arbiter"
        );

        let shared = Arc::new(ArbiterShared {
            state: Mutex::new(ArbiterState {
                queue: TransactionQueue::new(config.max_queue_depth),
                devices: BTreeMap::new(),
                addresses: HashMap::new(),
                buses: bus_states,
                in_flight: None,
                next_id: 1,
                next_sample: Instant::now() + config.congestion_window(),
                shutdown: false,
                audit_seq: 0,
            }),
            config,
            wake: Condvar::new(),
            audit,
        });
        let worker = drain::spawn_drain(Arc::clone(&shared)).map_err(|e| {
            StartupError::WorkerSpawn {
                thread: drain::THREAD_NAME,
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Arbiter settings.
    #[must_use]
    pub fn config(&self) -> &ArbiterConfig {
        &self.shared.config
    }

    /// Add a device and retune its bus.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a malformed config, an unknown bus, or a
    /// name or address already in use.
    pub fn register_device(&self, config: DeviceConfig) -> Result<DeviceHandle, ConfigError> {
        config.validate()?;
        let (handle, retune) = {
            let mut state = self.shared.state.lock();
            if !state.buses.contains_key(&config.bus) {
                return Err(ConfigError::UnknownBus {
                    name: config.name,
                    bus: config.bus,
                });
            }
            if state.devices.contains_key(&config.name)
                || state.addresses.contains_key(&(config.bus, config.address))
            {
                return Err(ConfigError::DuplicateDevice {
                    name: config.name,
                    bus: config.bus,
                    address: config.address,
                });
            }
            let entry = DeviceEntry::new(config);
            let handle = entry.handle();
            state
                .addresses
                .insert((handle.bus, handle.address), handle.name.clone());
            state.devices.insert(handle.name.clone(), entry);
            state.record(self.shared.audit.as_ref(), &handle.name, "registered", None);
            let retune = state.retune(handle.bus, self.shared.config.default_bus_frequency_hz);
            (handle, retune)
        };
        info!(
            device = %handle.name,
            bus = handle.bus,
            address = format_args!("{:#04x}", handle.address),
            priority = %handle.priority,
            "registered device"
        );
        apply_frequency(handle.bus, retune);
        Ok(handle)
    }

    /// Remove a device, cancel its queued transactions and retune its bus.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::UnknownDevice`] for an unknown or stale handle.
    pub fn deregister_device(&self, device: &DeviceHandle) -> Result<(), BusError> {
        let retune = {
            let mut state = self.shared.state.lock();
            let known = state
                .devices
                .get(&device.name)
                .is_some_and(|d| d.registration == device.registration);
            if !known {
                return Err(BusError::UnknownDevice(device.name.clone()));
            }
            state.devices.remove(&device.name);
            state.addresses.remove(&(device.bus, device.address));
            let cancelled = state.queue.drain_where(|t| t.device == device.name);
            for txn in &cancelled {
                txn.ticket.resolve(Err(BusError::Cancelled));
            }
            state.record(
                self.shared.audit.as_ref(),
                &device.name,
                "deregistered",
                Some(format!("cancelled={}", cancelled.len())),
            );
            info!(device = %device.name, cancelled = cancelled.len(), "deregistered device");
            state.retune(device.bus, self.shared.config.default_bus_frequency_hz)
        };
        apply_frequency(device.bus, retune);
        Ok(())
    }

    /// Queue a transaction for `device`.
    ///
    /// A `read_len` of zero makes it a plain write. `timeout` overrides the
    /// device's per-attempt timeout.
    ///
    /// # Errors
    ///
    /// [`BusError::Shutdown`], [`BusError::UnknownDevice`] or
    /// [`BusError::QueueFull`].
    pub fn submit(
        &self,
        device: &DeviceHandle,
        payload: Vec<u8>,
        read_len: usize,
        timeout: Option<Duration>,
    ) -> Result<TransactionHandle, BusError> {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(BusError::Shutdown);
        }
        let entry = state
            .devices
            .get(&device.name)
            .filter(|d| d.registration == device.registration)
            .ok_or_else(|| BusError::UnknownDevice(device.name.clone()))?;
        let id = state.next_id;
        let ticket = Arc::new(Ticket::new());
        let txn = Transaction {
            id,
            device: device.name.clone(),
            bus: entry.config.bus,
            address: entry.config.address,
            priority: entry.config.priority,
            payload,
            read_len,
            timeout: timeout.unwrap_or_else(|| entry.config.timeout()),
            attempts: 0,
            not_before: None,
            ticket: Arc::clone(&ticket),
        };
        if state.queue.push(txn).is_err() {
            let depth = state.queue.max_depth();
            warn!(device = %device.name, depth, "queue full, rejecting transaction");
            return Err(BusError::QueueFull(depth));
        }
        state.next_id += 1;
        if let Some(entry) = state.devices.get_mut(&device.name) {
            entry.pending.push_back(id);
        }
        drop(state);
        self.shared.wake.notify_one();
        debug!(device = %device.name, id, read_len, "transaction queued");
        Ok(TransactionHandle::new(id, device.name.clone(), ticket))
    }

    /// Cancel a queued transaction.
    ///
    /// Returns `false` when it is executing, finished or unknown.
    pub fn cancel(&self, id: TransactionId) -> bool {
        let mut state = self.shared.state.lock();
        let Some(txn) = state.queue.remove(id) else {
            return false;
        };
        if let Some(entry) = state.devices.get_mut(&txn.device) {
            entry.pending.retain(|pending| *pending != id);
        }
        txn.ticket.resolve(Err(BusError::Cancelled));
        drop(state);
        self.shared.wake.notify_one();
        debug!(id, device = %txn.device, "transaction cancelled");
        true
    }

    /// Statistics for one device.
    #[must_use]
    pub fn device_stats(&self, name: &str) -> Option<DeviceStats> {
        let state = self.shared.state.lock();
        state
            .devices
            .get(name)
            .map(|d| d.stats(state.queue.depth_for(name)))
    }

    /// Statistics for one bus.
    #[must_use]
    pub fn bus_stats(&self, id: u8) -> Option<BusStats> {
        self.shared
            .state
            .lock()
            .bus_stats()
            .into_iter()
            .find(|b| b.id == id)
    }

    /// Current clock of a bus.
    #[must_use]
    pub fn bus_frequency(&self, id: u8) -> Option<u32> {
        self.shared
            .state
            .lock()
            .buses
            .get(&id)
            .map(|b| b.frequency_hz)
    }

    /// Transactions waiting in the queue.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// State lock for consistent cross-component snapshots.
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, ArbiterState> {
        self.shared.state.lock()
    }

    /// Fail queued transactions with [`BusError::Shutdown`], let the
    /// in-flight one finish, and join the drain thread.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
        }
        info!("shutting down bus arbiter");
        self.shared.wake.notify_all();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("drain thread panicked");
            }
        }
        info!("bus arbiter shut down");
    }
}

impl Drop for BusArbiter {
    fn drop(&mut self) {
        // Signal only; the drain thread fails the queue and exits on its own.
        let mut state = self.shared.state.lock();
        if !state.shutdown {
            state.shutdown = true;
            drop(state);
            self.shared.wake.notify_all();
            debug!("BusArbiter dropped without explicit shutdown");
        }
    }
}

fn apply_frequency(bus: u8, retune: Option<(u32, Arc<dyn BusEndpoint>)>) {
    if let Some((hz, endpoint)) = retune {
        if let Err(err) = endpoint.set_frequency(hz) {
            warn!(bus, hz, error = %err, "bus clock change refused");
        }
    }
}
