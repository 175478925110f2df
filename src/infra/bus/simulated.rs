//! Scripted in-memory bus.
//!
//! Outcomes are queued per address; once a script runs dry the default
//! outcome applies. Reads echo the payload, cycled to the requested length.
//! An address can be held so tests can observe a transaction mid-flight.

use std::collections::{HashMap, HashSet, VecDeque};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{BusEndpoint, EndpointError};

/// Scripted result for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimOutcome {
    /// Attempt succeeds.
    Succeed,
    /// Attempt fails.
    Fail(EndpointError),
    /// Attempt succeeds but returns this many bytes.
    ShortRead(usize),
}

/// One recorded attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimAttempt {
    /// Target address.
    pub address: u16,
    /// Bytes written.
    pub payload: Vec<u8>,
    /// When the attempt started.
    pub at: Instant,
}

#[derive(Debug)]
struct SimBusState {
    scripts: HashMap<u16, VecDeque<SimOutcome>>,
    defaults: HashMap<u16, SimOutcome>,
    latency: Duration,
    attempts: Vec<SimAttempt>,
    frequencies: Vec<u32>,
    held: HashSet<u16>,
    waiting: usize,
}

/// In-memory bus endpoint.
#[derive(Debug)]
pub struct SimulatedBus {
    state: Mutex<SimBusState>,
    released: Condvar,
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBus {
    /// Bus where every attempt succeeds instantly.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimBusState {
                scripts: HashMap::new(),
                defaults: HashMap::new(),
                latency: Duration::ZERO,
                attempts: Vec::new(),
                frequencies: Vec::new(),
                held: HashSet::new(),
                waiting: 0,
            }),
            released: Condvar::new(),
        }
    }

    /// Time every attempt takes.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Queue outcomes for the next attempts at `address`.
    pub fn script(&self, address: u16, outcomes: impl IntoIterator<Item = SimOutcome>) {
        self.state
            .lock()
            .scripts
            .entry(address)
            .or_default()
            .extend(outcomes);
    }

    /// Outcome once the script for `address` is exhausted.
    pub fn set_default(&self, address: u16, outcome: SimOutcome) {
        self.state.lock().defaults.insert(address, outcome);
    }

    /// Block attempts at `address` until [`release`](Self::release).
    pub fn hold(&self, address: u16) {
        self.state.lock().held.insert(address);
    }

    /// Let held attempts at `address` proceed.
    pub fn release(&self, address: u16) {
        self.state.lock().held.remove(&address);
        self.released.notify_all();
    }

    /// Number of attempts currently blocked by [`hold`](Self::hold).
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.state.lock().waiting
    }

    /// Every attempt so far, oldest first.
    #[must_use]
    pub fn attempts(&self) -> Vec<SimAttempt> {
        self.state.lock().attempts.clone()
    }

    /// Attempts made against `address`.
    #[must_use]
    pub fn attempt_count(&self, address: u16) -> usize {
        self.state
            .lock()
            .attempts
            .iter()
            .filter(|a| a.address == address)
            .count()
    }

    /// Last frequency pushed by the arbiter.
    #[must_use]
    pub fn frequency(&self) -> Option<u32> {
        self.state.lock().frequencies.last().copied()
    }

    /// Every frequency pushed by the arbiter, oldest first.
    #[must_use]
    pub fn frequency_history(&self) -> Vec<u32> {
        self.state.lock().frequencies.clone()
    }

    fn attempt(&self, address: u16, bytes: &[u8]) -> SimOutcome {
        let mut state = self.state.lock();
        state.attempts.push(SimAttempt {
            address,
            payload: bytes.to_vec(),
            at: Instant::now(),
        });
        if state.held.contains(&address) {
            state.waiting += 1;
            while state.held.contains(&address) {
                self.released.wait(&mut state);
            }
            state.waiting -= 1;
        }
        let scripted = state.scripts.get_mut(&address).and_then(VecDeque::pop_front);
        let outcome = scripted
            .or_else(|| state.defaults.get(&address).cloned())
            .unwrap_or(SimOutcome::Succeed);
        let latency = state.latency;
        drop(state);
        if !latency.is_zero() {
            thread::sleep(latency);
        }
        outcome
    }
}

fn echo(bytes: &[u8], len: usize) -> Vec<u8> {
    if bytes.is_empty() {
        return vec![0; len];
    }
    bytes.iter().copied().cycle().take(len).collect()
}

impl BusEndpoint for SimulatedBus {
    fn write(&self, address: u16, bytes: &[u8], _timeout: Duration) -> Result<(), EndpointError> {
        match self.attempt(address, bytes) {
            SimOutcome::Fail(err) => Err(err),
            SimOutcome::Succeed | SimOutcome::ShortRead(_) => Ok(()),
        }
    }

    fn write_read(
        &self,
        address: u16,
        bytes: &[u8],
        read_len: usize,
        _timeout: Duration,
    ) -> Result<Vec<u8>, EndpointError> {
        match self.attempt(address, bytes) {
            SimOutcome::Fail(err) => Err(err),
            SimOutcome::Succeed => Ok(echo(bytes, read_len)),
            SimOutcome::ShortRead(n) => Ok(echo(bytes, n.min(read_len))),
        }
    }

    fn set_frequency(&self, hz: u32) -> Result<(), EndpointError> {
        self.state.lock().frequencies.push(hz);
        Ok(())
    }
}
