//! Drain thread: picks the next eligible transaction, executes it with the
//! state lock released, and records the outcome.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Instant, SystemTime};

use tracing::{debug, trace, warn};

use super::queue::{Eligibility, Transaction};
use super::{ArbiterShared, ArbiterState, DeviceEntry, InFlight, TransactionStatus};
use crate::core::error::BusError;
use crate::infra::bus::{BusEndpoint, EndpointError};

pub(super) const THREAD_NAME: &str = "rs-drain";

pub(super) fn spawn_drain(shared: Arc<ArbiterShared>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(THREAD_NAME.into())
        .spawn(move || {
            debug!("drain thread started");
            while let Some((txn, endpoint)) = next_transaction(&shared) {
                execute(&shared, txn, endpoint.as_ref());
            }
            debug!("drain thread exiting");
        })
}

/// Block until a transaction is eligible. `None` once shut down.
fn next_transaction(shared: &ArbiterShared) -> Option<(Transaction, Arc<dyn BusEndpoint>)> {
    let window = shared.config.congestion_window();
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            let queued = state.queue.drain_all();
            if !queued.is_empty() {
                debug!(count = queued.len(), "failing queued transactions on shutdown");
            }
            for txn in queued {
                txn.ticket.resolve(Err(BusError::Shutdown));
            }
            return None;
        }

        let now = Instant::now();
        if now >= state.next_sample {
            state.sample_congestion(now, window);
            state.next_sample = now + window;
        }

        let popped = {
            let ArbiterState { queue, devices, .. } = &mut *state;
            queue.pop_eligible(|txn| eligibility(devices.get(&txn.device), txn, now))
        };
        if let Some(txn) = popped.transaction {
            let Some(endpoint) = state.buses.get(&txn.bus).map(|b| Arc::clone(&b.spec.endpoint))
            else {
                // Buses are fixed at construction; a missing one means a stale device.
                txn.ticket
                    .resolve(Err(BusError::UnknownDevice(txn.device.clone())));
                continue;
            };
            txn.ticket.set_status(TransactionStatus::Executing);
            state.in_flight = Some(InFlight {
                id: txn.id,
                device: txn.device.clone(),
            });
            return Some((txn, endpoint));
        }

        let wake_at = popped
            .wake_at
            .map_or(state.next_sample, |at| at.min(state.next_sample));
        shared.wake.wait_until(&mut state, wake_at);
    }
}

/// Eligible when it is the device's oldest pending transaction, its retry
/// backoff has elapsed and the device rate limit allows another start.
fn eligibility(device: Option<&DeviceEntry>, txn: &Transaction, now: Instant) -> Eligibility {
    let Some(device) = device else {
        return Eligibility::Ready;
    };
    if device.pending.front() != Some(&txn.id) {
        return Eligibility::Blocked;
    }
    let ready_at = match (txn.not_before, device.next_allowed) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
    match ready_at {
        Some(at) if at > now => Eligibility::At(at),
        _ => Eligibility::Ready,
    }
}

fn perform(endpoint: &dyn BusEndpoint, txn: &Transaction) -> Result<Vec<u8>, EndpointError> {
    if txn.read_len == 0 {
        return endpoint
            .write(txn.address, &txn.payload, txn.timeout)
            .map(|()| Vec::new());
    }
    let bytes = endpoint.write_read(txn.address, &txn.payload, txn.read_len, txn.timeout)?;
    if bytes.len() < txn.read_len {
        return Err(EndpointError::Fault(format!(
            "short read: {} of {} bytes",
            bytes.len(),
            txn.read_len
        )));
    }
    Ok(bytes)
}

fn to_bus_error(err: EndpointError, attempts: u32) -> BusError {
    match err {
        EndpointError::Timeout => BusError::Timeout { attempts },
        EndpointError::NoAck => BusError::NoAck { attempts },
        EndpointError::Fault(reason) => BusError::BusFault { attempts, reason },
    }
}

fn execute(shared: &ArbiterShared, mut txn: Transaction, endpoint: &dyn BusEndpoint) {
    let started = Instant::now();
    let result = perform(endpoint, &txn);
    let latency = started.elapsed();
    txn.attempts += 1;
    txn.ticket.record_attempt(latency);

    let mut state = shared.state.lock();
    state.in_flight = None;
    let now = Instant::now();
    if let Some(bus) = state.buses.get_mut(&txn.bus) {
        bus.transactions += 1;
    }

    let ArbiterState {
        queue,
        devices,
        buses,
        ..
    } = &mut *state;
    let Some(device) = devices.get_mut(&txn.device) else {
        // Deregistered while executing: report without retrying.
        let attempts = txn.attempts;
        txn.ticket
            .resolve(result.map_err(|err| to_bus_error(err, attempts)));
        return;
    };
    device.attempts += 1;
    device.last_activity = Some(now);
    device.last_activity_wall = Some(SystemTime::now());
    device.next_allowed = device.config.min_interval().map(|interval| started + interval);

    match result {
        Ok(bytes) => {
            device.record_latency(latency, shared.config.latency_smoothing);
            device.completed += 1;
            device.pending.retain(|id| *id != txn.id);
            trace!(
                device = %txn.device,
                id = txn.id,
                attempts = txn.attempts,
                latency_us = latency.as_micros(),
                "transaction completed"
            );
            txn.ticket.resolve(Ok(bytes));
        }
        Err(err) if txn.attempts < device.config.retry_budget => {
            let delay = shared.config.retry_backoff.delay(txn.attempts);
            debug!(
                device = %txn.device,
                id = txn.id,
                attempt = txn.attempts,
                budget = device.config.retry_budget,
                delay_us = delay.as_micros(),
                error = %err,
                "attempt failed, retrying"
            );
            txn.not_before = Some(now + delay);
            txn.ticket.set_status(TransactionStatus::Queued);
            queue.requeue(txn);
        }
        Err(err) => {
            let error = to_bus_error(err, txn.attempts);
            device.errors += 1;
            device.pending.retain(|id| *id != txn.id);
            if let Some(bus) = buses.get_mut(&txn.bus) {
                bus.errors += 1;
            }
            warn!(
                device = %txn.device,
                id = txn.id,
                attempts = txn.attempts,
                error = %error,
                "transaction failed"
            );
            state.record(
                shared.audit.as_ref(),
                &txn.device,
                "bus_error",
                Some(error.to_string()),
            );
            txn.ticket.resolve(Err(error));
        }
    }
}
