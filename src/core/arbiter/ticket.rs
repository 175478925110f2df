//! Completion slot shared between a submitter and the drain thread.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use super::TransactionId;
use crate::core::error::BusError;

/// Lifecycle of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Waiting in the queue, possibly for a retry.
    Queued,
    /// On the bus now.
    Executing,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Removed before execution.
    Cancelled,
}

impl TransactionStatus {
    /// Completed, Failed or Cancelled.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

struct TicketState {
    status: TransactionStatus,
    outcome: Option<Result<Vec<u8>, BusError>>,
    attempts: u32,
    latency: Option<Duration>,
    wakers: Vec<Waker>,
}

pub(crate) struct Ticket {
    state: Mutex<TicketState>,
    done: Condvar,
}

impl Ticket {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(TicketState {
                status: TransactionStatus::Queued,
                outcome: None,
                attempts: 0,
                latency: None,
                wakers: Vec::new(),
            }),
            done: Condvar::new(),
        }
    }

    pub(crate) fn set_status(&self, status: TransactionStatus) {
        let mut state = self.state.lock();
        if state.outcome.is_none() {
            state.status = status;
        }
    }

    pub(crate) fn record_attempt(&self, latency: Duration) {
        let mut state = self.state.lock();
        state.attempts += 1;
        state.latency = Some(latency);
    }

    /// Publish the final outcome. Later calls are ignored.
    pub(crate) fn resolve(&self, outcome: Result<Vec<u8>, BusError>) {
        let wakers = {
            let mut state = self.state.lock();
            if state.outcome.is_some() {
                return;
            }
            state.status = match &outcome {
                Ok(_) => TransactionStatus::Completed,
                Err(BusError::Cancelled) => TransactionStatus::Cancelled,
                Err(_) => TransactionStatus::Failed,
            };
            state.outcome = Some(outcome);
            std::mem::take(&mut state.wakers)
        };
        self.done.notify_all();
        for waker in wakers {
            waker.wake();
        }
    }
}

/// Handle to a submitted transaction.
///
/// Block with [`wait`](Self::wait) / [`wait_timeout`](Self::wait_timeout), or
/// `.await` the handle itself.
#[derive(Clone)]
pub struct TransactionHandle {
    id: TransactionId,
    device: String,
    ticket: Arc<Ticket>,
}

impl std::fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("id", &self.id)
            .field("device", &self.device)
            .field("status", &self.status())
            .finish()
    }
}

impl TransactionHandle {
    pub(crate) fn new(id: TransactionId, device: String, ticket: Arc<Ticket>) -> Self {
        Self { id, device, ticket }
    }

    /// Arbiter-assigned id; also the submission order.
    #[must_use]
    pub const fn id(&self) -> TransactionId {
        self.id
    }

    /// Target device name.
    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> TransactionStatus {
        self.ticket.state.lock().status
    }

    /// Attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.ticket.state.lock().attempts
    }

    /// Duration of the most recent attempt.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.ticket.state.lock().latency
    }

    /// Outcome, if the transaction has finished.
    #[must_use]
    pub fn try_result(&self) -> Option<Result<Vec<u8>, BusError>> {
        self.ticket.state.lock().outcome.clone()
    }

    /// Block until the transaction finishes.
    ///
    /// # Errors
    ///
    /// The transaction's [`BusError`].
    pub fn wait(&self) -> Result<Vec<u8>, BusError> {
        let mut state = self.ticket.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone();
            }
            self.ticket.done.wait(&mut state);
        }
    }

    /// Block until the transaction finishes or `timeout` elapses.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Vec<u8>, BusError>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.ticket.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return Some(outcome.clone());
            }
            if self
                .ticket
                .done
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.outcome.clone();
            }
        }
    }

    /// Await the outcome with a timeout.
    #[cfg(feature = "tokio-runtime")]
    pub async fn wait_async(self, timeout: Duration) -> Option<Result<Vec<u8>, BusError>> {
        tokio::time::timeout(timeout, self).await.ok()
    }
}

impl Future for TransactionHandle {
    type Output = Result<Vec<u8>, BusError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.ticket.state.lock();
        if let Some(outcome) = &state.outcome {
            return Poll::Ready(outcome.clone());
        }
        // Clones may be awaited from different tasks; keep one waker per task.
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}
