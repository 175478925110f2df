//! Pending transaction heap.
//!
//! Highest priority first, FIFO by submission sequence within a priority.
//! The drain loop pops the best transaction that is currently eligible;
//! ineligible ones go back on the heap untouched.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::ticket::Ticket;
use super::TransactionId;
use crate::core::priority::PriorityLevel;

/// A submitted transaction.
pub(crate) struct Transaction {
    pub(crate) id: TransactionId,
    pub(crate) device: String,
    pub(crate) bus: u8,
    pub(crate) address: u16,
    pub(crate) priority: PriorityLevel,
    pub(crate) payload: Vec<u8>,
    pub(crate) read_len: usize,
    pub(crate) timeout: Duration,
    pub(crate) attempts: u32,
    pub(crate) not_before: Option<Instant>,
    pub(crate) ticket: Arc<Ticket>,
}

/// Wrapper to order transactions in a max-heap.
struct Ranked(Transaction);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then lower id (earlier submission).
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.id.cmp(&self.0.id))
    }
}

/// Whether a transaction may run now.
pub(crate) enum Eligibility {
    /// Run it.
    Ready,
    /// Not before this instant.
    At(Instant),
    /// Waiting on another transaction.
    Blocked,
}

/// Result of [`TransactionQueue::pop_eligible`].
pub(crate) struct Popped {
    pub(crate) transaction: Option<Transaction>,
    /// Earliest instant a skipped transaction becomes eligible.
    pub(crate) wake_at: Option<Instant>,
}

pub(crate) struct TransactionQueue {
    max_depth: usize,
    heap: BinaryHeap<Ranked>,
}

impl TransactionQueue {
    pub(crate) fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            heap: BinaryHeap::with_capacity(max_depth.min(1024)),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) const fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Enqueue a new transaction, refusing when full.
    pub(crate) fn push(&mut self, transaction: Transaction) -> Result<(), Transaction> {
        if self.heap.len() >= self.max_depth {
            return Err(transaction);
        }
        self.heap.push(Ranked(transaction));
        Ok(())
    }

    /// Put back a transaction that was already admitted.
    pub(crate) fn requeue(&mut self, transaction: Transaction) {
        self.heap.push(Ranked(transaction));
    }

    /// Pop the highest-ranked eligible transaction.
    pub(crate) fn pop_eligible<F>(&mut self, mut check: F) -> Popped
    where
        F: FnMut(&Transaction) -> Eligibility,
    {
        let mut skipped = Vec::new();
        let mut wake_at: Option<Instant> = None;
        let mut found = None;
        while let Some(Ranked(transaction)) = self.heap.pop() {
            match check(&transaction) {
                Eligibility::Ready => {
                    found = Some(transaction);
                    break;
                }
                Eligibility::At(at) => {
                    wake_at = Some(wake_at.map_or(at, |w| w.min(at)));
                    skipped.push(Ranked(transaction));
                }
                Eligibility::Blocked => skipped.push(Ranked(transaction)),
            }
        }
        self.heap.extend(skipped);
        Popped {
            transaction: found,
            wake_at,
        }
    }

    /// Remove one transaction by id.
    pub(crate) fn remove(&mut self, id: TransactionId) -> Option<Transaction> {
        if !self.heap.iter().any(|Ranked(t)| t.id == id) {
            return None;
        }
        self.drain_where(|t| t.id == id).pop()
    }

    /// Remove every transaction matching `pred`.
    pub(crate) fn drain_where<F>(&mut self, mut pred: F) -> Vec<Transaction>
    where
        F: FnMut(&Transaction) -> bool,
    {
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.heap)
            .into_vec()
            .into_iter()
            .partition(|Ranked(t)| pred(t));
        self.heap = kept.into();
        let mut taken: Vec<Transaction> = taken.into_iter().map(|Ranked(t)| t).collect();
        taken.sort_by_key(|t| t.id);
        taken
    }

    /// Remove everything.
    pub(crate) fn drain_all(&mut self) -> Vec<Transaction> {
        self.drain_where(|_| true)
    }

    /// Queued transactions for one device.
    pub(crate) fn depth_for(&self, device: &str) -> usize {
        self.heap.iter().filter(|Ranked(t)| t.device == device).count()
    }
}
