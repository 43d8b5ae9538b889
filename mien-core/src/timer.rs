//! Named one-shot timers with last-write-wins arming.
//!
//! Each slot holds at most one pending timer. Arming a slot aborts whatever
//! was there and tags the new timer with a fresh generation; when a timer
//! fires it sends [`TimerFired`] on the table's channel and the owner checks
//! [`TimerTable::take`] to discard firings that raced a re-arm or cancel.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// Timer slots used by the face driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerSlot {
    /// Next blink is due
    BlinkTrigger,
    /// Eyes reopen after a blink
    BlinkReset,
    /// Transient expression returns to resting
    ExpressionReset,
    /// Text overlay auto-hide
    TextHide,
}

/// Delivered when an armed timer elapses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired<S = TimerSlot> {
    pub slot: S,
    pub generation: u64,
}

struct Pending {
    generation: u64,
    handle: JoinHandle<()>,
}

pub struct TimerTable<S = TimerSlot>
where
    S: Copy + Eq + Hash + Send + std::fmt::Debug + 'static,
{
    tx: mpsc::UnboundedSender<TimerFired<S>>,
    pending: HashMap<S, Pending>,
    next_generation: u64,
}

impl<S> TimerTable<S>
where
    S: Copy + Eq + Hash + Send + std::fmt::Debug + 'static,
{
    /// Create a table and the receiver its firings are delivered on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerFired<S>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let table = Self {
            tx,
            pending: HashMap::new(),
            next_generation: 0,
        };
        (table, rx)
    }

    /// Arm `slot` to fire after `delay`, replacing any pending timer in it.
    /// Must be called from within a tokio runtime.
    pub fn arm(&mut self, slot: S, delay: Duration) -> u64 {
        self.cancel(slot);

        self.next_generation += 1;
        let generation = self.next_generation;
        let tx = self.tx.clone();
        // Deadline counts from the arm call, not from the task's first poll
        let deadline = tokio::time::Instant::now() + delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = tx.send(TimerFired { slot, generation });
        });

        trace!("Armed {:?} (gen {}) for {:?}", slot, generation, delay);
        self.pending.insert(slot, Pending { generation, handle });
        generation
    }

    /// Cancel the pending timer in `slot`, returning whether one was armed
    pub fn cancel(&mut self, slot: S) -> bool {
        match self.pending.remove(&slot) {
            Some(pending) => {
                pending.handle.abort();
                trace!("Cancelled {:?} (gen {})", slot, pending.generation);
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, pending) in self.pending.drain() {
            pending.handle.abort();
        }
    }

    /// Whether `fired` belongs to the timer currently armed in its slot
    pub fn is_current(&self, fired: &TimerFired<S>) -> bool {
        self.pending
            .get(&fired.slot)
            .map(|p| p.generation == fired.generation)
            .unwrap_or(false)
    }

    /// Accept a firing: clears the slot and returns true only if it is current
    pub fn take(&mut self, fired: &TimerFired<S>) -> bool {
        if self.is_current(fired) {
            self.pending.remove(&fired.slot);
            true
        } else {
            trace!("Dropping stale firing of {:?} (gen {})", fired.slot, fired.generation);
            false
        }
    }

    pub fn is_armed(&self, slot: S) -> bool {
        self.pending.contains_key(&slot)
    }

    pub fn armed_count(&self) -> usize {
        self.pending.len()
    }
}

impl<S> Drop for TimerTable<S>
where
    S: Copy + Eq + Hash + Send + std::fmt::Debug + 'static,
{
    fn drop(&mut self) {
        self.cancel_all();
    }
}
