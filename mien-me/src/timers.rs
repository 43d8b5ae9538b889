//! Timer backends for the expression machine.
//!
//! The machine only ever arms and cancels named slots; who turns those into
//! real wakeups is up to the caller. The face driver uses the tokio-backed
//! [`TimerTable`]; [`VirtualTimers`] keeps deadlines on a virtual clock so the
//! rules can be stepped deterministically without a runtime.

use mien_core::{TimerSlot, TimerTable};
use std::collections::HashMap;
use std::time::Duration;

pub trait Timers {
    /// Arm `slot`, replacing whatever was pending in it
    fn arm(&mut self, slot: TimerSlot, delay: Duration);

    fn cancel(&mut self, slot: TimerSlot);

    fn is_armed(&self, slot: TimerSlot) -> bool;
}

impl Timers for TimerTable<TimerSlot> {
    fn arm(&mut self, slot: TimerSlot, delay: Duration) {
        TimerTable::arm(self, slot, delay);
    }

    fn cancel(&mut self, slot: TimerSlot) {
        TimerTable::cancel(self, slot);
    }

    fn is_armed(&self, slot: TimerSlot) -> bool {
        TimerTable::is_armed(self, slot)
    }
}

/// Deadlines on a virtual clock
#[derive(Debug, Default, Clone)]
pub struct VirtualTimers {
    now: Duration,
    deadlines: HashMap<TimerSlot, Duration>,
    armed_total: u64,
}

impl VirtualTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn deadline(&self, slot: TimerSlot) -> Option<Duration> {
        self.deadlines.get(&slot).copied()
    }

    pub fn armed_count(&self) -> usize {
        self.deadlines.len()
    }

    /// How many times any slot has been armed
    pub fn armed_total(&self) -> u64 {
        self.armed_total
    }

    /// Earliest pending timer due at or before `until`. Advances the clock
    /// to its deadline and clears the slot; otherwise advances to `until`.
    ///
    /// Ties are broken by slot order so stepping is deterministic.
    pub fn pop_due(&mut self, until: Duration) -> Option<TimerSlot> {
        let next = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= until)
            .min_by_key(|(slot, at)| (**at, slot_rank(**slot)))
            .map(|(slot, at)| (*slot, *at));

        match next {
            Some((slot, at)) => {
                self.deadlines.remove(&slot);
                self.now = self.now.max(at);
                Some(slot)
            }
            None => {
                self.now = self.now.max(until);
                None
            }
        }
    }
}

fn slot_rank(slot: TimerSlot) -> u8 {
    match slot {
        TimerSlot::BlinkReset => 0,
        TimerSlot::BlinkTrigger => 1,
        TimerSlot::TextHide => 2,
        TimerSlot::ExpressionReset => 3,
    }
}

impl Timers for VirtualTimers {
    fn arm(&mut self, slot: TimerSlot, delay: Duration) {
        self.armed_total += 1;
        self.deadlines.insert(slot, self.now + delay);
    }

    fn cancel(&mut self, slot: TimerSlot) {
        self.deadlines.remove(&slot);
    }

    fn is_armed(&self, slot: TimerSlot) -> bool {
        self.deadlines.contains_key(&slot)
    }
}
