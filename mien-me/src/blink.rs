//! Idle blinking

use crate::timers::Timers;
use mien_core::{AvatarState, Expression, FaceConfig, TimerSlot};
use rand::rngs::StdRng;
use rand::Rng;
use std::time::Duration;
use tracing::trace;

/// Blink timing parameters
#[derive(Debug, Clone, PartialEq)]
pub struct BlinkTiming {
    /// Upper bound of the delay before the first blink after arming
    pub first_max: Duration,
    /// How long the eyes stay closed
    pub duration: Duration,
    /// Chance that the next blink follows almost immediately
    pub double_chance: f64,
    pub double_delay: Duration,
    pub interval_min: Duration,
    pub interval_max: Duration,
}

impl Default for BlinkTiming {
    fn default() -> Self {
        Self::from(&FaceConfig::default())
    }
}

impl From<&FaceConfig> for BlinkTiming {
    fn from(config: &FaceConfig) -> Self {
        Self {
            first_max: Duration::from_millis(config.first_blink_max_ms),
            duration: config.blink_duration(),
            double_chance: config.double_blink_chance,
            double_delay: Duration::from_millis(config.double_blink_delay_ms),
            interval_min: Duration::from_millis(config.blink_interval_min_ms),
            interval_max: Duration::from_millis(config.blink_interval_max_ms),
        }
    }
}

/// Schedules blinks while armed.
///
/// Every arming cancels both blink slots first, so there is never more than
/// one blink chain. Expressions that keep the eyes closed disarm it entirely.
pub struct BlinkScheduler<R = StdRng> {
    timing: BlinkTiming,
    rng: R,
    armed: bool,
    blinks: u64,
}

impl<R: Rng> BlinkScheduler<R> {
    pub fn new(timing: BlinkTiming, rng: R) -> Self {
        Self {
            timing,
            rng,
            armed: false,
            blinks: 0,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Blinks started since creation
    pub fn blinks(&self) -> u64 {
        self.blinks
    }

    /// Delay before the first blink: uniform in `[0, first_max)`
    pub fn first_delay(&mut self) -> Duration {
        let max = self.timing.first_max.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.rng.gen_range(0..max))
    }

    /// Delay between blinks: a quick double blink with `double_chance`,
    /// otherwise uniform in `[interval_min, interval_max]`
    pub fn next_delay(&mut self) -> Duration {
        if self.rng.gen::<f64>() < self.timing.double_chance {
            return self.timing.double_delay;
        }
        let min = self.timing.interval_min.as_millis() as u64;
        let max = self.timing.interval_max.as_millis() as u64;
        if max <= min {
            return self.timing.interval_min;
        }
        Duration::from_millis(self.rng.gen_range(min..=max))
    }

    /// Restart blinking for `expression`, opening the eyes first
    pub fn rearm(&mut self, expression: Expression, state: &mut AvatarState, timers: &mut dyn Timers) {
        self.disarm(state, timers);
        if expression.suppresses_blink() {
            trace!("Blinking suppressed while {}", expression);
            return;
        }
        self.armed = true;
        let delay = self.first_delay();
        timers.arm(TimerSlot::BlinkTrigger, delay);
    }

    pub fn disarm(&mut self, state: &mut AvatarState, timers: &mut dyn Timers) {
        timers.cancel(TimerSlot::BlinkTrigger);
        timers.cancel(TimerSlot::BlinkReset);
        state.is_blinking = false;
        self.armed = false;
    }

    /// `BlinkTrigger` fired: close the eyes and schedule the next blink
    pub fn on_trigger(&mut self, state: &mut AvatarState, timers: &mut dyn Timers) {
        if !self.armed {
            return;
        }
        self.blinks += 1;
        state.is_blinking = true;
        timers.arm(TimerSlot::BlinkReset, self.timing.duration);
        let next = self.next_delay();
        timers.arm(TimerSlot::BlinkTrigger, next);
    }

    /// `BlinkReset` fired: open the eyes
    pub fn on_reset(&mut self, state: &mut AvatarState) {
        state.is_blinking = false;
    }
}
