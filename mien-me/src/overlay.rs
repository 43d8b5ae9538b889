//! Timed text overlay

use crate::timers::Timers;
use mien_core::{AvatarState, TimerSlot};
use std::time::Duration;
use tracing::debug;

/// Shows and hides the caption drawn over the face.
///
/// Auto-hide only clears `showing_text`; the text itself is kept until an
/// explicit [`TextOverlay::hide`] or the next [`TextOverlay::show`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TextOverlay;

impl TextOverlay {
    /// Show `text`, optionally hiding it after `duration_secs`.
    /// Returns false (and changes nothing) for empty text.
    pub fn show(
        &self,
        state: &mut AvatarState,
        timers: &mut dyn Timers,
        text: &str,
        duration_secs: Option<f64>,
    ) -> bool {
        if text.is_empty() {
            debug!("Ignoring show_text with empty text");
            return false;
        }

        state.display_text = text.to_string();
        state.showing_text = true;
        timers.cancel(TimerSlot::TextHide);

        if let Some(delay) = auto_hide_delay(duration_secs) {
            timers.arm(TimerSlot::TextHide, delay);
        }
        true
    }

    pub fn hide(&self, state: &mut AvatarState, timers: &mut dyn Timers) {
        state.showing_text = false;
        state.display_text.clear();
        timers.cancel(TimerSlot::TextHide);
    }

    /// Hide without discarding the text and drop any pending auto-hide
    pub fn dismiss(&self, state: &mut AvatarState, timers: &mut dyn Timers) {
        state.showing_text = false;
        timers.cancel(TimerSlot::TextHide);
    }

    /// `TextHide` fired
    pub fn on_timer(&self, state: &mut AvatarState) {
        state.showing_text = false;
    }
}

/// Positive, finite durations only; anything else means "no auto-hide"
pub fn auto_hide_delay(duration_secs: Option<f64>) -> Option<Duration> {
    duration_secs
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}
