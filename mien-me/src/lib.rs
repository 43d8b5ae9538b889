//! mien-me: the avatar face
//!
//! Turns transport lifecycle, server messages, presence and loudness into
//! one published [`AvatarState`](mien_core::AvatarState):
//! - Expression rules with timed resets
//! - Idle blinking with occasional double blinks
//! - Timed text overlay
//! - Face driver task owning all of the above

pub mod error;
pub mod timers;
pub mod blink;
pub mod overlay;
pub mod machine;
pub mod driver;

pub use error::FaceError;
pub use timers::{Timers, VirtualTimers};
pub use blink::{BlinkScheduler, BlinkTiming};
pub use overlay::TextOverlay;
pub use machine::{ExpressionMachine, FaceInput, MachineOptions, TransportRequest};
pub use driver::{FaceDriver, FaceHandle, FaceSources};
