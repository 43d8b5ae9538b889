//! mien-core: shared model for the mien avatar core
//!
//! Provides the pieces every other mien crate builds on:
//! - Expression and published avatar state
//! - Decoded inputs (transport lifecycle, server messages, presence signals)
//! - Layered configuration (JSON/TOML/YAML + environment)
//! - Named-slot timer table with last-write-wins arming

pub mod error;
pub mod config;
pub mod expression;
pub mod events;
pub mod timer;

pub use error::{ConfigError, MienError, Result};
pub use config::{FaceConfig, LoudnessConfig, MienConfig, PresenceConfig};
pub use expression::{AvatarState, Expression};
pub use events::{ConnectionState, PresenceSignal, ServerMessage};
pub use timer::{TimerFired, TimerSlot, TimerTable};
