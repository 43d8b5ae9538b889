//! mien-sc: sound analysis for mien
//!
//! Samples a live audio track on a fixed interval, runs it through an
//! FFT-based byte spectrum and publishes a single "is loud" flag that the
//! face uses to animate the mouth.

pub mod error;
pub mod track;
pub mod analyser;
pub mod loudness;

pub use error::AudioError;
pub use track::{AudioTrack, SampleBuffer};
pub use analyser::{AnalyserConfig, FrequencyAnalyser};
pub use loudness::LoudnessMonitor;
