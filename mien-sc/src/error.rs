//! Error types for mien-sc

use mien_core::MienError;
use thiserror::Error;

/// Audio sampling and analysis errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Audio analysis error: {0}")]
    Analysis(String),

    #[error("Audio track unavailable: {0}")]
    TrackUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<AudioError> for MienError {
    fn from(err: AudioError) -> Self {
        MienError::Audio(err.to_string())
    }
}
