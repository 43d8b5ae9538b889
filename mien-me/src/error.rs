//! Error types for mien-me

use mien_core::MienError;
use thiserror::Error;

/// Face driver errors
#[derive(Error, Debug)]
pub enum FaceError {
    #[error("Face driver has shut down")]
    DriverGone,

    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

impl From<FaceError> for MienError {
    fn from(err: FaceError) -> Self {
        MienError::Face(err.to_string())
    }
}
