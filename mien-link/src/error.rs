//! Error types for mien-link

use mien_core::MienError;
use std::time::Duration;
use thiserror::Error;

/// Stream transport errors
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Connect error: {0}")]
    Connect(String),

    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),
}

impl From<LinkError> for MienError {
    fn from(err: LinkError) -> Self {
        MienError::Link(err.to_string())
    }
}
