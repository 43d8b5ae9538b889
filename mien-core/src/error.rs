use thiserror::Error;

#[derive(Error, Debug)]
pub enum MienError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Link error: {0}")]
    Link(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Face error: {0}")]
    Face(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Errors raised while loading or validating a [`crate::MienConfig`]
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, MienError>;
