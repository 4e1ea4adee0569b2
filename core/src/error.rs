//! Error types for hammer-core

use thiserror::Error;

use crate::config::ConfigError;
use crate::traits::StoreError;

/// Core error type
#[derive(Error, Debug)]
pub enum HammerError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A required builder field was not provided
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// Coordination substrate error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Record could not be encoded or decoded
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Test identifier is not a valid lease id
    #[error("invalid test id: {0}")]
    InvalidTestId(String),

    /// Run-level failure
    #[error("run error: {0}")]
    Run(String),

    /// Fanout hub is no longer running
    #[error("fanout hub stopped")]
    HubStopped,
}

impl HammerError {
    /// Create a missing field error
    pub fn missing_field(field: &'static str) -> Self {
        Self::MissingField(field)
    }

    /// Create a run error
    pub fn run(message: impl Into<String>) -> Self {
        Self::Run(message.into())
    }

    /// Create an invalid test id error
    pub fn invalid_test_id(id: impl Into<String>) -> Self {
        Self::InvalidTestId(id.into())
    }

    /// Whether the error comes from the substrate and is worth retrying on the next cycle
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_transient())
    }
}

/// Result type alias
pub type HammerResult<T> = std::result::Result<T, HammerError>;
