//! Error types for sortline-link

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Connection closed")]
    Closed,
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::Serialization(err.to_string())
    }
}
