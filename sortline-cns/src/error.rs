//! Error types for sortline-cns

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CnsError {
    #[error("No sort slot configured for color '{0}'")]
    UnknownColor(String),

    #[error("Sequence error: {0}")]
    Sequence(String),
}
