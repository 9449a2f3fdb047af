//! Error types for sortline-eye

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Detector error: {0}")]
    Detector(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

impl From<image::ImageError> for VisionError {
    fn from(err: image::ImageError) -> Self {
        VisionError::Decode(err.to_string())
    }
}
