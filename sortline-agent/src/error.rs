//! Per-stage frame processing errors

use sortline_cns::CnsError;
use sortline_eye::VisionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Decode failed: {0}")]
    Decode(VisionError),

    #[error("Fusion failed: {0}")]
    Fuse(VisionError),

    #[error("Sort emission failed: {0}")]
    Emit(CnsError),

    #[error("Worker failed: {0}")]
    Worker(String),
}

impl FrameError {
    pub fn stage(&self) -> &'static str {
        match self {
            FrameError::Decode(_) => "decode",
            FrameError::Fuse(_) => "fuse",
            FrameError::Emit(_) => "emit",
            FrameError::Worker(_) => "worker",
        }
    }
}
