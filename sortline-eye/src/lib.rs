//! sortline-eye: vision stage of the sortline agent
//!
//! Turns an encoded camera frame into a fused detection report:
//! color regions found by HSV thresholding plus boxes from a pluggable
//! object detector, all normalized to frame-relative coordinates.

pub mod decoder;
pub mod color;
pub mod detector;
pub mod fusion;
pub mod error;

pub use decoder::{Frame, FrameDecoder};
pub use color::{ColorRegion, ColorSegmenter};
pub use detector::{ObjectDetector, RawObject, NullDetector};
pub use fusion::{DetectionFusion, normalize_box, normalize_point};
pub use error::VisionError;
