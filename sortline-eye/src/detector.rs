//! Object detector seam
//!
//! The neural detector is an external capability; anything that maps a frame
//! to labeled pixel-space boxes can be plugged in here.

use crate::decoder::Frame;
use crate::error::VisionError;

/// Detector output in pixel coordinates of the input frame
#[derive(Debug, Clone, PartialEq)]
pub struct RawObject {
    pub label: String,
    pub confidence: f32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl RawObject {
    pub fn new(label: &str, confidence: f32, bbox: (f32, f32, f32, f32)) -> Self {
        let (x, y, width, height) = bbox;
        Self {
            label: label.to_string(),
            confidence,
            x,
            y,
            width,
            height,
        }
    }

    /// Clip the box to the frame; `None` if nothing valid remains
    pub fn clipped_to(&self, frame_width: u32, frame_height: u32) -> Option<(f32, f32, f32, f32)> {
        let values = [self.x, self.y, self.width, self.height];
        if values.iter().any(|v| !v.is_finite()) || self.width <= 0.0 || self.height <= 0.0 {
            return None;
        }

        let fw = frame_width as f32;
        let fh = frame_height as f32;
        let x1 = self.x.clamp(0.0, fw);
        let y1 = self.y.clamp(0.0, fh);
        let x2 = (self.x + self.width).clamp(0.0, fw);
        let y2 = (self.y + self.height).clamp(0.0, fh);

        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1, y1, x2 - x1, y2 - y1))
    }
}

/// Pluggable object detector
pub trait ObjectDetector: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Detect objects in a frame
    fn detect(&self, frame: &Frame) -> Result<Vec<RawObject>, VisionError>;
}

/// Detector used when no model is configured; reports nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDetector;

impl ObjectDetector for NullDetector {
    fn name(&self) -> &str {
        "none"
    }

    fn detect(&self, _frame: &Frame) -> Result<Vec<RawObject>, VisionError> {
        Ok(Vec::new())
    }
}
