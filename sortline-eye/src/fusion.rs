//! Detection fusion: color regions plus detector boxes in one report

use crate::color::{ColorRegion, ColorSegmenter};
use crate::decoder::Frame;
use crate::detector::{ObjectDetector, RawObject};
use crate::error::VisionError;
use sortline_core::config::VisionConfig;
use sortline_core::types::{
    epoch_seconds, ColorDetection, FusedReport, NormalizedBox, NormalizedPoint, ObjectDetection,
};
use std::sync::Arc;
use tracing::debug;

/// Stateless fusion of the color segmenter and the object detector
pub struct DetectionFusion {
    segmenter: ColorSegmenter,
    detector: Arc<dyn ObjectDetector>,
    min_confidence: f32,
}

impl DetectionFusion {
    pub fn new(config: &VisionConfig, detector: Arc<dyn ObjectDetector>) -> Self {
        Self {
            segmenter: ColorSegmenter::from_config(config),
            detector,
            min_confidence: config.min_confidence,
        }
    }

    pub fn detector_name(&self) -> &str {
        self.detector.name()
    }

    /// Fuse a frame, stamped with the current time
    pub fn fuse(&self, frame: &Frame) -> Result<FusedReport, VisionError> {
        self.fuse_at(frame, epoch_seconds())
    }

    /// Fuse a frame captured at `timestamp` (epoch seconds)
    pub fn fuse_at(&self, frame: &Frame, timestamp: f64) -> Result<FusedReport, VisionError> {
        let (width, height) = (frame.width(), frame.height());
        if width == 0 || height == 0 {
            return Err(VisionError::Processing("cannot fuse an empty frame".to_string()));
        }

        let colors = self
            .segmenter
            .segment(frame)
            .into_iter()
            .filter_map(|region| normalize_region(&region, width, height))
            .collect::<Vec<_>>();

        let objects = self
            .detector
            .detect(frame)?
            .into_iter()
            .filter(|obj| self.accepts(obj))
            .filter_map(|obj| normalize_object(&obj, width, height))
            .collect::<Vec<_>>();

        debug!(
            "Fused {} color and {} object detections ({})",
            colors.len(),
            objects.len(),
            self.detector.name()
        );
        Ok(FusedReport::assemble(colors, objects, timestamp))
    }

    fn accepts(&self, obj: &RawObject) -> bool {
        obj.confidence.is_finite() && obj.confidence > self.min_confidence && obj.confidence <= 1.0
    }
}

/// Pixel box to frame-relative box
pub fn normalize_box(x: f32, y: f32, w: f32, h: f32, frame_width: u32, frame_height: u32) -> Option<NormalizedBox> {
    NormalizedBox::from_pixels(x, y, w, h, frame_width, frame_height)
}

/// Pixel point to frame-relative point
pub fn normalize_point(x: f32, y: f32, frame_width: u32, frame_height: u32) -> Option<NormalizedPoint> {
    NormalizedPoint::from_pixels(x, y, frame_width, frame_height)
}

/// Pixel-space color region to frame-relative detection
pub fn normalize_region(region: &ColorRegion, width: u32, height: u32) -> Option<ColorDetection> {
    let bbox = normalize_box(
        region.x as f32,
        region.y as f32,
        region.width as f32,
        region.height as f32,
        width,
        height,
    )?;
    let center = normalize_point(region.center_x as f32, region.center_y as f32, width, height)?;
    Some(ColorDetection {
        color: region.color.clone(),
        area: region.area,
        confidence: 1.0,
        bbox,
        center,
    })
}

/// Detector box to frame-relative detection, clipped to the frame
pub fn normalize_object(obj: &RawObject, width: u32, height: u32) -> Option<ObjectDetection> {
    let (x, y, w, h) = obj.clipped_to(width, height)?;
    let bbox = normalize_box(x, y, w, h, width, height)?;
    Some(ObjectDetection {
        label: obj.label.clone(),
        confidence: obj.confidence,
        bbox,
    })
}
