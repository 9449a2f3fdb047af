//! Encoded frame decoding

use crate::error::VisionError;
use image::RgbImage;
use tracing::debug;

/// Frames larger than this are rejected before decoding
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Decoded frame in RGB pixel order
#[derive(Debug, Clone)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    pub fn from_rgb(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixel_count(&self) -> usize {
        self.image.width() as usize * self.image.height() as usize
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.image
    }
}

/// Wraps the image codec; JPEG and PNG payloads are accepted
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    max_bytes: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self { max_bytes: MAX_FRAME_BYTES }
    }
}

impl FrameDecoder {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    /// Decode one binary message into a frame
    pub fn decode(&self, payload: &[u8]) -> Result<Frame, VisionError> {
        if payload.is_empty() {
            return Err(VisionError::Decode("empty frame payload".to_string()));
        }
        if payload.len() > self.max_bytes {
            return Err(VisionError::Decode(format!(
                "frame payload too large ({} bytes, max {})",
                payload.len(),
                self.max_bytes
            )));
        }

        let image = image::load_from_memory(payload)?.to_rgb8();
        if image.width() == 0 || image.height() == 0 {
            return Err(VisionError::Decode("frame has zero dimensions".to_string()));
        }

        debug!("Decoded {}x{} frame from {} bytes", image.width(), image.height(), payload.len());
        Ok(Frame::from_rgb(image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageOutputFormat, Rgb};
    use std::io::Cursor;

    fn encode_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_decode_png() {
        let decoder = FrameDecoder::default();
        let frame = decoder.decode(&encode_png(32, 24, [255, 0, 0])).unwrap();
        assert_eq!(frame.width(), 32);
        assert_eq!(frame.height(), 24);
        assert_eq!(frame.pixel_count(), 768);
        assert_eq!(frame.as_rgb().get_pixel(0, 0), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_decode_empty() {
        let decoder = FrameDecoder::default();
        assert!(matches!(decoder.decode(&[]), Err(VisionError::Decode(_))));
    }

    #[test]
    fn test_decode_garbage() {
        let decoder = FrameDecoder::default();
        let result = decoder.decode(b"definitely not an image");
        assert!(matches!(result, Err(VisionError::Decode(_))));
    }

    #[test]
    fn test_decode_too_large() {
        let decoder = FrameDecoder::new(8);
        let result = decoder.decode(&encode_png(4, 4, [0, 0, 0]));
        assert!(matches!(result, Err(VisionError::Decode(msg)) if msg.contains("too large")));
    }
}
