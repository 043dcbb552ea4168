//! Owned video frames.
//!
//! - `Frame`: one RGB24 frame plus its capture index and wall-clock time.
//! - Cropping to a region for identity resolution.
//! - JPEG encoding for evidence images and recordings.
//!
//! Frames show exam candidates. Pixel buffers are zeroized when a frame is
//! dropped and never logged.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use zeroize::Zeroize;

use crate::detect::{Detection, DetectorBackend};
use crate::region::{BoundingBox, FrameSize};

/// JPEG quality used for evidence and recordings.
pub const JPEG_QUALITY: u8 = 90;

/// One RGB24 video frame.
pub struct Frame {
    image: RgbImage,
    /// Position in the source, starting at 0.
    pub index: u64,
    /// Wall-clock capture time.
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    /// Wrap a packed RGB24 buffer. Fails when the length does not match the dimensions.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB frame buffer rejected for {}x{}", width, height))?;
        Ok(Self::from_image(image, index))
    }

    pub fn from_image(image: RgbImage, index: u64) -> Self {
        Self {
            image,
            index,
            captured_at: Utc::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.image.width(), self.image.height())
    }

    /// Packed RGB24 pixels.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Run a detector on this frame. The detector sees the pixels for the call only.
    pub fn run_detector(&self, detector: &mut dyn DetectorBackend) -> Result<Vec<Detection>> {
        detector.detect(self.pixels(), self.width(), self.height())
    }

    /// Copy of the region inside `bbox`, clipped to the frame.
    ///
    /// Returns `None` when the clipped region is empty.
    pub fn crop(&self, bbox: BoundingBox) -> Option<Frame> {
        let clipped = bbox.clip(self.size());
        if clipped.is_empty() {
            return None;
        }
        let region = image::imageops::crop_imm(
            &self.image,
            clipped.x1 as u32,
            clipped.y1 as u32,
            clipped.width() as u32,
            clipped.height() as u32,
        )
        .to_image();
        Some(Frame {
            image: region,
            index: self.index,
            captured_at: self.captured_at,
        })
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        let pixels: &mut [u8] = &mut self.image;
        pixels.zeroize();
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("width", &self.width())
            .field("height", &self.height())
            .field("captured_at", &self.captured_at)
            .finish_non_exhaustive()
    }
}

/// Encode an RGB image as JPEG.
pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY)
        .encode_image(image)
        .context("encode JPEG")?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_frame(width: u32, height: u32) -> Frame {
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&[x as u8, y as u8, 7]);
            }
        }
        Frame::from_rgb(pixels, width, height, 3).unwrap()
    }

    #[test]
    fn rejects_mismatched_buffers() {
        assert!(Frame::from_rgb(vec![0u8; 10], 2, 2, 0).is_err());
        assert!(Frame::from_rgb(vec![0u8; 12], 2, 2, 0).is_ok());
    }

    #[test]
    fn crop_copies_clipped_region() {
        let frame = gradient_frame(8, 6);
        let crop = frame.crop(BoundingBox::new(-4, 2, 3, 100)).unwrap();
        assert_eq!((crop.width(), crop.height()), (3, 4));
        assert_eq!(crop.index, 3);
        assert_eq!(crop.image().get_pixel(0, 0).0, [0, 2, 7]);
        assert_eq!(crop.image().get_pixel(2, 3).0, [2, 5, 7]);
    }

    #[test]
    fn crop_outside_frame_is_none() {
        let frame = gradient_frame(8, 6);
        assert!(frame.crop(BoundingBox::new(10, 10, 20, 20)).is_none());
        assert!(frame.crop(BoundingBox::new(2, 2, 2, 5)).is_none());
    }

    #[test]
    fn encodes_jpeg() {
        let frame = gradient_frame(16, 16);
        let jpeg = encode_jpeg(frame.image()).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }
}
