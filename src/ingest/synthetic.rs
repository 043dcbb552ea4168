//! Synthetic frame source (`stub://`).
//!
//! Produces a moving gradient so downstream stages see changing pixels. Used
//! for dry runs together with the scripted detector, and in tests.

use anyhow::Result;
use std::time::{Duration, Instant};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

pub struct SyntheticSource {
    uri: String,
    width: u32,
    height: u32,
    limit: Option<u64>,
    frame_interval: Option<Duration>,
    last_frame_at: Option<Instant>,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticSource {
    pub fn new(uri: &str, width: u32, height: u32) -> Self {
        Self {
            uri: uri.to_string(),
            width,
            height,
            limit: None,
            frame_interval: None,
            last_frame_at: None,
            frame_count: 0,
            scene_state: 0,
        }
    }

    /// Exhaust after `limit` frames.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Deliver at most `fps` frames per second. `0` disables pacing.
    pub fn with_pacing(mut self, fps: u32) -> Self {
        self.frame_interval = (fps > 0).then(|| Duration::from_secs(1) / fps);
        self
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.width as usize) * (self.height as usize) * 3;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }

    fn pace(&mut self) {
        if let (Some(interval), Some(last)) = (self.frame_interval, self.last_frame_at) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn connect(&mut self) -> Result<()> {
        log::info!(
            "SyntheticSource: connected to {} ({}x{})",
            self.uri,
            self.width,
            self.height
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        self.pace();
        let pixels = self.generate_pixels();
        let frame = Frame::from_rgb(pixels, self.width, self.height, self.frame_count)?;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_skipped: 0,
            uri: self.uri.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_numbered_from_zero() -> Result<()> {
        let mut source = SyntheticSource::new("stub://test", 64, 48);
        source.connect()?;
        let first = source.next_frame()?.expect("frame");
        let second = source.next_frame()?.expect("frame");
        assert_eq!((first.index, second.index), (0, 1));
        assert_eq!((first.width(), first.height()), (64, 48));
        assert_ne!(first.pixels(), second.pixels());
        Ok(())
    }

    #[test]
    fn limited_source_is_exhausted() -> Result<()> {
        let mut source = SyntheticSource::new("stub://test", 4, 4).with_limit(1);
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_none());
        assert!(source.next_frame()?.is_none());
        Ok(())
    }
}
