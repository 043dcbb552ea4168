//! Frame ingestion sources.
//!
//! This module provides different sources for exam-room frames:
//! - Synthetic frames (`stub://`, testing and dry runs)
//! - A directory of still images (recorded feed)
//! - Local video files (feature: ingest-file-ffmpeg)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! Every source yields owned RGB24 `Frame`s in capture order, numbered from 0.
//! `next_frame` returns `Ok(None)` once a finite source is exhausted.
//!
//! The ingestion layer MUST NOT:
//! - Fetch remote URLs
//! - Log raw frame content

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod images;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};
use std::path::Path;

use crate::config::SourceSettings;
use crate::frame::Frame;

pub use file::FileSource;
pub use images::ImageSequenceSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// A stream of frames in capture order.
pub trait FrameSource {
    fn name(&self) -> &'static str;

    fn connect(&mut self) -> Result<()>;

    /// Next frame, or `None` when the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    /// Inputs that could not be decoded and were skipped.
    pub frames_skipped: u64,
    pub uri: String,
}

/// Open the source named by `settings.uri`.
///
/// - `stub://...`: synthetic frames
/// - `/dev/video*` or `v4l2:///dev/videoN`: V4L2 device
/// - a directory: image sequence
/// - any other local path: video file
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    let uri = settings.uri.trim();
    if uri.is_empty() {
        return Err(anyhow!("source uri is empty"));
    }
    if uri.starts_with("stub://") {
        let mut source = SyntheticSource::new(uri, settings.width, settings.height)
            .with_pacing(settings.target_fps);
        if let Some(limit) = settings.synthetic_frames {
            source = source.with_limit(limit);
        }
        return Ok(Box::new(source));
    }
    if let Some(device) = v4l2_device(uri) {
        return open_v4l2(device, settings);
    }
    if uri.contains("://") {
        return Err(anyhow!(
            "unsupported source {:?}: only local devices, files, and directories",
            uri
        ));
    }
    if Path::new(uri).is_dir() {
        return Ok(Box::new(ImageSequenceSource::open(Path::new(uri))?));
    }
    Ok(Box::new(FileSource::new(file::FileConfig {
        path: uri.to_string(),
        target_fps: settings.target_fps,
    })?))
}

fn v4l2_device(uri: &str) -> Option<&str> {
    if let Some(device) = uri.strip_prefix("v4l2://") {
        return Some(device);
    }
    if uri.starts_with("/dev/video") {
        return Some(uri);
    }
    None
}

#[cfg(feature = "ingest-v4l2")]
fn open_v4l2(device: &str, settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(V4l2Source::new(v4l2::V4l2Config {
        device: device.to_string(),
        target_fps: settings.target_fps,
        width: settings.width,
        height: settings.height,
    })))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_v4l2(_device: &str, _settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    Err(anyhow!("V4L2 ingestion requires the ingest-v4l2 feature"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(uri: &str) -> SourceSettings {
        SourceSettings {
            uri: uri.to_string(),
            target_fps: 0,
            width: 32,
            height: 24,
            synthetic_frames: Some(2),
        }
    }

    #[test]
    fn opens_bounded_stub_source() -> Result<()> {
        let mut source = open_source(&settings("stub://exam_room"))?;
        source.connect()?;
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_none());
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[test]
    fn rejects_network_sources() {
        assert!(open_source(&settings("rtsp://camera/stream")).is_err());
        assert!(open_source(&settings("http://example.com/feed.mjpg")).is_err());
        assert!(open_source(&settings("  ")).is_err());
    }

    #[test]
    fn recognizes_v4l2_devices() {
        assert_eq!(v4l2_device("/dev/video0"), Some("/dev/video0"));
        assert_eq!(v4l2_device("v4l2:///dev/video2"), Some("/dev/video2"));
        assert_eq!(v4l2_device("exam.mp4"), None);
    }
}
