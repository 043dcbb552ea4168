//! Local video file frame source.
//!
//! This module provides `FileSource` for ingesting frames from recorded exam
//! videos. Decoding happens in-memory (no network access, no decoded frames on
//! disk). End of file exhausts the source.

use anyhow::{anyhow, Result};

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::{FrameSource, SourceStats};
use crate::frame::Frame;

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local file path (e.g., "/srv/exams/physics.mp4").
    pub path: String,
    /// Nominal frame rate, used for health checks.
    pub target_fps: u32,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            target_fps: 10,
        }
    }
}

/// Local file frame source.
pub struct FileSource {
    #[cfg(feature = "ingest-file-ffmpeg")]
    inner: FfmpegFileSource,
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes)"
            ));
        }
        Self::open(config)
    }

    #[cfg(feature = "ingest-file-ffmpeg")]
    fn open(config: FileConfig) -> Result<Self> {
        Ok(Self {
            inner: FfmpegFileSource::new(config)?,
        })
    }

    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    fn open(_config: FileConfig) -> Result<Self> {
        Err(anyhow!(
            "file ingestion requires the ingest-file-ffmpeg feature"
        ))
    }
}

#[cfg(feature = "ingest-file-ffmpeg")]
impl FrameSource for FileSource {
    fn name(&self) -> &'static str {
        "file"
    }

    fn connect(&mut self) -> Result<()> {
        self.inner.connect()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.inner.next_frame()
    }

    fn is_healthy(&self) -> bool {
        self.inner.is_healthy()
    }

    fn stats(&self) -> SourceStats {
        self.inner.stats()
    }
}

#[cfg(not(feature = "ingest-file-ffmpeg"))]
impl FrameSource for FileSource {
    fn name(&self) -> &'static str {
        "file"
    }

    fn connect(&mut self) -> Result<()> {
        Err(anyhow!(
            "file ingestion requires the ingest-file-ffmpeg feature"
        ))
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        Ok(None)
    }

    fn is_healthy(&self) -> bool {
        false
    }

    fn stats(&self) -> SourceStats {
        SourceStats::default()
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    !path.contains("://")
}
