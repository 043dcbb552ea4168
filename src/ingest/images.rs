//! Image-sequence frame source.
//!
//! Treats a directory of JPEG/PNG stills, sorted by file name, as a recorded
//! feed. Files that fail to decode are skipped with a warning.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;
use crate::roster::IMAGE_EXTENSIONS;

pub struct ImageSequenceSource {
    dir: PathBuf,
    paths: Vec<PathBuf>,
    position: usize,
    frame_count: u64,
    skipped: u64,
    connected: bool,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(anyhow!("image source {} is not a directory", dir.display()));
        }
        let mut paths = std::fs::read_dir(dir)
            .with_context(|| format!("list {}", dir.display()))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()
            .with_context(|| format!("list {}", dir.display()))?;
        paths.retain(|p| p.is_file() && has_image_extension(p));
        paths.sort();
        Ok(Self {
            dir: dir.to_path_buf(),
            paths,
            position: 0,
            frame_count: 0,
            skipped: 0,
            connected: false,
        })
    }

    /// Number of candidate image files.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn name(&self) -> &'static str {
        "images"
    }

    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!(
            "ImageSequenceSource: {} images in {}",
            self.paths.len(),
            self.dir.display()
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        while let Some(path) = self.paths.get(self.position) {
            self.position += 1;
            match image::open(path) {
                Ok(image) => {
                    let frame = Frame::from_image(image.to_rgb8(), self.frame_count);
                    self.frame_count += 1;
                    return Ok(Some(frame));
                }
                Err(e) => {
                    self.skipped += 1;
                    log::warn!("ImageSequenceSource: skipping {}: {}", path.display(), e);
                }
            }
        }
        Ok(None)
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_skipped: self.skipped,
            uri: self.dir.display().to_string(),
        }
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|a| ext.eq_ignore_ascii_case(a)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn yields_sorted_frames_and_skips_garbage() -> Result<()> {
        let dir = tempfile::tempdir()?;
        RgbImage::new(8, 6).save(dir.path().join("002.png"))?;
        RgbImage::new(4, 4).save(dir.path().join("001.png"))?;
        std::fs::write(dir.path().join("003.jpg"), b"not a jpeg")?;
        std::fs::write(dir.path().join("notes.txt"), b"ignored")?;

        let mut source = ImageSequenceSource::open(dir.path())?;
        assert_eq!(source.len(), 3);
        source.connect()?;

        let first = source.next_frame()?.expect("first frame");
        assert_eq!((first.index, first.width()), (0, 4));
        let second = source.next_frame()?.expect("second frame");
        assert_eq!((second.index, second.width()), (1, 8));
        assert!(source.next_frame()?.is_none());

        let stats = source.stats();
        assert_eq!(stats.frames_captured, 2);
        assert_eq!(stats.frames_skipped, 1);
        Ok(())
    }

    #[test]
    fn missing_directory_is_an_error() {
        assert!(ImageSequenceSource::open(Path::new("/no/such/feed")).is_err());
    }
}
