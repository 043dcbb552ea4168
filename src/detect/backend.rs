use anyhow::Result;

use super::Detection;

/// Detector backend trait.
///
/// Implementations receive the frame's RGB24 pixels for the duration of the
/// call only. They must not retain the slice, write it to disk, or send it
/// anywhere.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on one RGB24 frame.
    ///
    /// Boxes are returned in frame pixel coordinates. Backends may pre-filter
    /// with a low global confidence floor; per-class gating happens downstream.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>>;

    /// Number of classes the model can emit, when known.
    fn class_count(&self) -> Option<u32> {
        None
    }

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
