//! Replay backend.
//!
//! Plays back detections recorded ahead of time (one JSON object per line),
//! keyed by the order in which frames are presented. Used for dry runs against
//! recorded detector output and for tests.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;

#[derive(Debug, Deserialize)]
struct ScriptLine {
    frame: u64,
    #[serde(flatten)]
    detection: Detection,
}

/// Detector that replays scripted detections.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    frames: BTreeMap<u64, Vec<Detection>>,
    repeat: Option<Vec<Detection>>,
    calls: u64,
}

impl ScriptedBackend {
    /// A backend that never detects anything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame `n` (in call order) yields `frames[n]`; later frames yield nothing.
    pub fn from_frames(frames: Vec<Vec<Detection>>) -> Self {
        Self {
            frames: frames
                .into_iter()
                .enumerate()
                .map(|(i, dets)| (i as u64, dets))
                .collect(),
            ..Self::default()
        }
    }

    /// Every frame yields the same detections.
    pub fn repeating(detections: Vec<Detection>) -> Self {
        Self {
            repeat: Some(detections),
            ..Self::default()
        }
    }

    /// Load a JSON-lines script. Blank lines and lines starting with `#` are ignored.
    ///
    /// ```text
    /// {"frame": 0, "class_id": 2, "confidence": 0.35, "box": {"x1": 300, "y1": 300, "x2": 320, "y2": 340}}
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read detection script {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid detection script {}", path.display()))
    }

    pub fn parse(script: &str) -> Result<Self> {
        let mut frames: BTreeMap<u64, Vec<Detection>> = BTreeMap::new();
        for (lineno, line) in script.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let entry: ScriptLine = serde_json::from_str(line)
                .with_context(|| format!("line {}", lineno + 1))?;
            frames.entry(entry.frame).or_default().push(entry.detection);
        }
        Ok(Self {
            frames,
            ..Self::default()
        })
    }

    /// Number of frames presented so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Result<Vec<Detection>> {
        let index = self.calls;
        self.calls += 1;
        if let Some(repeat) = &self.repeat {
            return Ok(repeat.clone());
        }
        Ok(self.frames.get(&index).cloned().unwrap_or_default())
    }
}
