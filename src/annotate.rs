//! Frame annotation and recording.
//!
//! Every gated detection is annotated with its class name and confidence.
//! Violations are additionally annotated with the resolved identity in red.
//! Boxes are drawn onto the frame; labels travel alongside in
//! `annotations.jsonl` when a recorder is configured.

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::frame::encode_jpeg;
use crate::region::BoundingBox;

pub const DETECTION_COLOR: [u8; 3] = [0, 255, 0];
pub const VIOLATION_COLOR: [u8; 3] = [255, 0, 0];
const BOX_THICKNESS: i32 = 2;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Annotation {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub label: String,
    pub color: [u8; 3],
}

impl Annotation {
    /// `"<class> <confidence>"`, e.g. `"phone 0.35"`.
    pub fn detection(class_name: &str, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            bbox,
            label: format!("{} {:.2}", class_name, confidence),
            color: DETECTION_COLOR,
        }
    }

    /// `"<identity> - <VIOLATION>!"`, e.g. `"alice - PHONE!"`.
    pub fn violation(identity: &str, violation: &str, bbox: BoundingBox) -> Self {
        Self {
            bbox,
            label: format!("{} - {}!", identity, violation.to_uppercase()),
            color: VIOLATION_COLOR,
        }
    }
}

/// Draw annotation boxes onto `image`. Boxes partially outside the image are clipped.
pub fn draw(image: &mut RgbImage, annotations: &[Annotation]) {
    for annotation in annotations {
        let bbox = annotation.bbox;
        if bbox.is_empty() {
            continue;
        }
        let color = Rgb(annotation.color);
        for offset in 0..BOX_THICKNESS {
            let width = bbox.width() - 2 * offset;
            let height = bbox.height() - 2 * offset;
            if width <= 0 || height <= 0 {
                break;
            }
            let rect = Rect::at(bbox.x1 + offset, bbox.y1 + offset)
                .of_size(width as u32, height as u32);
            draw_hollow_rect_mut(image, rect, color);
        }
    }
}

/// Copy of `image` with `annotations` drawn on it.
pub fn render(image: &RgbImage, annotations: &[Annotation]) -> RgbImage {
    let mut annotated = image.clone();
    draw(&mut annotated, annotations);
    annotated
}

#[derive(Serialize)]
struct RecordLine<'a> {
    frame: u64,
    file: &'a str,
    annotations: &'a [Annotation],
}

/// Writes annotated frames as numbered JPEGs plus one `annotations.jsonl` line per frame.
pub struct FrameRecorder {
    dir: PathBuf,
    index: BufWriter<File>,
    frames_written: u64,
}

impl FrameRecorder {
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create recording dir {}", dir.display()))?;
        let index_path = dir.join("annotations.jsonl");
        let index = File::create(&index_path)
            .with_context(|| format!("create {}", index_path.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            index: BufWriter::new(index),
            frames_written: 0,
        })
    }

    pub fn record(
        &mut self,
        frame_index: u64,
        image: &RgbImage,
        annotations: &[Annotation],
    ) -> Result<()> {
        let name = format!("frame_{:06}.jpg", frame_index);
        let jpeg = encode_jpeg(&render(image, annotations))?;
        let path = self.dir.join(&name);
        std::fs::write(&path, jpeg).with_context(|| format!("write {}", path.display()))?;

        let line = RecordLine {
            frame: frame_index,
            file: &name,
            annotations,
        };
        serde_json::to_writer(&mut self.index, &line).context("write annotations")?;
        self.index.write_all(b"\n").context("write annotations")?;
        self.frames_written += 1;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn finish(mut self) -> Result<u64> {
        self.index.flush().context("flush annotations")?;
        Ok(self.frames_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels() {
        let bbox = BoundingBox::new(0, 0, 4, 4);
        assert_eq!(Annotation::detection("phone", 0.35, bbox).label, "phone 0.35");
        let v = Annotation::violation("alice", "phone", bbox);
        assert_eq!(v.label, "alice - PHONE!");
        assert_eq!(v.color, VIOLATION_COLOR);
    }

    #[test]
    fn draws_outline_only() {
        let mut image = RgbImage::new(10, 10);
        draw(
            &mut image,
            &[Annotation::violation("alice", "phone", BoundingBox::new(1, 1, 9, 9))],
        );
        assert_eq!(image.get_pixel(1, 1).0, VIOLATION_COLOR);
        assert_eq!(image.get_pixel(2, 5).0, VIOLATION_COLOR);
        assert_eq!(image.get_pixel(5, 5).0, [0, 0, 0]);
    }

    #[test]
    fn out_of_frame_boxes_do_not_panic() {
        let mut image = RgbImage::new(8, 8);
        draw(
            &mut image,
            &[Annotation::detection("person", 0.9, BoundingBox::new(-20, -20, 40, 40))],
        );
    }

    #[test]
    fn recorder_writes_frames_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = FrameRecorder::create(dir.path()).unwrap();
        let image = RgbImage::new(16, 16);
        let notes = [Annotation::detection("phone", 0.5, BoundingBox::new(2, 2, 8, 8))];
        recorder.record(0, &image, &notes).unwrap();
        recorder.record(1, &image, &[]).unwrap();
        assert_eq!(recorder.finish().unwrap(), 2);

        assert!(dir.path().join("frame_000001.jpg").exists());
        let index = std::fs::read_to_string(dir.path().join("annotations.jsonl")).unwrap();
        let lines: Vec<serde_json::Value> = index
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["annotations"][0]["label"], "phone 0.50");
        assert_eq!(lines[0]["annotations"][0]["box"]["x1"], 2);
    }
}
