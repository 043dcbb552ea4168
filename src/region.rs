//! Pixel-space boxes and the region refiner.
//!
//! Detections for held objects (a phone in a hand) rarely include the face of
//! the person holding them. Before identity resolution those boxes are grown
//! upward and sideways so the crop has a chance of containing the holder's
//! face. Person/posture boxes are used as-is.

use serde::{Deserialize, Serialize};

use crate::policy::ClassRole;

/// Upward growth, in multiples of the box height.
pub const HELD_OBJECT_EXPAND_UP: f32 = 3.0;
/// Growth on each side, in multiples of the box width.
pub const HELD_OBJECT_EXPAND_SIDES: f32 = 1.5;
/// Downward growth, in multiples of the box height.
pub const HELD_OBJECT_EXPAND_DOWN: f32 = 0.2;

/// Frame dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned box in pixel coordinates, `(x1, y1)` inclusive, `(x2, y2)` exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build from model-space float corners. Coordinates truncate toward zero.
    pub fn from_xyxy(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1: x1 as i32,
            y1: y1 as i32,
            x2: x2 as i32,
            y2: y2 as i32,
        }
    }

    /// Horizontal extent, saturating at `i32::MAX` for degenerate model output.
    pub fn width(&self) -> i32 {
        span(self.x1, self.x2)
    }

    pub fn height(&self) -> i32 {
        span(self.y1, self.y2)
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// True when `other` lies entirely inside `self` (edges may touch).
    pub fn contains(&self, other: &BoundingBox) -> bool {
        self.x1 <= other.x1 && self.y1 <= other.y1 && self.x2 >= other.x2 && self.y2 >= other.y2
    }

    /// Clip to `[0, width] x [0, height]`.
    pub fn clip(&self, frame: FrameSize) -> BoundingBox {
        let w = frame.width.min(i32::MAX as u32) as i32;
        let h = frame.height.min(i32::MAX as u32) as i32;
        BoundingBox {
            x1: self.x1.clamp(0, w),
            y1: self.y1.clamp(0, h),
            x2: self.x2.clamp(0, w),
            y2: self.y2.clamp(0, h),
        }
    }

    /// Intersection over union; zero for disjoint or empty boxes.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = BoundingBox::new(ix1, iy1, ix2, iy2).area();
        let union = self.area() + other.area() - inter;
        if union <= 0 {
            return 0.0;
        }
        inter as f32 / union as f32
    }
}

fn span(start: i32, end: i32) -> i32 {
    (end as i64 - start as i64).clamp(0, i32::MAX as i64) as i32
}

/// Region refiner: the crop used for identity resolution of a detection.
///
/// Held-object boxes are expanded (up 3.0x height, 1.5x width on each side,
/// down 0.2x height) and clipped to the frame. Every other role returns the
/// box unchanged.
pub fn refine(bbox: BoundingBox, role: ClassRole, frame: FrameSize) -> BoundingBox {
    match role {
        ClassRole::HeldObject => expand_held_object(bbox, frame),
        ClassRole::Posture | ClassRole::Benign => bbox,
    }
}

fn expand_held_object(bbox: BoundingBox, frame: FrameSize) -> BoundingBox {
    let w = bbox.width() as f32;
    let h = bbox.height() as f32;
    BoundingBox {
        x1: bbox.x1.saturating_sub((w * HELD_OBJECT_EXPAND_SIDES) as i32),
        y1: bbox.y1.saturating_sub((h * HELD_OBJECT_EXPAND_UP) as i32),
        x2: bbox.x2.saturating_add((w * HELD_OBJECT_EXPAND_SIDES) as i32),
        y2: bbox.y2.saturating_add((h * HELD_OBJECT_EXPAND_DOWN) as i32),
    }
    .clip(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: FrameSize = FrameSize {
        width: 640,
        height: 480,
    };

    #[test]
    fn held_object_expands_up_sides_and_down() {
        let phone = BoundingBox::new(300, 300, 320, 340);
        let refined = refine(phone, ClassRole::HeldObject, FRAME);
        // w=20, h=40: up 120, sides 30, down 8
        assert_eq!(refined, BoundingBox::new(270, 180, 350, 348));
    }

    #[test]
    fn held_object_expansion_is_clipped_to_frame() {
        let phone = BoundingBox::new(5, 20, 45, 60);
        let refined = refine(phone, ClassRole::HeldObject, FRAME);
        assert_eq!(refined, BoundingBox::new(0, 0, 105, 68));

        let corner = BoundingBox::new(600, 440, 640, 480);
        let refined = refine(corner, ClassRole::HeldObject, FRAME);
        assert_eq!(refined.x2, 640);
        assert_eq!(refined.y2, 480);
    }

    #[test]
    fn held_object_region_contains_original() {
        let boxes = [
            BoundingBox::new(0, 0, 10, 10),
            BoundingBox::new(100, 200, 180, 260),
            BoundingBox::new(630, 470, 640, 480),
            BoundingBox::new(320, 0, 321, 1),
        ];
        for phone in boxes {
            let refined = refine(phone, ClassRole::HeldObject, FRAME);
            assert!(refined.contains(&phone), "{:?} does not contain {:?}", refined, phone);
            assert!(refined.area() >= phone.area());
        }
    }

    #[test]
    fn extreme_boxes_do_not_overflow() {
        let huge = BoundingBox::new(-2_000_000_000, -2_000_000_000, 2_000_000_000, 2_000_000_000);
        assert_eq!(huge.width(), i32::MAX);
        assert_eq!(huge.height(), i32::MAX);
        assert_eq!(
            refine(huge, ClassRole::HeldObject, FRAME),
            BoundingBox::new(0, 0, 640, 480)
        );

        let saturated = BoundingBox::from_xyxy(f32::NEG_INFINITY, 10.0, f32::INFINITY, 20.0);
        assert_eq!(saturated.width(), i32::MAX);
        assert_eq!(
            refine(saturated, ClassRole::HeldObject, FRAME),
            BoundingBox::new(0, 0, 640, 22)
        );
        assert_eq!(BoundingBox::new(i32::MAX, 0, i32::MIN, 5).width(), 0);
    }

    #[test]
    fn posture_and_benign_boxes_are_untouched() {
        let person = BoundingBox::new(50, 60, 250, 400);
        assert_eq!(refine(person, ClassRole::Posture, FRAME), person);
        assert_eq!(refine(person, ClassRole::Benign, FRAME), person);
    }

    #[test]
    fn clip_and_iou() {
        let b = BoundingBox::new(-10, -5, 700, 500).clip(FRAME);
        assert_eq!(b, BoundingBox::new(0, 0, 640, 480));

        let a = BoundingBox::new(0, 0, 10, 10);
        let c = BoundingBox::new(5, 0, 15, 10);
        assert!((a.iou(&c) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&BoundingBox::new(20, 20, 30, 30)), 0.0);
    }
}
