use serde::{Deserialize, Serialize};

use crate::region::BoundingBox;

/// One raw detection. Produced per frame, discarded after the frame is processed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    /// Model confidence in `[0, 1]`.
    pub confidence: f32,
    /// Pixel box in frame coordinates.
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class_id: u32, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_id,
            confidence,
            bbox,
        }
    }
}
