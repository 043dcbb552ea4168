#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops::FilterType, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::nms::non_max_suppression;
use crate::detect::result::Detection;
use crate::region::BoundingBox;

type Plan = TypedRunnableModel<TypedModel>;

/// Load an ONNX model with a fixed `1x3xHxW` f32 input.
pub(crate) fn load_plan(model_path: &Path, width: u32, height: u32) -> Result<Plan> {
    tract_onnx::onnx()
        .model_for_path(model_path)
        .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
        .with_input_fact(
            0,
            InferenceFact::dt_shape(
                f32::datum_type(),
                tvec!(1, 3, height as usize, width as usize),
            ),
        )
        .context("failed to set input fact")?
        .into_optimized()
        .context("failed to optimize ONNX model")?
        .into_runnable()
        .context("failed to build runnable ONNX model")
}

/// Resize an RGB24 buffer to the model input and lay it out as NCHW in `[0, 1]`.
pub(crate) fn rgb_to_input(
    pixels: &[u8],
    width: u32,
    height: u32,
    input_width: u32,
    input_height: u32,
) -> Result<Tensor> {
    let expected_len = (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    if pixels.len() != expected_len {
        return Err(anyhow!(
            "expected {} RGB bytes, received {}",
            expected_len,
            pixels.len()
        ));
    }

    let image = RgbImage::from_raw(width, height, pixels.to_vec())
        .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", width, height))?;
    let resized = if width == input_width && height == input_height {
        image
    } else {
        image::imageops::resize(&image, input_width, input_height, FilterType::Triangle)
    };

    let input = tract_ndarray::Array4::from_shape_fn(
        (1, 3, input_height as usize, input_width as usize),
        |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
    );
    Ok(input.into_tensor())
}

/// YOLO-style detection head: output `[1, 4 + classes, anchors]` with
/// centre/size boxes in model input pixels followed by per-class scores.
pub(crate) struct YoloPlan {
    model: Plan,
    input_width: u32,
    input_height: u32,
    class_count: Option<u32>,
}

impl YoloPlan {
    pub(crate) fn new(model_path: &Path, input_width: u32, input_height: u32) -> Result<Self> {
        Ok(Self {
            model: load_plan(model_path, input_width, input_height)?,
            input_width,
            input_height,
            class_count: None,
        })
    }

    pub(crate) fn class_count(&self) -> Option<u32> {
        self.class_count
    }

    /// Raw boxes at or above `min_confidence`, scaled to frame pixels.
    pub(crate) fn run(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        min_confidence: f32,
    ) -> Result<Vec<Detection>> {
        let input = rgb_to_input(pixels, width, height, self.input_width, self.input_height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 {
            return Err(anyhow!("unexpected detection output shape {:?}", shape));
        }
        let view = view
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("reshape detection output")?;

        let classes = shape[1] - 4;
        self.class_count = Some(classes as u32);
        let scale_x = width as f32 / self.input_width as f32;
        let scale_y = height as f32 / self.input_height as f32;

        let mut detections = Vec::new();
        for anchor in 0..shape[2] {
            let mut best_class = 0usize;
            let mut best_score = f32::NEG_INFINITY;
            for class in 0..classes {
                let score = view[[0, 4 + class, anchor]];
                if score > best_score {
                    best_score = score;
                    best_class = class;
                }
            }
            if best_score.is_nan() || best_score < min_confidence {
                continue;
            }
            let cx = view[[0, 0, anchor]];
            let cy = view[[0, 1, anchor]];
            let w = view[[0, 2, anchor]];
            let h = view[[0, 3, anchor]];
            detections.push(Detection::new(
                best_class as u32,
                best_score,
                BoundingBox::from_xyxy(
                    (cx - w / 2.0) * scale_x,
                    (cy - h / 2.0) * scale_y,
                    (cx + w / 2.0) * scale_x,
                    (cy + h / 2.0) * scale_y,
                ),
            ));
        }
        Ok(detections)
    }
}

/// Tract-based ONNX object detector.
///
/// Loads a local model file and runs inference on RGB frames. No network I/O
/// and no disk writes beyond model loading.
pub struct TractBackend {
    plan: YoloPlan,
    min_confidence: f32,
    nms_iou: f32,
}

impl TractBackend {
    pub fn new<P: AsRef<Path>>(model_path: P, input_width: u32, input_height: u32) -> Result<Self> {
        Ok(Self {
            plan: YoloPlan::new(model_path.as_ref(), input_width, input_height)?,
            min_confidence: 0.1,
            nms_iou: 0.45,
        })
    }

    /// Global pre-filter applied before per-class gating.
    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn with_nms_iou(mut self, nms_iou: f32) -> Self {
        self.nms_iou = nms_iou;
        self
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>> {
        let raw = self.plan.run(pixels, width, height, self.min_confidence)?;
        Ok(non_max_suppression(raw, self.nms_iou))
    }

    fn class_count(&self) -> Option<u32> {
        self.plan.class_count()
    }

    fn warm_up(&mut self) -> Result<()> {
        let (w, h) = (self.plan.input_width, self.plan.input_height);
        let blank = vec![0u8; (w as usize) * (h as usize) * 3];
        self.plan.run(&blank, w, h, 1.1).map(|_| ())
    }
}
