#![cfg(feature = "backend-tract")]

//! Two-stage ONNX face embedder: a YOLO-style face detector finds faces, an
//! embedding network turns each face crop into a descriptor.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use tract_onnx::prelude::*;

use super::{Embedding, FaceEmbedder};
use crate::config::EmbedderSettings;
use crate::detect::backends::tract::{load_plan, rgb_to_input, YoloPlan};
use crate::detect::non_max_suppression;

const FACE_NMS_IOU: f32 = 0.4;

pub struct TractFaceEmbedder {
    faces: YoloPlan,
    embedder: TypedRunnableModel<TypedModel>,
    embedding_input_size: u32,
    min_face_confidence: f32,
    normalize: bool,
}

impl TractFaceEmbedder {
    pub fn new(settings: &EmbedderSettings) -> Result<Self> {
        let face_model = settings
            .face_model_path
            .as_ref()
            .ok_or_else(|| anyhow!("face embedder requires embedder.face_model_path"))?;
        let embedding_model = settings
            .embedding_model_path
            .as_ref()
            .ok_or_else(|| anyhow!("face embedder requires embedder.embedding_model_path"))?;

        Ok(Self {
            faces: YoloPlan::new(
                face_model,
                settings.face_input_size,
                settings.face_input_size,
            )?,
            embedder: load_plan(
                embedding_model,
                settings.embedding_input_size,
                settings.embedding_input_size,
            )?,
            embedding_input_size: settings.embedding_input_size,
            min_face_confidence: settings.min_face_confidence,
            normalize: settings.normalize,
        })
    }

    fn embed_face(&self, face: &RgbImage) -> Result<Embedding> {
        let size = self.embedding_input_size;
        let input = rgb_to_input(face.as_raw(), face.width(), face.height(), size, size)?;
        let outputs = self
            .embedder
            .run(tvec!(input.into()))
            .context("embedding inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("embedding model produced no outputs"))?;
        let values: Vec<f32> = output
            .to_array_view::<f32>()
            .context("embedding output tensor was not f32")?
            .iter()
            .copied()
            .collect();
        let embedding = Embedding::new(values);
        Ok(if self.normalize {
            embedding.normalized()
        } else {
            embedding
        })
    }
}

impl FaceEmbedder for TractFaceEmbedder {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn embed(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Embedding>> {
        let raw = self
            .faces
            .run(pixels, width, height, self.min_face_confidence)?;
        let faces = non_max_suppression(raw, FACE_NMS_IOU);
        if faces.is_empty() {
            return Ok(Vec::new());
        }

        let image = RgbImage::from_raw(width, height, pixels.to_vec())
            .ok_or_else(|| anyhow!("image buffer does not match {}x{}", width, height))?;
        let bounds = crate::region::FrameSize::new(width, height);

        let mut embeddings = Vec::with_capacity(faces.len());
        for face in faces {
            let clipped = face.bbox.clip(bounds);
            if clipped.is_empty() {
                continue;
            }
            let crop = image::imageops::crop_imm(
                &image,
                clipped.x1 as u32,
                clipped.y1 as u32,
                clipped.width() as u32,
                clipped.height() as u32,
            )
            .to_image();
            embeddings.push(self.embed_face(&crop)?);
        }
        Ok(embeddings)
    }
}
