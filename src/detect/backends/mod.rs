pub mod scripted;

#[cfg(feature = "backend-tract")]
pub mod tract;

use anyhow::Result;

pub use scripted::ScriptedBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

use super::DetectorBackend;
use crate::config::{DetectorKind, DetectorSettings};

/// Build the configured detector backend.
pub fn open_backend(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    match settings.backend {
        DetectorKind::Scripted => {
            let backend = match &settings.script_path {
                Some(path) => ScriptedBackend::load(path)?,
                None => {
                    log::warn!("scripted detector without a script: no detections will be produced");
                    ScriptedBackend::new()
                }
            };
            Ok(Box::new(backend))
        }
        DetectorKind::Tract => open_tract(settings),
    }
}

#[cfg(feature = "backend-tract")]
fn open_tract(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let model_path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("tract detector requires detector.model_path"))?;
    let backend = TractBackend::new(model_path, settings.input_width, settings.input_height)?
        .with_min_confidence(settings.min_confidence)
        .with_nms_iou(settings.nms_iou);
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn open_tract(_settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow::anyhow!(
        "tract detector requires the backend-tract feature"
    ))
}
