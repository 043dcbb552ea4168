//! Detector adapter.
//!
//! Wraps the object-detection model behind `DetectorBackend`: one frame in,
//! a list of raw `Detection`s (class id, confidence, pixel box) out. Nothing in
//! the pipeline assumes anything about model internals.

mod backend;
pub mod backends;
mod nms;
mod result;

pub use backend::DetectorBackend;
pub use backends::{open_backend, ScriptedBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use nms::non_max_suppression;
pub use result::Detection;
