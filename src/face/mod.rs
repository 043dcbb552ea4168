//! Face embeddings.
//!
//! The embedding extractor is an external model. The pipeline only relies on
//! `FaceEmbedder`: an image region in, zero or more fixed-length vectors out,
//! one per face found, in the extractor's preferred order.

#[cfg(feature = "backend-tract")]
pub mod tract;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::EmbedderSettings;

#[cfg(feature = "backend-tract")]
pub use tract::TractFaceEmbedder;

/// Fixed-length face descriptor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Euclidean distance. Mismatched dimensions are infinitely far apart.
    pub fn distance(&self, other: &Embedding) -> f32 {
        if self.0.len() != other.0.len() {
            return f32::INFINITY;
        }
        self.0
            .iter()
            .zip(&other.0)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }

    /// Scale to unit length. Zero vectors are returned unchanged.
    pub fn normalized(mut self) -> Self {
        let norm = self.0.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            self.0.iter_mut().for_each(|v| *v /= norm);
        }
        self
    }

    /// Component-wise mean of equally sized embeddings.
    pub fn mean<'a, I>(embeddings: I) -> Option<Embedding>
    where
        I: IntoIterator<Item = &'a Embedding>,
    {
        let mut iter = embeddings.into_iter();
        let first = iter.next()?;
        let mut sum: Vec<f64> = first.0.iter().map(|v| *v as f64).collect();
        let mut count = 1usize;
        for embedding in iter {
            if embedding.len() != sum.len() {
                return None;
            }
            for (acc, v) in sum.iter_mut().zip(&embedding.0) {
                *acc += *v as f64;
            }
            count += 1;
        }
        Some(Embedding(
            sum.into_iter().map(|v| (v / count as f64) as f32).collect(),
        ))
    }
}

/// Face embedding extractor.
///
/// Implementations receive RGB24 pixels for the duration of the call only.
pub trait FaceEmbedder: Send {
    /// Extractor identifier.
    fn name(&self) -> &'static str;

    /// Embeddings for the faces found in the image; empty when there are none.
    fn embed(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Embedding>>;
}

/// Embedder that returns the same embeddings for every image.
///
/// For tests and dry runs where the face model is unavailable.
#[derive(Clone, Debug, Default)]
pub struct StubEmbedder {
    faces: Vec<Embedding>,
    calls: u64,
}

impl StubEmbedder {
    pub fn new(faces: Vec<Embedding>) -> Self {
        Self { faces, calls: 0 }
    }

    /// An embedder that never finds a face.
    pub fn faceless() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl FaceEmbedder for StubEmbedder {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn embed(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Result<Vec<Embedding>> {
        self.calls += 1;
        Ok(self.faces.clone())
    }
}

/// Build the configured face embedder.
#[cfg(feature = "backend-tract")]
pub fn open_embedder(settings: &EmbedderSettings) -> Result<Box<dyn FaceEmbedder>> {
    Ok(Box::new(TractFaceEmbedder::new(settings)?))
}

/// Build the configured face embedder.
#[cfg(not(feature = "backend-tract"))]
pub fn open_embedder(_settings: &EmbedderSettings) -> Result<Box<dyn FaceEmbedder>> {
    Err(anyhow::anyhow!(
        "face embedding requires the backend-tract feature"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert_eq!(a.distance(&b), 5.0);
        assert_eq!(b.distance(&a), 5.0);
        assert_eq!(a.distance(&a), 0.0);
    }

    #[test]
    fn mismatched_dimensions_never_match() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![0.0, 0.0, 0.0]);
        assert!(a.distance(&b).is_infinite());
    }

    #[test]
    fn mean_and_normalize() {
        let a = Embedding::new(vec![1.0, 3.0]);
        let b = Embedding::new(vec![3.0, 5.0]);
        assert_eq!(Embedding::mean([&a, &b]), Some(Embedding::new(vec![2.0, 4.0])));
        assert_eq!(Embedding::mean(std::iter::empty::<&Embedding>()), None);

        let unit = Embedding::new(vec![3.0, 4.0]).normalized();
        assert!((unit.as_slice()[0] - 0.6).abs() < 1e-6);
        assert!((unit.as_slice()[1] - 0.8).abs() < 1e-6);
    }
}
