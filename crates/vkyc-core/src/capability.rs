//! Pluggable model capabilities consumed by the verification pipeline.
//!
//! Concrete providers (ONNX models, test stubs) implement these traits and are
//! bundled into a [`ModelSet`] once at startup. Every method takes `&self`:
//! a provider handle is shared read-only by any number of concurrent runs.

use crate::types::{FaceEncoding, LandmarkSet};
use image::{GrayImage, RgbImage};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Produces at most one face embedding for an image.
pub trait FaceEmbeddingProvider: Send + Sync {
    /// Encode the most prominent face in `image`. `Ok(None)` means no face was found.
    fn encode(&self, image: &RgbImage) -> Result<Option<FaceEncoding>, CapabilityError>;

    /// Native distance metric of the embedding space. Defaults to Euclidean.
    fn distance(&self, a: &FaceEncoding, b: &FaceEncoding) -> f32 {
        a.euclidean_distance(b)
    }
}

/// Locates facial landmarks in a grayscale frame, one set per detected face.
pub trait LandmarkDetector: Send + Sync {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<LandmarkSet>, CapabilityError>;
}

/// Boolean smile classifier over a grayscale frame.
pub trait SmileDetector: Send + Sync {
    fn detect_smile(&self, gray: &GrayImage) -> Result<bool, CapabilityError>;
}

impl<T: FaceEmbeddingProvider + ?Sized> FaceEmbeddingProvider for Arc<T> {
    fn encode(&self, image: &RgbImage) -> Result<Option<FaceEncoding>, CapabilityError> {
        (**self).encode(image)
    }

    fn distance(&self, a: &FaceEncoding, b: &FaceEncoding) -> f32 {
        (**self).distance(a, b)
    }
}

impl<T: LandmarkDetector + ?Sized> LandmarkDetector for Arc<T> {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<LandmarkSet>, CapabilityError> {
        (**self).detect(gray)
    }
}

impl<T: SmileDetector + ?Sized> SmileDetector for Arc<T> {
    fn detect_smile(&self, gray: &GrayImage) -> Result<bool, CapabilityError> {
        (**self).detect_smile(gray)
    }
}

/// The initialised model handles used by every verification run.
///
/// Cheap to clone; clones share the same underlying providers.
#[derive(Clone)]
pub struct ModelSet {
    pub embedder: Arc<dyn FaceEmbeddingProvider>,
    pub landmarks: Arc<dyn LandmarkDetector>,
    pub smile: Arc<dyn SmileDetector>,
}

impl ModelSet {
    pub fn new(
        embedder: Arc<dyn FaceEmbeddingProvider>,
        landmarks: Arc<dyn LandmarkDetector>,
        smile: Arc<dyn SmileDetector>,
    ) -> Self {
        Self {
            embedder,
            landmarks,
            smile,
        }
    }
}

/// Smile detector that never fires, for deployments without a smile model.
pub struct NoSmileDetector;

impl SmileDetector for NoSmileDetector {
    fn detect_smile(&self, _gray: &GrayImage) -> Result<bool, CapabilityError> {
        Ok(false)
    }
}
