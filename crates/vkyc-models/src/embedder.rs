//! ArcFace face embeddings via ONNX Runtime.
//!
//! The most confident SCRFD detection is aligned to 112×112 and encoded
//! into a 512-d, L2-normalised vector (w600k_r50).

use crate::alignment::{self, ALIGNED_SIZE};
use crate::detector::ScrfdDetector;
use crate::error::ModelError;
use crate::session::load_session;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use vkyc_core::{CapabilityError, FaceEmbeddingProvider, FaceEncoding};

const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

pub struct ArcFaceEmbedder {
    detector: Arc<ScrfdDetector>,
    session: Mutex<Session>,
}

impl ArcFaceEmbedder {
    pub fn load(model_path: &Path, detector: Arc<ScrfdDetector>) -> Result<Self, ModelError> {
        let session = load_session(model_path, "ArcFace")?;
        Ok(Self {
            detector,
            session: Mutex::new(session),
        })
    }

    fn embed_aligned(&self, aligned: &RgbImage) -> Result<Vec<f32>, ModelError> {
        let input = to_tensor(aligned);
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(ModelError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }
        Ok(l2_normalize(raw))
    }
}

impl FaceEmbeddingProvider for ArcFaceEmbedder {
    fn encode(&self, image: &RgbImage) -> Result<Option<FaceEncoding>, CapabilityError> {
        let faces = self.detector.detect(image)?;
        let Some(keypoints) = faces.first().and_then(|f| f.keypoints) else {
            return Ok(None);
        };

        let aligned = alignment::align_face(image, &keypoints);
        let values = self.embed_aligned(&aligned)?;
        Ok(Some(FaceEncoding {
            values,
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        }))
    }

    /// Cosine distance, the metric ArcFace is trained for.
    fn distance(&self, a: &FaceEncoding, b: &FaceEncoding) -> f32 {
        1.0 - a.cosine_similarity(b)
    }
}

fn to_tensor(aligned: &RgbImage) -> Array4<f32> {
    let size = ALIGNED_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in aligned.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|v| v / norm).collect()
    } else {
        raw.to_vec()
    }
}
