//! vkyc-models — ONNX capability providers for the vkyc engine.
//!
//! SCRFD locates faces, ArcFace embeds them and a 68-point landmark model
//! feeds the blink, head-pose and smile signals. All providers share one
//! detector and guard their sessions internally, so a [`ModelSet`] built by
//! [`load_models`] can be used from any number of threads.

pub mod alignment;
pub mod detector;
pub mod embedder;
pub mod error;
pub mod landmarks;
mod session;
pub mod smile;

pub use detector::{FaceBox, ScrfdDetector};
pub use embedder::ArcFaceEmbedder;
pub use error::ModelError;
pub use landmarks::OnnxLandmarkDetector;
pub use smile::{LandmarkSmileDetector, DEFAULT_SMILE_RATIO};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use vkyc_core::{LandmarkDetector, ModelSet};

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const EMBEDDER_MODEL_FILE: &str = "w600k_r50.onnx";
pub const LANDMARK_MODEL_FILE: &str = "face_landmarks.onnx";

/// Default model directory: `$XDG_DATA_HOME/vkyc/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("vkyc/models")
}

/// Load every model from `model_dir` once and bundle the providers.
pub fn load_models(model_dir: &Path, smile_ratio: f32) -> Result<ModelSet, ModelError> {
    let detector = Arc::new(ScrfdDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?);
    let embedder = ArcFaceEmbedder::load(&model_dir.join(EMBEDDER_MODEL_FILE), detector.clone())?;
    let landmarks: Arc<dyn LandmarkDetector> = Arc::new(OnnxLandmarkDetector::load(
        &model_dir.join(LANDMARK_MODEL_FILE),
        detector,
    )?);
    let smile = LandmarkSmileDetector::new(landmarks.clone(), smile_ratio);

    tracing::info!(dir = %model_dir.display(), smile_ratio, "models loaded");
    Ok(ModelSet::new(Arc::new(embedder), landmarks, Arc::new(smile)))
}
