//! Smile classification from landmark geometry.
//!
//! A smile widens the mouth relative to the face: the detector fires when
//! the mouth-corner distance reaches `smile_ratio` of the jaw width.

use image::GrayImage;
use std::sync::Arc;
use vkyc_core::{CapabilityError, LandmarkDetector, LandmarkSet, SmileDetector};

/// Default mouth-width / jaw-width ratio at which a face counts as smiling.
pub const DEFAULT_SMILE_RATIO: f32 = 0.45;

/// Mouth width over jaw width, if both regions are present and the jaw is non-degenerate.
pub fn mouth_to_jaw_ratio(face: &LandmarkSet) -> Option<f32> {
    let [mouth_l, mouth_r] = face.mouth_corners?;
    let [jaw_l, jaw_r] = face.jaw_span?;
    let jaw = jaw_l.distance(&jaw_r);
    (jaw > 0.0).then(|| mouth_l.distance(&mouth_r) / jaw)
}

pub struct LandmarkSmileDetector {
    landmarks: Arc<dyn LandmarkDetector>,
    smile_ratio: f32,
}

impl LandmarkSmileDetector {
    pub fn new(landmarks: Arc<dyn LandmarkDetector>, smile_ratio: f32) -> Self {
        Self {
            landmarks,
            smile_ratio,
        }
    }

    /// Whether any of the given faces is smiling.
    pub fn any_smiling(&self, faces: &[LandmarkSet]) -> bool {
        faces
            .iter()
            .filter_map(mouth_to_jaw_ratio)
            .any(|ratio| ratio >= self.smile_ratio)
    }
}

impl SmileDetector for LandmarkSmileDetector {
    fn detect_smile(&self, gray: &GrayImage) -> Result<bool, CapabilityError> {
        let faces = self.landmarks.detect(gray)?;
        Ok(self.any_smiling(&faces))
    }
}
