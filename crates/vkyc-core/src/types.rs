use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 2D point in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Six-point eye contour: `[outer corner, top-1, top-2, inner corner, bottom-2, bottom-1]`.
///
/// Index layout follows the iBUG-68 convention, so `p1/p5` and `p2/p4` are the
/// vertical eyelid pairs and `p0/p3` the horizontal corners.
pub type EyeContour = [Point; 6];

/// Facial landmarks for one detected face, partitioned into named regions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    pub left_eye: EyeContour,
    pub right_eye: EyeContour,
    /// Left and right mouth corners, when the detector provides them.
    pub mouth_corners: Option<[Point; 2]>,
    /// Outermost jaw points (left, right), when the detector provides them.
    pub jaw_span: Option<[Point; 2]>,
}

impl LandmarkSet {
    /// Number of points in the iBUG-68 layout.
    pub const IBUG68_LEN: usize = 68;

    /// Landmark set with only the eye regions populated.
    pub fn from_eyes(left_eye: EyeContour, right_eye: EyeContour) -> Self {
        Self {
            left_eye,
            right_eye,
            mouth_corners: None,
            jaw_span: None,
        }
    }

    /// Partition a 68-point iBUG landmark array into named regions.
    ///
    /// Returns `None` if the slice does not hold exactly 68 points.
    pub fn from_ibug68(points: &[Point]) -> Option<Self> {
        if points.len() != Self::IBUG68_LEN {
            return None;
        }
        let eye = |start: usize| -> EyeContour { std::array::from_fn(|i| points[start + i]) };
        Some(Self {
            left_eye: eye(36),
            right_eye: eye(42),
            mouth_corners: Some([points[48], points[54]]),
            jaw_span: Some([points[0], points[16]]),
        })
    }
}

/// Mean position of an eye contour.
pub fn eye_center(eye: &EyeContour) -> Point {
    let (sx, sy) = eye.iter().fold((0.0f32, 0.0f32), |(sx, sy), p| (sx + p.x, sy + p.y));
    Point::new(sx / eye.len() as f32, sy / eye.len() as f32)
}

/// Fixed-length face embedding produced by a [`FaceEmbeddingProvider`](crate::FaceEmbeddingProvider).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceEncoding {
    pub values: Vec<f32>,
    /// Model that produced this encoding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl FaceEncoding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Euclidean distance between two encodings.
    pub fn euclidean_distance(&self, other: &FaceEncoding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Cosine similarity in [-1, 1]; 0.0 when either vector is all zeros.
    pub fn cosine_similarity(&self, other: &FaceEncoding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;
        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }
        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }
}

/// One decoded video frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Zero-based position in the source stream.
    pub index: usize,
    pub image: RgbImage,
}

impl VideoFrame {
    pub fn new(index: usize, image: RgbImage) -> Self {
        Self { index, image }
    }

    /// Luma conversion used by the landmark and smile detectors.
    pub fn to_gray(&self) -> GrayImage {
        image::imageops::grayscale(&self.image)
    }
}

/// Eye state tracked by the blink state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlinkState {
    #[default]
    Open,
    Closed,
}

/// Verdict of the reference-vs-video face comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchLabel {
    #[serde(rename = "Match")]
    Match,
    #[serde(rename = "No Match")]
    NoMatch,
    #[serde(rename = "Error")]
    Error,
}

impl MatchLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchLabel::Match => "Match",
            MatchLabel::NoMatch => "No Match",
            MatchLabel::Error => "Error",
        }
    }
}

impl fmt::Display for MatchLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run did not produce an ordinary verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The document photo contains no detectable face.
    NoFaceInReference,
    /// The document photo could not be read or decoded.
    ReferenceUnreadable,
    /// The video could not be opened.
    StreamOpen,
    /// The decoder failed part-way through the video.
    StreamBroken,
    /// The run reached its deadline before the source was finished.
    TimedOut,
    /// Any other internal failure.
    Internal,
}

/// Outcome of one verification run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub match_label: MatchLabel,
    /// Best per-frame similarity, in [0, 1].
    pub score: f32,
    pub liveness_label: String,
    pub blinks: u32,
    /// Largest absolute head tilt observed, in degrees.
    pub max_angle: f32,
    pub smile: bool,
    /// Frames pulled from the source, including skipped ones.
    pub frames_processed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerificationResult {
    /// Zero-valued result carrying an error message.
    pub fn error(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            match_label: MatchLabel::Error,
            score: 0.0,
            liveness_label: "Error".to_string(),
            blinks: 0,
            max_angle: 0.0,
            smile: false,
            frames_processed: 0,
            failure: Some(kind),
            error: Some(message.into()),
        }
    }

    /// Result for a document photo without a usable face. No frames are examined.
    pub fn no_face_in_reference() -> Self {
        Self {
            match_label: MatchLabel::NoMatch,
            score: 0.0,
            liveness_label: crate::decision::liveness_label(0),
            blinks: 0,
            max_angle: 0.0,
            smile: false,
            frames_processed: 0,
            failure: Some(FailureKind::NoFaceInReference),
            error: Some("No face in reference image".to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.match_label == MatchLabel::Error
    }

    /// "Yes"/"No" rendering used in reports.
    pub fn smile_text(&self) -> &'static str {
        if self.smile {
            "Yes"
        } else {
            "No"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance() {
        let a = FaceEncoding::new(vec![0.0, 0.0]);
        let b = FaceEncoding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = FaceEncoding::new(vec![1.0, 0.0, 0.0]);
        assert!((a.cosine_similarity(&a.clone()) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = FaceEncoding::new(vec![0.0, 0.0]);
        let b = FaceEncoding::new(vec![1.0, 0.0]);
        assert_eq!(a.cosine_similarity(&b), 0.0);
    }

    #[test]
    fn test_from_ibug68_partitions_regions() {
        let points: Vec<Point> = (0..68).map(|i| Point::new(i as f32, 0.0)).collect();
        let set = LandmarkSet::from_ibug68(&points).unwrap();
        assert_eq!(set.left_eye[0].x, 36.0);
        assert_eq!(set.left_eye[5].x, 41.0);
        assert_eq!(set.right_eye[0].x, 42.0);
        assert_eq!(set.right_eye[5].x, 47.0);
        assert_eq!(set.mouth_corners.unwrap()[1].x, 54.0);
        assert_eq!(set.jaw_span.unwrap()[1].x, 16.0);
    }

    #[test]
    fn test_from_ibug68_rejects_wrong_length() {
        let points = vec![Point::default(); 5];
        assert!(LandmarkSet::from_ibug68(&points).is_none());
    }

    #[test]
    fn test_eye_center() {
        let eye = [
            Point::new(0.0, 0.0),
            Point::new(1.0, -1.0),
            Point::new(2.0, -1.0),
            Point::new(3.0, 0.0),
            Point::new(2.0, 1.0),
            Point::new(1.0, 1.0),
        ];
        let c = eye_center(&eye);
        assert!((c.x - 1.5).abs() < 1e-6);
        assert!(c.y.abs() < 1e-6);
    }

    #[test]
    fn test_match_label_serializes_with_spaces() {
        let json = serde_json::to_string(&MatchLabel::NoMatch).unwrap();
        assert_eq!(json, "\"No Match\"");
        assert_eq!(MatchLabel::Match.to_string(), "Match");
    }

    #[test]
    fn test_error_result_is_zeroed() {
        let r = VerificationResult::error(FailureKind::StreamOpen, "cannot open");
        assert!(r.is_error());
        assert_eq!(r.score, 0.0);
        assert_eq!(r.blinks, 0);
        assert_eq!(r.liveness_label, "Error");
        assert_eq!(r.error.as_deref(), Some("cannot open"));
    }
}
