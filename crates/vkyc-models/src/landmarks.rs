//! 68-point facial landmarks via ONNX Runtime.
//!
//! Each SCRFD box is expanded to a square with a 10 % margin on every side,
//! cropped, resized to 256×256 and passed to the landmark model. The model
//! emits 68 (x, y) pairs normalised to the crop, which are mapped back into
//! frame coordinates and partitioned with the iBUG-68 layout.

use crate::detector::{FaceBox, ScrfdDetector};
use crate::error::ModelError;
use crate::session::load_session;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use vkyc_core::{CapabilityError, LandmarkDetector, LandmarkSet, Point};

const LANDMARK_INPUT_SIZE: u32 = 256;
const LANDMARK_MARGIN: f32 = 0.1;

/// Integer crop rectangle inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CropWindow {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

impl CropWindow {
    /// Square window around `face` with the margin applied, clamped to the
    /// frame. `None` when nothing of it lies inside the frame.
    fn around(face: &FaceBox, frame_width: u32, frame_height: u32) -> Option<Self> {
        let side = face.width.max(face.height) * (1.0 + 2.0 * LANDMARK_MARGIN);
        let cx = face.x + face.width / 2.0;
        let cy = face.y + face.height / 2.0;

        let x0 = (cx - side / 2.0).floor().max(0.0) as u32;
        let y0 = (cy - side / 2.0).floor().max(0.0) as u32;
        let x1 = ((cx + side / 2.0).ceil().max(0.0) as u32).min(frame_width);
        let y1 = ((cy + side / 2.0).ceil().max(0.0) as u32).min(frame_height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }

    /// Map a crop-normalised coordinate back into the frame.
    fn to_frame(&self, nx: f32, ny: f32) -> Point {
        Point::new(
            self.x as f32 + nx * self.width as f32,
            self.y as f32 + ny * self.height as f32,
        )
    }
}

/// Turn raw model output into a landmark set. `None` if the output is not 68 pairs.
fn landmarks_from_output(raw: &[f32], crop: &CropWindow) -> Option<LandmarkSet> {
    if raw.len() != LandmarkSet::IBUG68_LEN * 2 {
        return None;
    }
    let points: Vec<Point> = raw.chunks_exact(2).map(|p| crop.to_frame(p[0], p[1])).collect();
    LandmarkSet::from_ibug68(&points)
}

/// NHWC float tensor of raw 0-255 RGB values.
fn crop_tensor(frame: &RgbImage, crop: &CropWindow) -> Array4<f32> {
    let patch = imageops::crop_imm(frame, crop.x, crop.y, crop.width, crop.height).to_image();
    let resized = imageops::resize(&patch, LANDMARK_INPUT_SIZE, LANDMARK_INPUT_SIZE, FilterType::Triangle);
    let size = LANDMARK_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, size, size, 3));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, y as usize, x as usize, c]] = pixel[c] as f32;
        }
    }
    tensor
}

pub struct OnnxLandmarkDetector {
    detector: Arc<ScrfdDetector>,
    session: Mutex<Session>,
}

impl OnnxLandmarkDetector {
    pub fn load(model_path: &Path, detector: Arc<ScrfdDetector>) -> Result<Self, ModelError> {
        let session = load_session(model_path, "landmark")?;
        Ok(Self {
            detector,
            session: Mutex::new(session),
        })
    }

    fn landmarks_for(&self, frame: &RgbImage, crop: &CropWindow) -> Result<Option<LandmarkSet>, ModelError> {
        let input = crop_tensor(frame, crop);
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InferenceFailed(format!("landmark extraction: {e}")))?;
        Ok(landmarks_from_output(raw, crop))
    }
}

impl LandmarkDetector for OnnxLandmarkDetector {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<LandmarkSet>, CapabilityError> {
        let frame = DynamicImage::ImageLuma8(gray.clone()).into_rgb8();
        let faces = self.detector.detect(&frame)?;

        let mut sets = Vec::with_capacity(faces.len());
        for face in &faces {
            let Some(crop) = CropWindow::around(face, frame.width(), frame.height()) else {
                continue;
            };
            match self.landmarks_for(&frame, &crop)? {
                Some(set) => sets.push(set),
                None => tracing::debug!(?crop, "landmark output has unexpected shape"),
            }
        }
        Ok(sets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn face(x: f32, y: f32, w: f32, h: f32) -> FaceBox {
        FaceBox {
            x,
            y,
            width: w,
            height: h,
            confidence: 0.9,
            keypoints: None,
        }
    }

    #[test]
    fn test_crop_is_square_with_margin() {
        let crop = CropWindow::around(&face(100.0, 100.0, 80.0, 100.0), 640, 480).unwrap();
        // side ~ 100 * 1.2 = 120 centred on (140, 150); rounding may add a pixel
        assert!((79..=80).contains(&crop.x) && (89..=90).contains(&crop.y), "{crop:?}");
        assert!((120..=122).contains(&crop.width), "{crop:?}");
        assert!(crop.width.abs_diff(crop.height) <= 1, "{crop:?}");
    }

    #[test]
    fn test_crop_clamped_at_frame_edge() {
        let crop = CropWindow::around(&face(-20.0, 400.0, 100.0, 100.0), 640, 480).unwrap();
        assert_eq!(crop.x, 0);
        assert_eq!(crop.y + crop.height, 480);
        assert!(CropWindow::around(&face(900.0, 900.0, 10.0, 10.0), 640, 480).is_none());
    }

    #[test]
    fn test_output_mapping_into_frame() {
        let crop = CropWindow { x: 50, y: 20, width: 200, height: 100 };
        let mut raw = vec![0.5f32; 136];
        // point 36 (left eye outer corner) at the crop's top-left
        raw[72] = 0.0;
        raw[73] = 0.0;
        let set = landmarks_from_output(&raw, &crop).unwrap();
        assert_eq!(set.left_eye[0], Point::new(50.0, 20.0));
        assert_eq!(set.right_eye[0], Point::new(150.0, 70.0));
        assert!(landmarks_from_output(&raw[..10], &crop).is_none());
    }

    #[test]
    fn test_crop_tensor_layout() {
        let frame = RgbImage::from_pixel(64, 64, Rgb([10, 20, 30]));
        let crop = CropWindow { x: 8, y: 8, width: 32, height: 32 };
        let t = crop_tensor(&frame, &crop);
        assert_eq!(t.shape(), &[1, 256, 256, 3]);
        assert_eq!(t[[0, 100, 100, 0]], 10.0);
        assert_eq!(t[[0, 100, 100, 2]], 30.0);
    }
}
