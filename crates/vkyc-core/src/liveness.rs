//! Active liveness detection via blink counting and head tilt tracking.
//!
//! Each frame's landmark sets feed a two-state blink machine driven by the
//! eye aspect ratio (EAR): the ratio of the two vertical eyelid distances to
//! the horizontal eye width. An open eye sits around 0.25–0.35; a closed eye
//! drops well below 0.2. A blink is counted on the OPEN→CLOSED edge only.
//!
//! Alongside blinks, the analyzer keeps a running maximum of the absolute
//! head roll, measured as the angle of the line joining both eye centres.
//!
//! # Threat Coverage
//!
//! - **Blocks:** Printed photographs and still images held to the camera
//!   (no eyelid movement).
//! - **Does not block:** Video replays of a blinking subject.
//!
//! The state machine is order-dependent. Frames must be observed in stream
//! order by a single analyzer; it is never shared between runs.

use crate::types::{eye_center, BlinkState, EyeContour, LandmarkSet};
use serde::{Deserialize, Serialize};

/// Default EAR below which an eye counts as closed.
pub const DEFAULT_EAR_THRESHOLD: f32 = 0.21;

/// Per-run liveness signals.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LivenessAccumulator {
    pub blink_count: u32,
    /// Running maximum of |head tilt| in degrees.
    pub max_head_angle: f32,
    pub state: BlinkState,
}

/// Eye aspect ratio for a six-point eye contour.
///
/// `EAR = (|p1-p5| + |p2-p4|) / (2 * |p0-p3|)`. A degenerate contour with zero
/// width yields 0.0.
pub fn eye_aspect_ratio(eye: &EyeContour) -> f32 {
    let a = eye[1].distance(&eye[5]);
    let b = eye[2].distance(&eye[4]);
    let c = eye[0].distance(&eye[3]);
    if c > 0.0 {
        (a + b) / (2.0 * c)
    } else {
        0.0
    }
}

/// Mean EAR of both eyes.
pub fn average_ear(face: &LandmarkSet) -> f32 {
    (eye_aspect_ratio(&face.left_eye) + eye_aspect_ratio(&face.right_eye)) / 2.0
}

/// Head roll in degrees: the slope of the line from the left eye centre to
/// the right eye centre, rounded to two decimals.
pub fn head_tilt_degrees(face: &LandmarkSet) -> f32 {
    let left = eye_center(&face.left_eye);
    let right = eye_center(&face.right_eye);
    let angle = (right.y - left.y).atan2(right.x - left.x).to_degrees();
    (angle * 100.0).round() / 100.0
}

/// Sequential blink and head-pose tracker for a single verification run.
#[derive(Debug, Clone)]
pub struct LivenessAnalyzer {
    ear_threshold: f32,
    acc: LivenessAccumulator,
}

impl LivenessAnalyzer {
    pub fn new(ear_threshold: f32) -> Self {
        Self {
            ear_threshold,
            acc: LivenessAccumulator::default(),
        }
    }

    /// Feed all faces detected in one frame, in detection order.
    ///
    /// An empty slice (no face in the frame) leaves the state untouched.
    pub fn observe_frame(&mut self, faces: &[LandmarkSet]) {
        for face in faces {
            self.observe_face(face);
        }
    }

    /// Feed a single face.
    pub fn observe_face(&mut self, face: &LandmarkSet) {
        self.step_ear(average_ear(face));
        let tilt = head_tilt_degrees(face).abs();
        if tilt > self.acc.max_head_angle {
            self.acc.max_head_angle = tilt;
        }
    }

    /// Advance the blink state machine with one averaged EAR sample.
    pub fn step_ear(&mut self, ear: f32) {
        match self.acc.state {
            BlinkState::Open if ear < self.ear_threshold => {
                self.acc.blink_count += 1;
                self.acc.state = BlinkState::Closed;
            }
            BlinkState::Closed if ear >= self.ear_threshold => {
                self.acc.state = BlinkState::Open;
            }
            _ => {}
        }
    }

    /// Snapshot of the current signals.
    pub fn accumulator(&self) -> LivenessAccumulator {
        self.acc
    }

    pub fn finish(self) -> LivenessAccumulator {
        self.acc
    }
}

impl Default for LivenessAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_EAR_THRESHOLD)
    }
}
