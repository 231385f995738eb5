//! vkyc-core — Biometric decision engine for document-to-video KYC.
//!
//! Blink/head-pose liveness, reference face match scoring, verdict
//! aggregation and the risk-based re-KYC policy. Models and video decoding
//! are injected through the traits in [`capability`] and [`source`].

pub mod capability;
pub mod decision;
pub mod liveness;
pub mod matcher;
pub mod pipeline;
pub mod revalidation;
pub mod source;
pub mod types;

pub use capability::{
    CapabilityError, FaceEmbeddingProvider, LandmarkDetector, ModelSet, NoSmileDetector,
    SmileDetector,
};
pub use liveness::{LivenessAccumulator, LivenessAnalyzer};
pub use matcher::{MatchAccumulator, MatchScorer};
pub use pipeline::{panic_message, run_face_verification, VerifyOptions};
pub use revalidation::{
    check_revalidation, KycRecord, RevalidationState, RevalidationStatus, RiskCategory,
};
pub use source::{FrameError, FrameSource, VecFrameSource};
pub use types::{
    FaceEncoding, FailureKind, LandmarkSet, MatchLabel, Point, VerificationResult, VideoFrame,
};
