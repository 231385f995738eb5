//! End-to-end verification run over a reference image and a frame source.
//!
//! Liveness runs strictly in stream order on the calling thread. Match
//! scoring and smile classification are independent per frame, so with
//! `parallel_scoring` enabled frames are buffered into batches and scored
//! on the rayon pool, then folded into the run's accumulators with an
//! order-independent max/or.

use crate::capability::ModelSet;
use crate::decision;
use crate::liveness::{LivenessAnalyzer, DEFAULT_EAR_THRESHOLD};
use crate::matcher::{MatchAccumulator, MatchScorer, DEFAULT_MATCH_THRESHOLD};
use crate::source::{FrameError, FrameSource};
use crate::types::{FailureKind, VerificationResult, VideoFrame};
use image::{GrayImage, RgbImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use uuid::Uuid;

/// Default cap on frames pulled from a source per run.
pub const DEFAULT_MAX_FRAMES: usize = 150;

/// Default number of frames scored together when `parallel_scoring` is on.
pub const DEFAULT_BATCH_SIZE: usize = 16;

/// Per-run tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyOptions {
    pub max_frames: usize,
    pub ear_threshold: f32,
    pub match_threshold: f32,
    pub parallel_scoring: bool,
    pub batch_size: usize,
    /// Stop requesting frames at this instant and report `timed_out`.
    #[serde(skip)]
    pub deadline: Option<Instant>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            max_frames: DEFAULT_MAX_FRAMES,
            ear_threshold: DEFAULT_EAR_THRESHOLD,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            parallel_scoring: true,
            batch_size: DEFAULT_BATCH_SIZE,
            deadline: None,
        }
    }
}

/// Match and smile signals from one or more frames.
#[derive(Debug, Clone, Copy, Default)]
struct FrameSignals {
    matched: MatchAccumulator,
    smile: bool,
}

impl FrameSignals {
    fn merge(self, other: FrameSignals) -> FrameSignals {
        FrameSignals {
            matched: self.matched.merge(other.matched),
            smile: self.smile || other.smile,
        }
    }
}

fn frame_signals(
    models: &ModelSet,
    scorer: &MatchScorer<'_>,
    frame: &VideoFrame,
    gray: &GrayImage,
) -> FrameSignals {
    let mut signals = FrameSignals::default();

    match models.embedder.encode(&frame.image) {
        Ok(Some(encoding)) => signals.matched.record(scorer.score(&encoding)),
        Ok(None) => {}
        Err(e) => tracing::debug!(frame = frame.index, error = %e, "embedding skipped"),
    }

    match models.smile.detect_smile(gray) {
        Ok(smile) => signals.smile = smile,
        Err(e) => tracing::debug!(frame = frame.index, error = %e, "smile check skipped"),
    }

    signals
}

fn score_batch(
    models: &ModelSet,
    scorer: &MatchScorer<'_>,
    batch: &[(VideoFrame, GrayImage)],
) -> FrameSignals {
    batch
        .par_iter()
        .map(|(frame, gray)| frame_signals(models, scorer, frame, gray))
        .reduce(FrameSignals::default, FrameSignals::merge)
}

/// Text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run one verification.
///
/// `open_source` is only called once the reference has produced an encoding,
/// so a document photo without a face never touches the video. Never returns
/// an error: every failure is folded into the returned result, including a
/// panic inside a capability provider.
pub fn run_face_verification<S, F>(
    models: &ModelSet,
    reference: &RgbImage,
    open_source: F,
    options: &VerifyOptions,
) -> VerificationResult
where
    S: FrameSource,
    F: FnOnce() -> Result<S, FrameError>,
{
    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("verify", run_id = %run_id);
    let _enter = span.enter();

    // The run's accumulators die with the unwind; providers are shared
    // read-only and guard their own state.
    panic::catch_unwind(AssertUnwindSafe(|| run(models, reference, open_source, options)))
        .unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            tracing::error!(panic = %message, "verification panicked");
            VerificationResult::error(
                FailureKind::Internal,
                format!("verification panicked: {message}"),
            )
        })
}

fn run<S, F>(
    models: &ModelSet,
    reference: &RgbImage,
    open_source: F,
    options: &VerifyOptions,
) -> VerificationResult
where
    S: FrameSource,
    F: FnOnce() -> Result<S, FrameError>,
{
    let start = Instant::now();

    let reference_encoding = match models.embedder.encode(reference) {
        Ok(Some(encoding)) => encoding,
        Ok(None) => {
            tracing::warn!("no face in reference image");
            return VerificationResult::no_face_in_reference();
        }
        Err(e) => {
            tracing::warn!(error = %e, "reference encoding failed");
            return VerificationResult::error(
                FailureKind::Internal,
                format!("reference encoding failed: {e}"),
            );
        }
    };

    let mut source = match open_source() {
        Ok(source) => source,
        Err(e) => {
            tracing::warn!(error = %e, "frame source unavailable");
            return VerificationResult::error(FailureKind::StreamOpen, e.to_string());
        }
    };

    let mut liveness = LivenessAnalyzer::new(options.ear_threshold);
    let mut scorer = MatchScorer::new(models.embedder.as_ref(), &reference_encoding);
    let mut smile = false;
    let mut frames_processed = 0usize;
    let batch_size = options.batch_size.max(1);
    let mut pending: Vec<(VideoFrame, GrayImage)> = Vec::with_capacity(batch_size);

    while frames_processed < options.max_frames {
        if options.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            tracing::warn!(frames_processed, "deadline reached; stopping");
            let mut result = VerificationResult::error(
                FailureKind::TimedOut,
                format!("verification timed out after {frames_processed} frames"),
            );
            result.frames_processed = frames_processed;
            return result;
        }
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) if e.is_transient() => {
                frames_processed += 1;
                tracing::debug!(error = %e, "frame skipped");
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, frames_processed, "frame source failed mid-run");
                let mut result = VerificationResult::error(FailureKind::StreamBroken, e.to_string());
                result.frames_processed = frames_processed;
                return result;
            }
        };
        frames_processed += 1;

        let gray = frame.to_gray();
        match models.landmarks.detect(&gray) {
            Ok(faces) => liveness.observe_frame(&faces),
            Err(e) => tracing::debug!(frame = frame.index, error = %e, "landmarks skipped"),
        }

        if options.parallel_scoring {
            pending.push((frame, gray));
            if pending.len() >= batch_size {
                let signals = score_batch(models, &scorer, &pending);
                scorer.absorb(signals.matched);
                smile |= signals.smile;
                pending.clear();
            }
        } else {
            let signals = frame_signals(models, &scorer, &frame, &gray);
            scorer.absorb(signals.matched);
            smile |= signals.smile;
        }
    }

    if !pending.is_empty() {
        let signals = score_batch(models, &scorer, &pending);
        scorer.absorb(signals.matched);
        smile |= signals.smile;
    }
    drop(source);

    let live = liveness.finish();
    let matched = scorer.finish();
    let result = decision::aggregate(&live, &matched, smile, options.match_threshold, frames_processed);

    tracing::info!(
        frames_processed,
        frames_scored = matched.frames_scored,
        score = result.score,
        blinks = result.blinks,
        match_label = %result.match_label,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "verification complete"
    );
    result
}
