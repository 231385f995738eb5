//! Reference-vs-frame face match scoring.
//!
//! The scorer keeps only the best similarity seen. Because `max` is
//! associative and commutative, partial accumulators built on different
//! threads can be merged in any order.

use crate::capability::FaceEmbeddingProvider;
use crate::types::FaceEncoding;
use serde::{Deserialize, Serialize};

/// Default similarity at or above which a run is labelled "Match".
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.5;

/// Best similarity observed so far, in [0, 1]. Never decreases.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MatchAccumulator {
    pub best_score: f32,
    /// Frames that contributed an encoding.
    pub frames_scored: u32,
}

impl MatchAccumulator {
    pub fn record(&mut self, score: f32) {
        self.frames_scored += 1;
        if score > self.best_score {
            self.best_score = score;
        }
    }

    /// Combine two partial accumulators.
    pub fn merge(self, other: MatchAccumulator) -> MatchAccumulator {
        MatchAccumulator {
            best_score: self.best_score.max(other.best_score),
            frames_scored: self.frames_scored + other.frames_scored,
        }
    }
}

/// Similarity for a distance, clamped to [0, 1] and rounded to three decimals.
pub fn similarity_from_distance(distance: f32) -> f32 {
    let score = (1.0 - distance).clamp(0.0, 1.0);
    (score * 1000.0).round() / 1000.0
}

/// Scores per-frame encodings against the document photo's encoding.
pub struct MatchScorer<'a> {
    provider: &'a dyn FaceEmbeddingProvider,
    reference: &'a FaceEncoding,
    acc: MatchAccumulator,
}

impl<'a> MatchScorer<'a> {
    pub fn new(provider: &'a dyn FaceEmbeddingProvider, reference: &'a FaceEncoding) -> Self {
        Self {
            provider,
            reference,
            acc: MatchAccumulator::default(),
        }
    }

    /// Similarity of one frame encoding to the reference.
    pub fn score(&self, encoding: &FaceEncoding) -> f32 {
        similarity_from_distance(self.provider.distance(self.reference, encoding))
    }

    /// Feed one frame's encoding. `None` (no face) contributes nothing.
    pub fn observe(&mut self, encoding: Option<&FaceEncoding>) {
        if let Some(enc) = encoding {
            let score = self.score(enc);
            self.acc.record(score);
        }
    }

    pub fn absorb(&mut self, partial: MatchAccumulator) {
        self.acc = self.acc.merge(partial);
    }

    pub fn accumulator(&self) -> MatchAccumulator {
        self.acc
    }

    pub fn finish(self) -> MatchAccumulator {
        self.acc
    }
}
