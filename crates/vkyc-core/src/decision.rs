//! Turns completed accumulators into a [`VerificationResult`].

use crate::liveness::LivenessAccumulator;
use crate::matcher::MatchAccumulator;
use crate::types::{MatchLabel, VerificationResult};

/// "Match" when `score >= threshold` (boundary inclusive), else "No Match".
pub fn match_label(score: f32, threshold: f32) -> MatchLabel {
    if score >= threshold {
        MatchLabel::Match
    } else {
        MatchLabel::NoMatch
    }
}

/// "Passed (n blinks)" with at least one blink, else "Failed (n blinks)".
pub fn liveness_label(blinks: u32) -> String {
    if blinks >= 1 {
        format!("Passed ({blinks} blinks)")
    } else {
        format!("Failed ({blinks} blinks)")
    }
}

/// Combine liveness and match signals. `smile` is carried through as
/// metadata and never changes either label.
pub fn aggregate(
    liveness: &LivenessAccumulator,
    matched: &MatchAccumulator,
    smile: bool,
    match_threshold: f32,
    frames_processed: usize,
) -> VerificationResult {
    VerificationResult {
        match_label: match_label(matched.best_score, match_threshold),
        score: matched.best_score,
        liveness_label: liveness_label(liveness.blink_count),
        blinks: liveness.blink_count,
        max_angle: liveness.max_head_angle,
        smile,
        frames_processed,
        failure: None,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlinkState;

    fn liveness(blinks: u32, angle: f32) -> LivenessAccumulator {
        LivenessAccumulator {
            blink_count: blinks,
            max_head_angle: angle,
            state: BlinkState::Open,
        }
    }

    fn matched(score: f32) -> MatchAccumulator {
        MatchAccumulator { best_score: score, frames_scored: 1 }
    }

    #[test]
    fn test_match_boundary_inclusive() {
        assert_eq!(match_label(0.5, 0.5), MatchLabel::Match);
        assert_eq!(match_label(0.499, 0.5), MatchLabel::NoMatch);
        assert_eq!(match_label(0.0, 0.5), MatchLabel::NoMatch);
        assert_eq!(match_label(1.0, 0.5), MatchLabel::Match);
    }

    #[test]
    fn test_match_label_over_score_grid() {
        for i in 0..=1000 {
            let s = i as f32 / 1000.0;
            let expected = if s >= 0.5 { MatchLabel::Match } else { MatchLabel::NoMatch };
            assert_eq!(match_label(s, 0.5), expected, "score {s}");
        }
    }

    #[test]
    fn test_liveness_labels() {
        assert_eq!(liveness_label(0), "Failed (0 blinks)");
        assert_eq!(liveness_label(1), "Passed (1 blinks)");
        assert_eq!(liveness_label(4), "Passed (4 blinks)");
    }

    #[test]
    fn test_aggregate_match() {
        let r = aggregate(&liveness(2, 7.5), &matched(0.62), false, 0.5, 150);
        assert_eq!(r.match_label, MatchLabel::Match);
        assert!((r.score - 0.62).abs() < 1e-6);
        assert_eq!(r.liveness_label, "Passed (2 blinks)");
        assert_eq!(r.blinks, 2);
        assert!((r.max_angle - 7.5).abs() < 1e-6);
        assert_eq!(r.frames_processed, 150);
        assert!(r.error.is_none());
        assert!(r.failure.is_none());
    }

    #[test]
    fn test_smile_never_changes_labels() {
        for smile in [false, true] {
            let r = aggregate(&liveness(0, 0.0), &matched(0.3), smile, 0.5, 10);
            assert_eq!(r.match_label, MatchLabel::NoMatch);
            assert_eq!(r.liveness_label, "Failed (0 blinks)");
            assert_eq!(r.smile, smile);
        }
    }

    #[test]
    fn test_custom_threshold() {
        let r = aggregate(&liveness(1, 0.0), &matched(0.6), false, 0.7, 1);
        assert_eq!(r.match_label, MatchLabel::NoMatch);
    }
}
