//! Nonconformity Scoring
//!
//! Correct predictions score `1 - confidence/100`, so confident correct calls
//! get the lowest scores. Every incorrect prediction gets the ceiling score of
//! 1.0 regardless of confidence.

/// Score assigned to any incorrect prediction
pub const MAX_NONCONFORMITY: f64 = 1.0;

/// Pluggable scoring policy
pub trait NonconformityScorer: Send + Sync {
    /// Returns a score in [0, 1]
    fn score(&self, confidence_percent: f64, true_class: &str, predicted_class: &str) -> f64;
}

/// Default policy: `1 - c/100` on a match, ceiling on a mismatch
#[derive(Debug, Clone, Copy, Default)]
pub struct MismatchCeilingScorer;

impl NonconformityScorer for MismatchCeilingScorer {
    fn score(&self, confidence_percent: f64, true_class: &str, predicted_class: &str) -> f64 {
        score(confidence_percent, true_class, predicted_class)
    }
}

/// Clamp a percent confidence into [0, 100]; NaN counts as no confidence.
pub fn clamp_confidence(confidence_percent: f64) -> f64 {
    if confidence_percent.is_nan() {
        0.0
    } else {
        confidence_percent.clamp(0.0, 100.0)
    }
}

pub fn score(confidence_percent: f64, true_class: &str, predicted_class: &str) -> f64 {
    if true_class == predicted_class {
        1.0 - clamp_confidence(confidence_percent) / 100.0
    } else {
        MAX_NONCONFORMITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_correct_prediction_score() {
        for c in [0.0, 12.5, 40.0, 90.0, 100.0] {
            assert_relative_eq!(score(c, "A", "A"), 1.0 - c / 100.0);
        }
    }

    #[test]
    fn test_incorrect_prediction_hits_ceiling() {
        for c in [0.0, 40.0, 99.9, 100.0] {
            assert_eq!(score(c, "A", "B"), MAX_NONCONFORMITY);
        }
    }

    #[test]
    fn test_higher_confidence_scores_lower_when_correct() {
        assert!(score(95.0, "A", "A") < score(60.0, "A", "A"));
    }

    #[test]
    fn test_out_of_range_confidence_is_clamped() {
        assert_eq!(score(150.0, "A", "A"), 0.0);
        assert_eq!(score(-20.0, "A", "A"), 1.0);
        assert_eq!(score(f64::NAN, "A", "A"), 1.0);
    }

    #[test]
    fn test_trait_matches_free_function() {
        let scorer = MismatchCeilingScorer;
        assert_eq!(scorer.score(70.0, "x", "x"), score(70.0, "x", "x"));
        assert_eq!(scorer.score(70.0, "x", "y"), 1.0);
    }
}
