//! Quantiles, conformal thresholds and prediction sets.

use serde::{Deserialize, Serialize};

use crate::error::{CalibrationError, CalibrationResult};

/// Minimum stratum size below which a quantile is flagged as low confidence
pub const DEFAULT_MIN_STRATUM_SAMPLES: usize = 30;

/// Result of a quantile query over one stratum
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantileEstimate {
    /// Nonconformity score at the requested quantile
    pub value: f64,
    /// Number of points in the stratum
    pub sample_size: usize,
    /// True when the stratum has fewer points than the configured minimum
    pub low_confidence: bool,
}

pub fn check_quantile(q: f64) -> CalibrationResult<()> {
    if (0.0..=1.0).contains(&q) {
        Ok(())
    } else {
        Err(CalibrationError::InvalidParameter(format!(
            "quantile must be in [0, 1], got {}",
            q
        )))
    }
}

pub fn check_alpha(alpha: f64) -> CalibrationResult<()> {
    if alpha > 0.0 && alpha < 1.0 {
        Ok(())
    } else {
        Err(CalibrationError::InvalidParameter(format!(
            "alpha must be in (0, 1), got {}",
            alpha
        )))
    }
}

/// Weighted order statistic over `(score, weight)` pairs.
///
/// Returns the smallest score whose cumulative weight reaches `q` of the total.
/// With unit weights this is the nearest-rank quantile. Returns None for empty
/// input.
pub fn weighted_quantile(samples: &[(f64, f64)], q: f64) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }

    let mut sorted: Vec<(f64, f64)> = samples.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    let total: f64 = sorted.iter().map(|(_, w)| w).sum();
    let target = q * total;

    let mut cumulative = 0.0;
    for &(score, weight) in &sorted {
        cumulative += weight;
        if cumulative >= target {
            return Some(score);
        }
    }

    // Float drift can leave the running sum a hair short of the total
    sorted.last().map(|(score, _)| *score)
}

/// Classes whose nonconformity `1 - p` falls within the threshold, most
/// probable first.
pub fn prediction_set(class_probabilities: &[(String, f64)], threshold: f64) -> Vec<String> {
    let mut members: Vec<&(String, f64)> = class_probabilities
        .iter()
        .filter(|(_, p)| 1.0 - p <= threshold)
        .collect();
    members.sort_by(|a, b| b.1.total_cmp(&a.1));
    members.into_iter().map(|(class, _)| class.clone()).collect()
}
