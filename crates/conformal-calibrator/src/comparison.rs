//! Model Version Comparison
//!
//! A/B comparison of two calibration stores, stratum by stratum. At a fixed
//! alpha a lower conformal threshold means tighter prediction sets for the
//! same coverage, so a lower candidate threshold counts as an improvement.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write;

use crate::error::CalibrationResult;
use crate::quantile::{check_alpha, weighted_quantile};
use crate::report::top_strata;
use crate::store::CalibrationStore;

const THRESHOLD_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonVerdict {
    Improved,
    Regressed,
    Unchanged,
    /// One side has no points for the stratum
    Incomparable,
}

impl ComparisonVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonVerdict::Improved => "improved",
            ComparisonVerdict::Regressed => "regressed",
            ComparisonVerdict::Unchanged => "unchanged",
            ComparisonVerdict::Incomparable => "incomparable",
        }
    }

    fn from_thresholds(baseline: Option<f64>, candidate: Option<f64>) -> Self {
        match (baseline, candidate) {
            (Some(b), Some(c)) if c < b - THRESHOLD_TOLERANCE => ComparisonVerdict::Improved,
            (Some(b), Some(c)) if c > b + THRESHOLD_TOLERANCE => ComparisonVerdict::Regressed,
            (Some(_), Some(_)) => ComparisonVerdict::Unchanged,
            _ => ComparisonVerdict::Incomparable,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratumComparison {
    pub stratum: String,
    pub baseline_samples: usize,
    pub candidate_samples: usize,
    pub baseline_threshold: Option<f64>,
    pub candidate_threshold: Option<f64>,
    pub baseline_mean_score: Option<f64>,
    pub candidate_mean_score: Option<f64>,
    /// candidate - baseline threshold
    pub delta: Option<f64>,
    pub verdict: ComparisonVerdict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelComparison {
    pub alpha: f64,
    pub strata: Vec<StratumComparison>,
}

impl ModelComparison {
    pub fn count(&self, verdict: ComparisonVerdict) -> usize {
        self.strata.iter().filter(|s| s.verdict == verdict).count()
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Model comparison at alpha={}: {} improved, {} regressed, {} unchanged, {} incomparable",
            self.alpha,
            self.count(ComparisonVerdict::Improved),
            self.count(ComparisonVerdict::Regressed),
            self.count(ComparisonVerdict::Unchanged),
            self.count(ComparisonVerdict::Incomparable),
        );
        for s in &self.strata {
            let fmt_opt = |v: Option<f64>| v.map(|x| format!("{:.4}", x)).unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                out,
                "  {:<12} {}  baseline {} (n={})  candidate {} (n={})",
                s.verdict.as_str(),
                s.stratum,
                fmt_opt(s.baseline_threshold),
                s.baseline_samples,
                fmt_opt(s.candidate_threshold),
                s.candidate_samples,
            );
        }
        out
    }
}

fn weighted_mean(samples: &[(f64, f64)]) -> Option<f64> {
    let total: f64 = samples.iter().map(|(_, w)| w).sum();
    if samples.is_empty() || total <= 0.0 {
        return None;
    }
    Some(samples.iter().map(|(s, w)| s * w).sum::<f64>() / total)
}

/// Compare two stores over the `top` strata with the most points across both,
/// largest first.
pub async fn compare_models(
    baseline: &dyn CalibrationStore,
    candidate: &dyn CalibrationStore,
    alpha: f64,
    top: usize,
) -> CalibrationResult<ModelComparison> {
    check_alpha(alpha)?;

    let mut combined: HashMap<String, usize> = baseline.stratum_counts().await?;
    for (stratum, count) in candidate.stratum_counts().await? {
        *combined.entry(stratum).or_default() += count;
    }
    let strata = top_strata(&combined, top);

    let mut comparisons = Vec::with_capacity(strata.len());
    for entry in strata {
        let stratum = entry.stratum;
        let base = baseline.stratum_scores(&stratum).await?;
        let cand = candidate.stratum_scores(&stratum).await?;

        let baseline_threshold = weighted_quantile(&base, 1.0 - alpha);
        let candidate_threshold = weighted_quantile(&cand, 1.0 - alpha);
        let delta = match (baseline_threshold, candidate_threshold) {
            (Some(b), Some(c)) => Some(c - b),
            _ => None,
        };

        comparisons.push(StratumComparison {
            baseline_samples: base.len(),
            candidate_samples: cand.len(),
            baseline_threshold,
            candidate_threshold,
            baseline_mean_score: weighted_mean(&base),
            candidate_mean_score: weighted_mean(&cand),
            delta,
            verdict: ComparisonVerdict::from_thresholds(baseline_threshold, candidate_threshold),
            stratum,
        });
    }

    Ok(ModelComparison {
        alpha,
        strata: comparisons,
    })
}
