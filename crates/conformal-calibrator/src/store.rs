//! Calibration Store
//!
//! Append-only, stratum-indexed storage of calibration points. Quantile and
//! threshold queries are answered from a stratum's `(score, weight)` pairs.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;

use crate::error::{CalibrationError, CalibrationResult};
use crate::models::{CalibrationPoint, PropertyContext};
use crate::quantile::{
    check_alpha, check_quantile, prediction_set, weighted_quantile, QuantileEstimate,
    DEFAULT_MIN_STRATUM_SAMPLES,
};
use crate::stratum::{classify, StratumKey};

#[async_trait]
pub trait CalibrationStore: Send + Sync {
    /// Append a batch. Either every point lands or none does.
    async fn insert_batch(&self, points: &[CalibrationPoint]) -> CalibrationResult<()>;

    /// `(nonconformity_score, importance_weight)` pairs for one stratum
    async fn stratum_scores(&self, stratum: &str) -> CalibrationResult<Vec<(f64, f64)>>;

    /// Point count per stratum
    async fn stratum_counts(&self) -> CalibrationResult<HashMap<String, usize>>;

    /// Stratum size below which quantiles are flagged low confidence
    fn min_samples(&self) -> usize {
        DEFAULT_MIN_STRATUM_SAMPLES
    }

    async fn quantile(&self, stratum: &str, q: f64) -> CalibrationResult<QuantileEstimate> {
        check_quantile(q)?;
        let samples = self.stratum_scores(stratum).await?;
        let value = weighted_quantile(&samples, q).ok_or_else(|| {
            CalibrationError::InsufficientData {
                stratum: stratum.to_string(),
            }
        })?;

        Ok(QuantileEstimate {
            value,
            sample_size: samples.len(),
            low_confidence: samples.len() < self.min_samples(),
        })
    }

    /// Conformal threshold for error rate `alpha`: the `1 - alpha` quantile
    async fn threshold(&self, stratum: &str, alpha: f64) -> CalibrationResult<QuantileEstimate> {
        check_alpha(alpha)?;
        self.quantile(stratum, 1.0 - alpha).await
    }
}

/// Conformal prediction set for a new prediction
#[derive(Debug, Clone, PartialEq)]
pub struct CalibratedPredictionSet {
    pub stratum: StratumKey,
    pub threshold: QuantileEstimate,
    pub classes: Vec<String>,
}

/// Classify the context, look up its stratum threshold at `alpha`, and keep
/// every class whose nonconformity is within it.
pub async fn calibrated_prediction_set(
    store: &dyn CalibrationStore,
    context: &PropertyContext,
    class_probabilities: &[(String, f64)],
    alpha: f64,
) -> CalibrationResult<CalibratedPredictionSet> {
    let stratum = classify(context);
    let threshold = store.threshold(stratum.as_str(), alpha).await?;
    let classes = prediction_set(class_probabilities, threshold.value);

    Ok(CalibratedPredictionSet {
        stratum,
        threshold,
        classes,
    })
}

/// Reject a batch before any of it is written
pub(crate) fn validate_batch(points: &[CalibrationPoint]) -> CalibrationResult<()> {
    for point in points {
        point
            .validate()
            .map_err(CalibrationError::BatchInsert)?;
    }
    Ok(())
}

/// In-process store, used for dry runs and tests
#[derive(Debug, Default)]
pub struct InMemoryCalibrationStore {
    strata: DashMap<String, Vec<CalibrationPoint>>,
    min_samples: Option<usize>,
}

impl InMemoryCalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = Some(min_samples);
        self
    }

    pub fn len(&self) -> usize {
        self.strata.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every point in a stable order, for comparing stores
    pub fn points(&self) -> Vec<CalibrationPoint> {
        let mut points: Vec<CalibrationPoint> = self
            .strata
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect();
        points.sort_by(|a, b| {
            a.stratum
                .cmp(&b.stratum)
                .then_with(|| a.nonconformity_score.total_cmp(&b.nonconformity_score))
                .then_with(|| a.true_class.cmp(&b.true_class))
                .then_with(|| a.true_probability.total_cmp(&b.true_probability))
                .then_with(|| a.importance_weight.total_cmp(&b.importance_weight))
        });
        points
    }
}

#[async_trait]
impl CalibrationStore for InMemoryCalibrationStore {
    async fn insert_batch(&self, points: &[CalibrationPoint]) -> CalibrationResult<()> {
        validate_batch(points)?;
        for point in points {
            self.strata
                .entry(point.stratum.as_str().to_string())
                .or_default()
                .push(point.clone());
        }
        Ok(())
    }

    async fn stratum_scores(&self, stratum: &str) -> CalibrationResult<Vec<(f64, f64)>> {
        Ok(self
            .strata
            .get(stratum)
            .map(|points| {
                points
                    .iter()
                    .map(|p| (p.nonconformity_score, p.importance_weight))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn stratum_counts(&self) -> CalibrationResult<HashMap<String, usize>> {
        Ok(self
            .strata
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().len()))
            .collect())
    }

    fn min_samples(&self) -> usize {
        self.min_samples.unwrap_or(DEFAULT_MIN_STRATUM_SAMPLES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(stratum: &str, score: f64) -> CalibrationPoint {
        CalibrationPoint {
            stratum: StratumKey::from(stratum),
            true_class: "A".to_string(),
            true_probability: 1.0 - score,
            nonconformity_score: score,
            importance_weight: 1.0,
        }
    }

    #[tokio::test]
    async fn test_quantile_on_empty_stratum() {
        let store = InMemoryCalibrationStore::new();
        let err = store.quantile("residential_0-20_unknown_mold", 0.5).await.unwrap_err();
        assert!(err.is_insufficient_data());
    }

    #[tokio::test]
    async fn test_quantile_median() {
        let store = InMemoryCalibrationStore::new();
        store
            .insert_batch(&[point("s", 0.9), point("s", 0.1), point("s", 0.3)])
            .await
            .unwrap();

        let estimate = store.quantile("s", 0.5).await.unwrap();
        assert_eq!(estimate.value, 0.3);
        assert_eq!(estimate.sample_size, 3);
        assert!(estimate.low_confidence);
    }

    #[tokio::test]
    async fn test_low_confidence_threshold_is_tunable() {
        let store = InMemoryCalibrationStore::new().with_min_samples(2);
        store.insert_batch(&[point("s", 0.2), point("s", 0.4)]).await.unwrap();

        let estimate = store.quantile("s", 0.5).await.unwrap();
        assert!(!estimate.low_confidence);
    }

    #[tokio::test]
    async fn test_threshold_uses_complement_of_alpha() {
        let store = InMemoryCalibrationStore::new();
        let points: Vec<_> = (1..=10).map(|i| point("s", i as f64 / 10.0)).collect();
        store.insert_batch(&points).await.unwrap();

        let threshold = store.threshold("s", 0.2).await.unwrap();
        let quantile = store.quantile("s", 0.8).await.unwrap();
        assert_eq!(threshold, quantile);
        assert!(store.threshold("s", 0.0).await.is_err());
        assert!(store.quantile("s", -0.1).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_batch_is_not_partially_written() {
        let store = InMemoryCalibrationStore::new();
        let mut bad = point("s", 0.5);
        bad.nonconformity_score = 1.5;

        let result = store.insert_batch(&[point("s", 0.2), bad]).await;
        match result {
            Err(CalibrationError::BatchInsert(message)) => {
                assert!(message.contains("nonconformity score 1.5"));
            }
            other => panic!("expected BatchInsert, got {:?}", other),
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_stratum_counts() {
        let store = InMemoryCalibrationStore::new();
        store
            .insert_batch(&[point("a", 0.1), point("b", 0.2), point("a", 0.3)])
            .await
            .unwrap();

        let counts = store.stratum_counts().await.unwrap();
        assert_eq!(counts.get("a"), Some(&2));
        assert_eq!(counts.get("b"), Some(&1));
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_calibrated_prediction_set() {
        let store = InMemoryCalibrationStore::new();
        let context = PropertyContext::default().with_damage_type("water stain");
        let stratum = classify(&context);
        let points: Vec<_> = [0.05, 0.1, 0.2, 0.3, 0.35]
            .iter()
            .map(|s| point(stratum.as_str(), *s))
            .collect();
        store.insert_batch(&points).await.unwrap();

        let probs = vec![
            ("leak".to_string(), 0.72),
            ("stain".to_string(), 0.2),
            ("crack".to_string(), 0.08),
        ];
        let set = calibrated_prediction_set(&store, &context, &probs, 0.2).await.unwrap();
        assert_eq!(set.stratum.as_str(), "residential_50-100_unknown_water_damage");
        assert_eq!(set.threshold.value, 0.3);
        assert_eq!(set.classes, vec!["leak".to_string()]);

        let unseen = PropertyContext::default().with_damage_type("termites");
        let err = calibrated_prediction_set(&store, &unseen, &probs, 0.2).await.unwrap_err();
        assert!(err.is_insufficient_data());
    }
}
