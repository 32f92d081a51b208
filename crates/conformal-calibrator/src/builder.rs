//! Calibration Point Builder
//!
//! Turns an eligible labeled record into a calibration point. No I/O.

use std::sync::Arc;

use crate::models::{CalibrationPoint, LabeledRecord, ValidationState};
use crate::scorer::{clamp_confidence, MismatchCeilingScorer, NonconformityScorer};
use crate::stratum::classify;

pub const DEFAULT_IMPORTANCE_WEIGHT: f64 = 1.0;

#[derive(Clone)]
pub struct CalibrationPointBuilder {
    scorer: Arc<dyn NonconformityScorer>,
    importance_weight: f64,
}

impl Default for CalibrationPointBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CalibrationPointBuilder {
    pub fn new() -> Self {
        Self {
            scorer: Arc::new(MismatchCeilingScorer),
            importance_weight: DEFAULT_IMPORTANCE_WEIGHT,
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn NonconformityScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Fixed covariate-shift weight applied to every point
    pub fn with_importance_weight(mut self, weight: f64) -> Self {
        self.importance_weight = weight;
        self
    }

    /// Ground truth for a record, if it has one.
    ///
    /// Validated records use the reviewer's explicit true class when present and
    /// otherwise take the predicted class as confirmed.
    pub fn resolve_true_class<'a>(&self, record: &'a LabeledRecord) -> Option<&'a str> {
        match record.validation_state {
            ValidationState::Validated => Some(
                record
                    .true_class
                    .as_deref()
                    .unwrap_or(&record.predicted_class),
            ),
            ValidationState::Pending | ValidationState::Rejected => None,
        }
    }

    pub fn build(&self, record: &LabeledRecord) -> Option<CalibrationPoint> {
        let true_class = self.resolve_true_class(record)?;
        let nonconformity_score =
            self.scorer
                .score(record.confidence, true_class, &record.predicted_class);

        Some(CalibrationPoint {
            stratum: classify(&record.context),
            true_class: true_class.to_string(),
            true_probability: clamp_confidence(record.confidence) / 100.0,
            nonconformity_score,
            importance_weight: self.importance_weight,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PropertyContext;
    use approx::assert_relative_eq;

    #[test]
    fn test_ineligible_records_yield_nothing() {
        let builder = CalibrationPointBuilder::new();
        let rejected = LabeledRecord::validated("r1", "A", 80.0)
            .with_true_class("A")
            .with_state(ValidationState::Rejected);
        let pending = LabeledRecord::validated("r2", "A", 80.0).with_state(ValidationState::Pending);

        assert!(builder.build(&rejected).is_none());
        assert!(builder.build(&pending).is_none());
    }

    #[test]
    fn test_validated_record_confirms_prediction() {
        let builder = CalibrationPointBuilder::new();
        let record = LabeledRecord::validated("r1", "crack", 85.0)
            .with_validator("inspector-7")
            .with_context(PropertyContext::default().with_age(10.0).with_damage_type("wall crack"));

        let point = builder.build(&record).unwrap();
        assert_eq!(point.true_class, "crack");
        assert_eq!(point.stratum.as_str(), "residential_0-20_unknown_cosmetic");
        assert_relative_eq!(point.true_probability, 0.85);
        assert_relative_eq!(point.nonconformity_score, 0.15, epsilon = 1e-12);
        assert_eq!(point.importance_weight, DEFAULT_IMPORTANCE_WEIGHT);
    }

    #[test]
    fn test_explicit_true_class_overrides_prediction() {
        let builder = CalibrationPointBuilder::new();
        let record = LabeledRecord::validated("r1", "A", 95.0).with_true_class("B");

        let point = builder.build(&record).unwrap();
        assert_eq!(point.true_class, "B");
        assert_eq!(point.nonconformity_score, 1.0);
    }

    #[test]
    fn test_custom_importance_weight() {
        let builder = CalibrationPointBuilder::new().with_importance_weight(2.5);
        let point = builder.build(&LabeledRecord::validated("r1", "A", 50.0)).unwrap();
        assert_eq!(point.importance_weight, 2.5);
    }
}
