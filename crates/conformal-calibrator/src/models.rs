//! Calibration Data Model
//!
//! Labeled historical predictions coming in, calibration points going out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::stratum::StratumKey;

/// Validation state of a historical prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationState {
    /// Awaiting review, no usable ground truth yet
    Pending,
    /// Confirmed by a reviewer or by the automatic high-confidence path
    Validated,
    /// Rejected, carries no usable ground truth
    Rejected,
}

impl ValidationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationState::Pending => "pending",
            ValidationState::Validated => "validated",
            ValidationState::Rejected => "rejected",
        }
    }

    /// Parse a stored state. Unknown values are treated as pending so they never
    /// contribute ground truth.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "validated" => ValidationState::Validated,
            "rejected" => ValidationState::Rejected,
            _ => ValidationState::Pending,
        }
    }
}

/// Context attributes used for stratification.
///
/// Every field is optional; the classifier substitutes documented defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyContext {
    /// Property type, e.g. "residential" or "commercial"
    #[serde(default, alias = "propertyType")]
    pub property_type: Option<String>,
    /// Property age in years
    #[serde(default, alias = "propertyAge", alias = "age")]
    pub property_age: Option<f64>,
    /// Region or location string
    #[serde(default, alias = "location")]
    pub region: Option<String>,
    /// Free-text damage/category label
    #[serde(default, alias = "damageType", alias = "category")]
    pub damage_type: Option<String>,
}

impl PropertyContext {
    /// Decode a JSON context column field by field. A field that is missing or
    /// unreadable stays `None`; input that is not a JSON object yields the
    /// empty context.
    pub fn from_json(raw: &str) -> Self {
        let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(raw) else {
            return Self::default();
        };

        Self {
            property_type: first_text(&fields, &["property_type", "propertyType"]),
            property_age: ["property_age", "propertyAge", "age"]
                .iter()
                .find_map(|key| fields.get(*key).and_then(json_years)),
            region: first_text(&fields, &["region", "location"]),
            damage_type: first_text(&fields, &["damage_type", "damageType", "category"]),
        }
    }

    pub fn with_property_type(mut self, property_type: impl Into<String>) -> Self {
        self.property_type = Some(property_type.into());
        self
    }

    pub fn with_age(mut self, years: f64) -> Self {
        self.property_age = Some(years);
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_damage_type(mut self, damage_type: impl Into<String>) -> Self {
        self.damage_type = Some(damage_type.into());
        self
    }
}

fn first_text(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| fields.get(*key).and_then(Value::as_str).map(str::to_string))
}

/// Age in years from a number or a numeric string
fn json_years(value: &Value) -> Option<f64> {
    let years = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    years.filter(|y| y.is_finite())
}

/// A historical prediction together with its validation outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledRecord {
    pub id: String,
    pub predicted_class: String,
    /// Explicit ground truth, when the reviewer supplied one
    pub true_class: Option<String>,
    /// Model confidence in percent (0-100)
    pub confidence: f64,
    pub context: PropertyContext,
    pub validation_state: ValidationState,
    /// Reviewer id; None when validated by the automatic path
    pub validated_by: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl LabeledRecord {
    /// A validated record with no explicit true class and no reviewer
    pub fn validated(id: impl Into<String>, predicted_class: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: id.into(),
            predicted_class: predicted_class.into(),
            true_class: None,
            confidence,
            context: PropertyContext::default(),
            validation_state: ValidationState::Validated,
            validated_by: None,
            created_at: None,
        }
    }

    pub fn with_true_class(mut self, true_class: impl Into<String>) -> Self {
        self.true_class = Some(true_class.into());
        self
    }

    pub fn with_context(mut self, context: PropertyContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_state(mut self, state: ValidationState) -> Self {
        self.validation_state = state;
        self
    }

    pub fn with_validator(mut self, validator: impl Into<String>) -> Self {
        self.validated_by = Some(validator.into());
        self
    }

    pub fn is_auto_validated(&self) -> bool {
        self.validation_state == ValidationState::Validated && self.validated_by.is_none()
    }
}

/// One unit of calibration evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub stratum: StratumKey,
    pub true_class: String,
    /// Probability assigned to the true class (0-1)
    pub true_probability: f64,
    /// 0 = perfect agreement, 1 = maximal disagreement
    pub nonconformity_score: f64,
    /// Covariate-shift correction weight
    pub importance_weight: f64,
}

impl CalibrationPoint {
    /// Check the numeric invariants a store relies on
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.nonconformity_score) {
            return Err(format!(
                "nonconformity score {} out of [0,1] in stratum {}",
                self.nonconformity_score, self.stratum
            ));
        }
        if !(0.0..=1.0).contains(&self.true_probability) {
            return Err(format!(
                "true probability {} out of [0,1] in stratum {}",
                self.true_probability, self.stratum
            ));
        }
        if !self.importance_weight.is_finite() || self.importance_weight <= 0.0 {
            return Err(format!(
                "importance weight {} must be positive and finite",
                self.importance_weight
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stratum::classify;

    #[test]
    fn test_context_from_json_aliases() {
        let ctx = PropertyContext::from_json(
            r#"{"propertyType":"commercial","age":12,"location":"north","category":"Mold spots"}"#,
        );
        assert_eq!(ctx.property_type.as_deref(), Some("commercial"));
        assert_eq!(ctx.property_age, Some(12.0));
        assert_eq!(ctx.region.as_deref(), Some("north"));
        assert_eq!(ctx.damage_type.as_deref(), Some("Mold spots"));
    }

    #[test]
    fn test_context_from_malformed_json() {
        assert_eq!(PropertyContext::from_json("not json"), PropertyContext::default());
        assert_eq!(PropertyContext::from_json("{}"), PropertyContext::default());
    }

    #[test]
    fn test_context_keeps_readable_fields() {
        let text_age = PropertyContext::from_json(
            r#"{"propertyType":"commercial","location":"north","damageType":"roof leak","propertyAge":"75"}"#,
        );
        assert_eq!(text_age.property_age, Some(75.0));
        assert_eq!(classify(&text_age).as_str(), "commercial_50-100_north_water_damage");

        let both_ages = PropertyContext::from_json(
            r#"{"propertyType":"commercial","location":"north","damageType":"roof leak","age":75,"propertyAge":80}"#,
        );
        assert_eq!(classify(&both_ages).as_str(), "commercial_50-100_north_water_damage");

        let bad_age = PropertyContext::from_json(
            r#"{"propertyType":"commercial","location":"north","damageType":"roof leak","propertyAge":"old"}"#,
        );
        assert_eq!(bad_age.property_age, None);
        assert_eq!(classify(&bad_age).as_str(), "commercial_50-100_north_water_damage");

        let bad_region = PropertyContext::from_json(r#"{"propertyType":"commercial","location":7,"age":12}"#);
        assert_eq!(classify(&bad_region).as_str(), "commercial_0-20_unknown_cosmetic");
    }

    #[test]
    fn test_validation_state_parse() {
        assert_eq!(ValidationState::parse("Validated"), ValidationState::Validated);
        assert_eq!(ValidationState::parse("rejected"), ValidationState::Rejected);
        assert_eq!(ValidationState::parse("???"), ValidationState::Pending);
    }

    #[test]
    fn test_point_validate() {
        let mut point = CalibrationPoint {
            stratum: StratumKey::from("residential_50-100_unknown_cosmetic"),
            true_class: "A".to_string(),
            true_probability: 0.9,
            nonconformity_score: 0.1,
            importance_weight: 1.0,
        };
        assert!(point.validate().is_ok());

        point.nonconformity_score = f64::NAN;
        assert!(point.validate().is_err());

        point.nonconformity_score = 0.1;
        point.importance_weight = 0.0;
        assert!(point.validate().is_err());
    }
}
