//! Calibration Configuration
//!
//! Run settings read from the environment (`.env` is loaded by the binary).
//! `DATABASE_URL` is required; everything else falls back to a default.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{CalibrationError, CalibrationResult};
use crate::pipeline::{IngestionConfig, DEFAULT_BATCH_SIZE, DEFAULT_TOP_STRATA};
use crate::quantile::{check_alpha, DEFAULT_MIN_STRATUM_SAMPLES};
use crate::source::DEFAULT_MAX_RECORDS;
use crate::sql_store::DEFAULT_MODEL_VERSION;

pub const DEFAULT_ALPHA: f64 = 0.1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    pub database_url: String,
    pub batch_size: usize,
    pub max_records: usize,
    pub min_stratum_samples: usize,
    pub model_version: String,
    pub top_strata: usize,
    /// Target error rate for reported thresholds
    pub alpha: f64,
}

impl CalibrationConfig {
    pub fn from_env() -> CalibrationResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. `DATABASE_URL` is required, the rest have defaults.
    pub fn from_lookup<F>(lookup: F) -> CalibrationResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| CalibrationError::Configuration("DATABASE_URL not set".to_string()))?;

        let config = Self {
            database_url,
            batch_size: parse_or(&lookup, "CALIBRATION_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            max_records: parse_or(&lookup, "CALIBRATION_MAX_RECORDS", DEFAULT_MAX_RECORDS)?,
            min_stratum_samples: parse_or(
                &lookup,
                "CALIBRATION_MIN_STRATUM_SAMPLES",
                DEFAULT_MIN_STRATUM_SAMPLES,
            )?,
            model_version: lookup("CALIBRATION_MODEL_VERSION")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL_VERSION.to_string()),
            top_strata: parse_or(&lookup, "CALIBRATION_TOP_STRATA", DEFAULT_TOP_STRATA)?,
            alpha: parse_or(&lookup, "CALIBRATION_ALPHA", DEFAULT_ALPHA)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CalibrationResult<()> {
        if self.batch_size == 0 {
            return Err(CalibrationError::Configuration(
                "CALIBRATION_BATCH_SIZE must be at least 1".to_string(),
            ));
        }
        check_alpha(self.alpha).map_err(|e| CalibrationError::Configuration(e.to_string()))
    }

    pub fn ingestion(&self, dry_run: bool) -> IngestionConfig {
        IngestionConfig {
            batch_size: self.batch_size,
            max_records: self.max_records,
            top_strata: self.top_strata,
            dry_run,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> CalibrationResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| CalibrationError::Configuration(format!("{} has invalid value '{}'", key, raw))),
        None => Ok(default),
    }
}
