//! SQL-backed calibration store.
//!
//! Points live in `calibration_points`, scoped by model version so two handles
//! on the same table can hold an A/B pair. Numeric columns are decimal strings.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{CalibrationError, CalibrationResult};
use crate::models::CalibrationPoint;
use crate::quantile::DEFAULT_MIN_STRATUM_SAMPLES;
use crate::store::{validate_batch, CalibrationStore};

pub const DEFAULT_MODEL_VERSION: &str = "default";

/// Serialize a float as a decimal string
pub fn to_decimal_string(value: f64) -> CalibrationResult<String> {
    Decimal::from_f64(value)
        .map(|d| d.normalize().to_string())
        .ok_or_else(|| {
            CalibrationError::InvalidParameter(format!("{} has no decimal representation", value))
        })
}

/// Parse a decimal string column back into a float
pub fn from_decimal_string(value: &str) -> CalibrationResult<f64> {
    Decimal::from_str(value.trim())
        .ok()
        .and_then(|d| d.to_f64())
        .ok_or_else(|| {
            CalibrationError::InvalidParameter(format!("'{}' is not a decimal number", value))
        })
}

#[derive(Clone)]
pub struct SqlCalibrationStore {
    pool: sqlx::AnyPool,
    model_version: String,
    min_samples: usize,
}

impl SqlCalibrationStore {
    pub fn new(pool: sqlx::AnyPool) -> Self {
        Self {
            pool,
            model_version: DEFAULT_MODEL_VERSION.to_string(),
            min_samples: DEFAULT_MIN_STRATUM_SAMPLES,
        }
    }

    pub fn with_model_version(mut self, model_version: impl Into<String>) -> Self {
        self.model_version = model_version.into();
        self
    }

    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = min_samples;
        self
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    /// Create the calibration table if it does not exist
    pub async fn init_tables(&self) -> CalibrationResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS calibration_points (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                model_version TEXT NOT NULL,
                stratum TEXT NOT NULL,
                true_class TEXT NOT NULL,
                true_probability TEXT NOT NULL,
                nonconformity_score TEXT NOT NULL,
                importance_weight TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_calibration_points_version_stratum
             ON calibration_points (model_version, stratum)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl CalibrationStore for SqlCalibrationStore {
    async fn insert_batch(&self, points: &[CalibrationPoint]) -> CalibrationResult<()> {
        validate_batch(points)?;
        if points.is_empty() {
            return Ok(());
        }

        let created_at = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        for point in points {
            sqlx::query(
                "INSERT INTO calibration_points (
                    model_version, stratum, true_class, true_probability,
                    nonconformity_score, importance_weight, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&self.model_version)
            .bind(point.stratum.as_str())
            .bind(&point.true_class)
            .bind(to_decimal_string(point.true_probability)?)
            .bind(to_decimal_string(point.nonconformity_score)?)
            .bind(to_decimal_string(point.importance_weight)?)
            .bind(&created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn stratum_scores(&self, stratum: &str) -> CalibrationResult<Vec<(f64, f64)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT nonconformity_score, importance_weight
             FROM calibration_points
             WHERE model_version = ? AND stratum = ?",
        )
        .bind(&self.model_version)
        .bind(stratum)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|(score, weight)| -> CalibrationResult<(f64, f64)> {
                Ok((from_decimal_string(score)?, from_decimal_string(weight)?))
            })
            .collect()
    }

    async fn stratum_counts(&self) -> CalibrationResult<HashMap<String, usize>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT stratum, COUNT(*) FROM calibration_points
             WHERE model_version = ?
             GROUP BY stratum",
        )
        .bind(&self.model_version)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(stratum, count)| (stratum, count.max(0) as usize))
            .collect())
    }

    fn min_samples(&self) -> usize {
        self.min_samples
    }
}
