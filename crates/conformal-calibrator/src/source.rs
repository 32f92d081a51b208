//! Labeled record sources.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::error::{CalibrationError, CalibrationResult};
use crate::models::{LabeledRecord, PropertyContext, ValidationState};

/// Reference cap on records pulled per ingestion run
pub const DEFAULT_MAX_RECORDS: usize = 10_000;

#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Validated records, most recent first, at most `limit` of them
    async fn fetch_validated(&self, limit: usize) -> CalibrationResult<Vec<LabeledRecord>>;
}

/// Fixed set of records, filtered and capped like the SQL source
#[derive(Debug, Clone, Default)]
pub struct StaticRecordSource {
    records: Vec<LabeledRecord>,
}

impl StaticRecordSource {
    pub fn new(records: Vec<LabeledRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl RecordSource for StaticRecordSource {
    async fn fetch_validated(&self, limit: usize) -> CalibrationResult<Vec<LabeledRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.validation_state == ValidationState::Validated)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// DB row with string-typed columns (compatible with sqlx Any backend)
#[derive(Debug, FromRow)]
struct PredictionRow {
    id: String,
    predicted_class: String,
    true_class: Option<String>,
    confidence: f64,
    context: Option<String>,
    validation_state: String,
    validated_by: Option<String>,
    created_at: Option<String>,
}

impl PredictionRow {
    fn into_record(self) -> LabeledRecord {
        LabeledRecord {
            id: self.id,
            predicted_class: self.predicted_class,
            true_class: self.true_class,
            confidence: self.confidence,
            context: self
                .context
                .as_deref()
                .map(PropertyContext::from_json)
                .unwrap_or_default(),
            validation_state: ValidationState::parse(&self.validation_state),
            validated_by: self.validated_by.filter(|v| !v.trim().is_empty()),
            created_at: self
                .created_at
                .and_then(|s| s.parse::<DateTime<Utc>>().ok()),
        }
    }
}

/// Reads the `predictions` table
pub struct SqlRecordSource {
    pool: sqlx::AnyPool,
}

impl SqlRecordSource {
    pub fn new(pool: sqlx::AnyPool) -> Self {
        Self { pool }
    }

    /// Create the predictions table if missing (local runs and tests)
    pub async fn init_tables(&self) -> CalibrationResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS predictions (
                id TEXT PRIMARY KEY,
                predicted_class TEXT NOT NULL,
                true_class TEXT,
                confidence REAL NOT NULL,
                context TEXT,
                validation_state TEXT NOT NULL DEFAULT 'pending',
                validated_by TEXT,
                created_at TEXT
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert(&self, record: &LabeledRecord) -> CalibrationResult<()> {
        let context = serde_json::to_string(&record.context)
            .map_err(|e| CalibrationError::InvalidParameter(e.to_string()))?;

        sqlx::query(
            "INSERT INTO predictions (
                id, predicted_class, true_class, confidence, context,
                validation_state, validated_by, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.predicted_class)
        .bind(record.true_class.clone())
        .bind(record.confidence)
        .bind(context)
        .bind(record.validation_state.as_str())
        .bind(record.validated_by.clone())
        .bind(record.created_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RecordSource for SqlRecordSource {
    async fn fetch_validated(&self, limit: usize) -> CalibrationResult<Vec<LabeledRecord>> {
        let rows: Vec<PredictionRow> = sqlx::query_as(
            "SELECT
                id, predicted_class, true_class, confidence, context,
                validation_state, validated_by, created_at
             FROM predictions
             WHERE validation_state = 'validated'
             ORDER BY created_at DESC
             LIMIT ?",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CalibrationError::RecordFetch(e.to_string()))?;

        Ok(rows.into_iter().map(PredictionRow::into_record).collect())
    }
}
