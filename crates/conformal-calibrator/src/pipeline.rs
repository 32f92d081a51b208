//! Batch Ingestion Pipeline
//!
//! fetch -> filter -> score -> persist. Points are flushed in fixed-size
//! batches; a failed batch is logged and recorded in the report while the run
//! carries on with the remaining records.

use futures_util::stream::{self, Stream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;

use crate::builder::CalibrationPointBuilder;
use crate::error::{CalibrationError, CalibrationResult};
use crate::models::{CalibrationPoint, LabeledRecord};
use crate::report::{top_strata, BatchFailure, IngestionReport};
use crate::source::{RecordSource, DEFAULT_MAX_RECORDS};
use crate::store::CalibrationStore;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_TOP_STRATA: usize = 10;

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub batch_size: usize,
    pub max_records: usize,
    pub top_strata: usize,
    /// Score records without writing to the store
    pub dry_run: bool,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_records: DEFAULT_MAX_RECORDS,
            top_strata: DEFAULT_TOP_STRATA,
            dry_run: false,
        }
    }
}

pub struct IngestionPipeline {
    source: Arc<dyn RecordSource>,
    store: Arc<dyn CalibrationStore>,
    builder: CalibrationPointBuilder,
    config: IngestionConfig,
}

impl IngestionPipeline {
    pub fn new(
        source: Arc<dyn RecordSource>,
        store: Arc<dyn CalibrationStore>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            source,
            store,
            builder: CalibrationPointBuilder::new(),
            config,
        }
    }

    pub fn with_builder(mut self, builder: CalibrationPointBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn config(&self) -> &IngestionConfig {
        &self.config
    }

    /// Fetch validated records from the source and ingest them.
    ///
    /// Only a fetch failure is fatal; batch failures end up in the report.
    pub async fn run(&self) -> CalibrationResult<IngestionReport> {
        let records = self
            .source
            .fetch_validated(self.config.max_records)
            .await
            .map_err(|e| match e {
                CalibrationError::RecordFetch(_) => e,
                other => CalibrationError::RecordFetch(other.to_string()),
            })?;

        tracing::info!(
            "Fetched {} validated records (cap {})",
            records.len(),
            self.config.max_records
        );

        Ok(self.ingest(records).await)
    }

    pub async fn ingest<I>(&self, records: I) -> IngestionReport
    where
        I: IntoIterator<Item = LabeledRecord>,
    {
        self.ingest_stream(stream::iter(records)).await
    }

    pub async fn ingest_stream<S>(&self, records: S) -> IngestionReport
    where
        S: Stream<Item = LabeledRecord>,
    {
        futures_util::pin_mut!(records);

        let batch_size = self.config.batch_size.max(1);
        let mut report = IngestionReport {
            dry_run: self.config.dry_run,
            ..Default::default()
        };
        let mut pending: Vec<CalibrationPoint> = Vec::with_capacity(batch_size);
        let mut run_counts: HashMap<String, usize> = HashMap::new();
        let mut batch = 0;

        while let Some(record) = records.next().await {
            report.processed += 1;

            let Some(point) = self.builder.build(&record) else {
                report.skipped += 1;
                continue;
            };

            if record.is_auto_validated() {
                report.auto_validated += 1;
            }
            *run_counts.entry(point.stratum.as_str().to_string()).or_default() += 1;
            pending.push(point);

            if pending.len() >= batch_size {
                self.flush(&mut pending, batch, &mut report).await;
                batch += 1;
            }
        }

        if !pending.is_empty() {
            self.flush(&mut pending, batch, &mut report).await;
        }

        report.top_strata = if self.config.dry_run {
            top_strata(&run_counts, self.config.top_strata)
        } else {
            match self.store.stratum_counts().await {
                Ok(counts) => top_strata(&counts, self.config.top_strata),
                Err(e) => {
                    tracing::warn!("Could not read stratum counts for report: {}", e);
                    Vec::new()
                }
            }
        };

        tracing::info!(
            "Ingestion done: {} processed, {} skipped, {} inserted, {} failed batches",
            report.processed,
            report.skipped,
            report.inserted,
            report.errors.len()
        );

        report
    }

    async fn flush(
        &self,
        pending: &mut Vec<CalibrationPoint>,
        batch: usize,
        report: &mut IngestionReport,
    ) {
        let points = pending.len();

        if self.config.dry_run {
            tracing::debug!("Dry run: skipping write of batch {} ({} points)", batch, points);
        } else {
            match self.store.insert_batch(&pending[..]).await {
                Ok(()) => {
                    report.inserted += points;
                    tracing::debug!("Committed batch {} ({} points)", batch, points);
                }
                Err(e) => {
                    let message = match e {
                        CalibrationError::BatchInsert(message) => message,
                        other => other.to_string(),
                    };
                    tracing::warn!("Batch {} ({} points) failed: {}", batch, points, message);
                    report.errors.push(BatchFailure {
                        batch,
                        points,
                        message,
                    });
                }
            }
        }

        pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PropertyContext, ValidationState};
    use crate::source::StaticRecordSource;
    use crate::store::InMemoryCalibrationStore;
    use approx::assert_abs_diff_eq;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pipeline(store: Arc<dyn CalibrationStore>, batch_size: usize) -> IngestionPipeline {
        IngestionPipeline::new(
            Arc::new(StaticRecordSource::default()),
            store,
            IngestionConfig {
                batch_size,
                ..Default::default()
            },
        )
    }

    fn varied_records(n: usize) -> Vec<LabeledRecord> {
        let labels = ["roof leak", "termite damage", "scuff", "smoke stain", "foundation crack"];
        (0..n)
            .map(|i| {
                let context = PropertyContext::default()
                    .with_age((i * 7 % 130) as f64)
                    .with_region(if i % 2 == 0 { "north" } else { "south" })
                    .with_damage_type(labels[i % labels.len()]);
                let record = LabeledRecord::validated(format!("r{}", i), "A", (i * 13 % 101) as f64)
                    .with_context(context);
                if i % 3 == 0 {
                    record.with_true_class("B")
                } else {
                    record
                }
            })
            .collect()
    }

    /// Store that fails exactly one insert call
    struct FailingStore {
        inner: InMemoryCalibrationStore,
        calls: AtomicUsize,
        fail_on: usize,
    }

    #[async_trait]
    impl CalibrationStore for FailingStore {
        async fn insert_batch(&self, points: &[CalibrationPoint]) -> CalibrationResult<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == self.fail_on {
                return Err(CalibrationError::BatchInsert("connection reset".to_string()));
            }
            self.inner.insert_batch(points).await
        }

        async fn stratum_scores(&self, stratum: &str) -> CalibrationResult<Vec<(f64, f64)>> {
            self.inner.stratum_scores(stratum).await
        }

        async fn stratum_counts(&self) -> CalibrationResult<HashMap<String, usize>> {
            self.inner.stratum_counts().await
        }
    }

    #[tokio::test]
    async fn test_end_to_end_scores() {
        let store = Arc::new(InMemoryCalibrationStore::new());
        let records = vec![
            LabeledRecord::validated("1", "A", 90.0).with_true_class("A"),
            LabeledRecord::validated("2", "B", 40.0).with_true_class("B"),
            LabeledRecord::validated("3", "A", 95.0).with_true_class("B"),
        ];

        let report = pipeline(store.clone(), DEFAULT_BATCH_SIZE).ingest(records).await;
        assert_eq!(report.processed, 3);
        assert_eq!(report.inserted, 3);
        assert_eq!(report.skipped, 0);
        assert!(report.errors.is_empty());

        let scores: Vec<f64> = store.points().iter().map(|p| p.nonconformity_score).collect();
        assert_eq!(scores.len(), 3);
        assert_abs_diff_eq!(scores[0], 0.10, epsilon = 1e-9);
        assert_abs_diff_eq!(scores[1], 0.60, epsilon = 1e-9);
        assert_abs_diff_eq!(scores[2], 1.0, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_batch_size_does_not_change_contents() {
        let records = varied_records(250);
        let single = Arc::new(InMemoryCalibrationStore::new());
        let hundred = Arc::new(InMemoryCalibrationStore::new());

        let a = pipeline(single.clone(), 1).ingest(records.clone()).await;
        let b = pipeline(hundred.clone(), 100).ingest(records).await;

        assert_eq!(a.inserted, 250);
        assert_eq!(b.inserted, 250);
        assert_eq!(single.points(), hundred.points());
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_stop_run() {
        let store = Arc::new(FailingStore {
            inner: InMemoryCalibrationStore::new(),
            calls: AtomicUsize::new(0),
            fail_on: 1,
        });

        let report = pipeline(store.clone(), 2).ingest(varied_records(5)).await;
        assert_eq!(report.processed, 5);
        assert_eq!(report.inserted, 3);
        assert_eq!(
            report.errors,
            vec![BatchFailure {
                batch: 1,
                points: 2,
                message: "connection reset".to_string(),
            }]
        );
        assert_eq!(store.inner.len(), 3);
        assert!(report.is_partial());
    }

    #[tokio::test]
    async fn test_ineligible_records_are_skipped() {
        let store = Arc::new(InMemoryCalibrationStore::new());
        let records = vec![
            LabeledRecord::validated("1", "A", 90.0),
            LabeledRecord::validated("2", "A", 90.0).with_state(ValidationState::Pending),
            LabeledRecord::validated("3", "A", 90.0).with_state(ValidationState::Rejected),
            LabeledRecord::validated("4", "A", 70.0).with_validator("inspector-2"),
        ];

        let report = pipeline(store.clone(), 10).ingest(records).await;
        assert_eq!(report.processed, 4);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.auto_validated, 1);
        assert_eq!(report.top_strata.len(), 1);
        assert_eq!(report.top_strata[0].count, 2);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let store = Arc::new(InMemoryCalibrationStore::new());
        let pipeline = IngestionPipeline::new(
            Arc::new(StaticRecordSource::default()),
            store.clone(),
            IngestionConfig {
                dry_run: true,
                top_strata: 100,
                ..Default::default()
            },
        );

        let report = pipeline.ingest(varied_records(20)).await;
        assert_eq!(report.inserted, 0);
        assert!(store.is_empty());
        assert!(report.dry_run);
        assert_eq!(report.top_strata.iter().map(|s| s.count).sum::<usize>(), 20);
    }

    #[tokio::test]
    async fn test_run_caps_fetched_records() {
        let store = Arc::new(InMemoryCalibrationStore::new());
        let pipeline = IngestionPipeline::new(
            Arc::new(StaticRecordSource::new(varied_records(40))),
            store.clone(),
            IngestionConfig {
                max_records: 25,
                ..Default::default()
            },
        );

        let report = pipeline.run().await.unwrap();
        assert_eq!(report.processed, 25);
        assert_eq!(store.len(), 25);
    }

    #[tokio::test]
    async fn test_run_fails_when_source_fails() {
        struct BrokenSource;

        #[async_trait]
        impl RecordSource for BrokenSource {
            async fn fetch_validated(&self, _limit: usize) -> CalibrationResult<Vec<LabeledRecord>> {
                Err(CalibrationError::InvalidParameter("upstream down".to_string()))
            }
        }

        let pipeline = IngestionPipeline::new(
            Arc::new(BrokenSource),
            Arc::new(InMemoryCalibrationStore::new()),
            IngestionConfig::default(),
        );

        let err = pipeline.run().await.unwrap_err();
        assert!(matches!(err, CalibrationError::RecordFetch(_)));
    }
}
