//! Conformal Calibrator
//!
//! Stratified (Mondrian) conformal calibration. Validated historical
//! predictions are classified into strata, scored for nonconformity, and
//! appended to a calibration store that answers per-stratum quantile and
//! threshold queries for building prediction sets.

pub mod builder;
pub mod comparison;
pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod quantile;
pub mod report;
pub mod scorer;
pub mod source;
pub mod sql_store;
pub mod store;
pub mod stratum;

pub use builder::CalibrationPointBuilder;
pub use comparison::{compare_models, ComparisonVerdict, ModelComparison, StratumComparison};
pub use config::CalibrationConfig;
pub use error::{CalibrationError, CalibrationResult};
pub use models::{CalibrationPoint, LabeledRecord, PropertyContext, ValidationState};
pub use pipeline::{IngestionConfig, IngestionPipeline};
pub use quantile::{prediction_set, QuantileEstimate};
pub use report::{BatchFailure, IngestionReport, StratumCount};
pub use scorer::{MismatchCeilingScorer, NonconformityScorer};
pub use source::{RecordSource, SqlRecordSource, StaticRecordSource};
pub use sql_store::SqlCalibrationStore;
pub use store::{
    calibrated_prediction_set, CalibratedPredictionSet, CalibrationStore,
    InMemoryCalibrationStore,
};
pub use stratum::{classify, AgeBin, DamageCategory, StratumKey};
