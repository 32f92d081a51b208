use thiserror::Error;

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Record fetch failed: {0}")]
    RecordFetch(String),

    /// The batch index is tracked by the caller, see `BatchFailure`
    #[error("Batch insert failed: {0}")]
    BatchInsert(String),

    #[error("Insufficient data: no calibration points for stratum '{stratum}'")]
    InsufficientData { stratum: String },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl CalibrationError {
    /// True when the error only means "no calibrated threshold for this stratum".
    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, CalibrationError::InsufficientData { .. })
    }
}

pub type CalibrationResult<T> = Result<T, CalibrationError>;
