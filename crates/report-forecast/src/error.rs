//! Error types for feature building, forecasting and artifact storage

use thiserror::Error;

/// Broad classification used by the pipeline to pick a failure policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad ticker, timeframe or price bar. Never retried.
    Input,
    /// Not enough history or training samples. Fatal to the run.
    DataSufficiency,
    /// Non-finite predictions or a quantile repair that did not hold.
    Numeric,
    /// Timeouts and other upstream hiccups worth retrying.
    TransientUpstream,
}

/// Forecast-side errors
#[derive(Debug, Error)]
pub enum ForecastError {
    /// Configuration rejected by validation
    #[error("Invalid forecast configuration: {0}")]
    InvalidConfig(String),

    /// Input data rejected before forecasting
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Series too short for the feature window
    #[error("Insufficient history: need at least {required} bars, have {available}")]
    InsufficientHistory { required: usize, available: usize },

    /// Too few feature vectors with a realized target
    #[error("Insufficient training data: need at least {required} samples, have {available}")]
    InsufficientTrainingData { required: usize, available: usize },

    /// The most recent bar produced no usable feature vector
    #[error("No valid feature vector for the most recent bar")]
    LatestFeaturesUnavailable,

    /// A prediction was NaN or infinite
    #[error("Non-finite forecast value at quantile {level}, step {step}")]
    NonFiniteOutput { level: f64, step: usize },

    /// Quantile ordering still violated after repair
    #[error("Quantile monotonicity repair did not converge at step {step}")]
    RepairFailed { step: usize },
}

impl ForecastError {
    /// Classify this error for the failure policy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig(_) | Self::InvalidInput(_) => ErrorKind::Input,
            Self::InsufficientHistory { .. }
            | Self::InsufficientTrainingData { .. }
            | Self::LatestFeaturesUnavailable => ErrorKind::DataSufficiency,
            Self::NonFiniteOutput { .. } | Self::RepairFailed { .. } => ErrorKind::Numeric,
        }
    }
}

/// Result type alias for forecast operations
pub type Result<T> = std::result::Result<T, ForecastError>;

/// Artifact store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// No artifact with this id
    #[error("Artifact not found: {0}")]
    NotFound(String),

    /// Filesystem failure
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failure
    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted artifact failed its invariant checks on load
    #[error("Corrupt artifact {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

impl StoreError {
    /// Whether retrying the operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
