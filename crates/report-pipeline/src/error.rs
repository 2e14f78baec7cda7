//! Error types for pipeline stages and collaborators

use report_forecast::{ErrorKind, ForecastError, StoreError};
use thiserror::Error;

/// Errors returned by ingestion, rendering, narration and assembly collaborators
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// Bad ticker, timeframe or request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The upstream source has no data for the request
    #[error("Not found: {0}")]
    NotFound(String),

    /// Upstream rate limit hit
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Upstream call timed out
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Upstream failed for another reason
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Upstream answered with something unusable
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Local filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CollaboratorError {
    /// Whether retrying the call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Timeout(_) | Self::Upstream(_)
        )
    }

    /// Classify for reporting
    pub fn kind(&self) -> ErrorKind {
        if self.is_transient() {
            ErrorKind::TransientUpstream
        } else if matches!(self, Self::NotFound(_)) {
            ErrorKind::DataSufficiency
        } else {
            ErrorKind::Input
        }
    }
}

/// Error raised by one stage, carrying its classification
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Forecast(#[from] ForecastError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    /// Stage exceeded its time budget
    #[error("Stage timed out after {0:?}")]
    TimedOut(std::time::Duration),

    /// Stage intentionally not run
    #[error("{0}")]
    Disabled(String),

    /// A blocking worker panicked or was cancelled
    #[error("Worker failed: {0}")]
    Worker(String),

    /// Nothing to assemble
    #[error("No charts and no narrative available for assembly")]
    NothingToAssemble,
}

impl StageError {
    /// Whether a retry may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Collaborator(e) => e.is_transient(),
            Self::TimedOut(_) => true,
            Self::Forecast(_) | Self::Disabled(_) | Self::Worker(_) | Self::NothingToAssemble => {
                false
            }
        }
    }

    /// Short label of the error class, recorded on the stage result
    pub fn kind_label(&self) -> &'static str {
        let kind = match self {
            Self::Forecast(e) => e.kind(),
            Self::Collaborator(e) => e.kind(),
            Self::Store(e) if e.is_transient() => ErrorKind::TransientUpstream,
            Self::TimedOut(_) => ErrorKind::TransientUpstream,
            Self::Store(_) | Self::Worker(_) => return "internal",
            Self::Disabled(_) => return "disabled",
            Self::NothingToAssemble => ErrorKind::DataSufficiency,
        };
        match kind {
            ErrorKind::Input => "input",
            ErrorKind::DataSufficiency => "data_sufficiency",
            ErrorKind::Numeric => "numeric",
            ErrorKind::TransientUpstream => "transient_upstream",
        }
    }
}

/// Errors from the orchestrator itself or its run store
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration rejected by validation
    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// A finalized run was modified
    #[error("Run {0} is already finalized")]
    AlreadyFinalized(String),

    /// Stage entered out of order
    #[error("Invalid stage transition: {0}")]
    InvalidTransition(String),

    /// No run record with this id
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// Run store I/O failure
    #[error("Run store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Run record encoding failure
    #[error("Run store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Forecast(#[from] ForecastError),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
