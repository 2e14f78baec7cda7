//! Quantile price forecasting
//!
//! - [`series`]: OHLCV bars, validation and content fingerprints
//! - [`features`]: causal feature vectors built from a series
//! - [`engine`]: per-level, per-step linear quantile models with crossing repair
//! - [`artifact`] and [`store`]: immutable forecast snapshots and their storage

pub mod artifact;
pub mod config;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod features;
pub mod quantile;
pub mod repair;
pub mod series;
pub mod store;

pub use artifact::{
    ARTIFACT_SCHEMA_VERSION, ArtifactId, FitDiagnostics, ForecastArtifact, ForecastCurve,
    ForecastDiagnostics,
};
pub use config::{
    CONFIG_DIGEST_LEN, ConfigDigest, EstimatorParams, FeatureConfig, ForecastConfig,
    ForecastConfigBuilder, RepairMethod,
};
pub use engine::{QuantileForecaster, forecast_series};
pub use error::{ErrorKind, ForecastError, Result, StoreError};
pub use features::{FeatureBuilder, FeatureSet, FeatureVector, build_features};
pub use quantile::{DEFAULT_QUANTILES, QuantileLevel, QuantileSet};
pub use series::{BarDefect, BarRejection, Fingerprint, PriceBar, PriceSeries, ValidatedSeries};
pub use store::{ArtifactStore, FileArtifactStore, InMemoryArtifactStore};
