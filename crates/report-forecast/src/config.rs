//! Configuration for feature building and quantile forecasting

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ForecastError, Result};
use crate::quantile::QuantileSet;

/// Seed used by the estimator when none is configured
pub const DEFAULT_SEED: u64 = 0x5EED_F0CA_5700_0001;

/// Hex characters kept from the configuration hash
pub const CONFIG_DIGEST_LEN: usize = 16;

/// Short hash of every [`ForecastConfig`] setting that shapes the curves
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigDigest(String);

impl ConfigDigest {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Feature vector layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Rolling window for return mean/volatility and volume ratio
    pub window_size: usize,
    /// Lagged log-return horizons, in bars
    pub lags: Vec<usize>,
    /// Append RSI (scaled to [0, 1])
    pub include_rsi: bool,
    /// RSI period
    pub rsi_period: usize,
    /// Append MACD line and histogram, both divided by the close
    pub include_macd: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            lags: vec![1, 5, 10],
            include_rsi: true,
            rsi_period: 14,
            include_macd: true,
        }
    }
}

impl FeatureConfig {
    /// Plain return/volume features only, no indicators
    pub fn minimal(window_size: usize) -> Self {
        Self {
            window_size,
            include_rsi: false,
            include_macd: false,
            ..Self::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.window_size < 2 {
            return Err(ForecastError::InvalidConfig(
                "window_size must be at least 2".to_string(),
            ));
        }
        if self.lags.is_empty() || self.lags.contains(&0) {
            return Err(ForecastError::InvalidConfig(
                "lags must be non-empty and positive".to_string(),
            ));
        }
        if self.include_rsi && self.rsi_period == 0 {
            return Err(ForecastError::InvalidConfig(
                "rsi_period must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of values in every feature vector
    pub fn width(&self) -> usize {
        self.lags.len() + 3 + usize::from(self.include_rsi) + 2 * usize::from(self.include_macd)
    }
}

/// How crossing quantile predictions are resolved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairMethod {
    /// Each level becomes the minimum of itself and every higher level
    #[default]
    SuffixMin,
    /// Equal-weight pool-adjacent-violators isotonic fit
    PoolAdjacent,
}

/// Subgradient-descent settings for the linear quantile estimator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorParams {
    /// Passes over the training samples
    pub epochs: usize,
    /// Initial step size (on standardized data)
    pub learning_rate: f64,
    /// L1 penalty on the weights
    pub alpha: f64,
}

impl Default for EstimatorParams {
    fn default() -> Self {
        Self {
            epochs: 60,
            learning_rate: 0.05,
            alpha: 0.01,
        }
    }
}

/// Configuration for a forecast run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastConfig {
    pub features: FeatureConfig,
    pub quantiles: QuantileSet,
    /// Number of future bars to forecast
    pub horizon: usize,
    /// Minimum feature vectors with a realized target
    pub min_training_samples: usize,
    /// Estimator RNG seed
    pub seed: u64,
    pub estimator: EstimatorParams,
    pub repair: RepairMethod,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            features: FeatureConfig::default(),
            quantiles: QuantileSet::default(),
            horizon: 6,
            min_training_samples: 50,
            seed: DEFAULT_SEED,
            estimator: EstimatorParams::default(),
            repair: RepairMethod::default(),
        }
    }
}

impl ForecastConfig {
    /// Create a new configuration builder
    pub fn builder() -> ForecastConfigBuilder {
        ForecastConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.features.validate()?;
        if self.horizon == 0 {
            return Err(ForecastError::InvalidConfig(
                "horizon must be greater than 0".to_string(),
            ));
        }
        if self.min_training_samples == 0 {
            return Err(ForecastError::InvalidConfig(
                "min_training_samples must be greater than 0".to_string(),
            ));
        }
        if self.estimator.epochs == 0
            || !(self.estimator.learning_rate.is_finite() && self.estimator.learning_rate > 0.0)
            || !(self.estimator.alpha.is_finite() && self.estimator.alpha >= 0.0)
        {
            return Err(ForecastError::InvalidConfig(
                "estimator needs epochs > 0, learning_rate > 0 and alpha >= 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Digest of the features, levels, horizon, sample floor, seed,
    /// estimator and repair settings
    ///
    /// Two configurations with the same digest fit identical curves on the
    /// same series.
    pub fn digest(&self) -> ConfigDigest {
        let mut hasher = blake3::Hasher::new();
        let mut word = |v: u64| {
            hasher.update(&v.to_le_bytes());
        };

        let features = &self.features;
        word(features.window_size as u64);
        word(features.lags.len() as u64);
        for &lag in &features.lags {
            word(lag as u64);
        }
        word(u64::from(features.include_rsi));
        word(features.rsi_period as u64);
        word(u64::from(features.include_macd));

        let levels = self.quantiles.levels();
        word(levels.len() as u64);
        for level in levels {
            word(level.value().to_bits());
        }

        word(self.horizon as u64);
        word(self.min_training_samples as u64);
        word(self.seed);
        word(self.estimator.epochs as u64);
        word(self.estimator.learning_rate.to_bits());
        word(self.estimator.alpha.to_bits());
        word(match self.repair {
            RepairMethod::SuffixMin => 0,
            RepairMethod::PoolAdjacent => 1,
        });

        let hex = hasher.finalize().to_hex();
        ConfigDigest(hex.as_str()[..CONFIG_DIGEST_LEN].to_string())
    }
}

/// Builder for ForecastConfig
#[derive(Debug, Default)]
pub struct ForecastConfigBuilder {
    features: Option<FeatureConfig>,
    quantiles: Option<Vec<f64>>,
    horizon: Option<usize>,
    min_training_samples: Option<usize>,
    seed: Option<u64>,
    estimator: Option<EstimatorParams>,
    repair: Option<RepairMethod>,
}

impl ForecastConfigBuilder {
    /// Set the full feature configuration
    pub fn features(mut self, features: FeatureConfig) -> Self {
        self.features = Some(features);
        self
    }

    /// Set the rolling window, keeping the other feature defaults
    pub fn window_size(mut self, window_size: usize) -> Self {
        let mut features = self.features.take().unwrap_or_default();
        features.window_size = window_size;
        self.features = Some(features);
        self
    }

    /// Set the quantile levels (must be ascending)
    pub fn quantiles(mut self, levels: &[f64]) -> Self {
        self.quantiles = Some(levels.to_vec());
        self
    }

    /// Set the forecast horizon
    pub fn horizon(mut self, horizon: usize) -> Self {
        self.horizon = Some(horizon);
        self
    }

    /// Set the minimum number of training samples
    pub fn min_training_samples(mut self, n: usize) -> Self {
        self.min_training_samples = Some(n);
        self
    }

    /// Set the estimator seed
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set estimator parameters
    pub fn estimator(mut self, params: EstimatorParams) -> Self {
        self.estimator = Some(params);
        self
    }

    /// Set the crossing repair method
    pub fn repair(mut self, repair: RepairMethod) -> Self {
        self.repair = Some(repair);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<ForecastConfig> {
        let defaults = ForecastConfig::default();

        let quantiles = match self.quantiles {
            Some(levels) => QuantileSet::new(&levels)?,
            None => defaults.quantiles,
        };

        let config = ForecastConfig {
            features: self.features.unwrap_or(defaults.features),
            quantiles,
            horizon: self.horizon.unwrap_or(defaults.horizon),
            min_training_samples: self
                .min_training_samples
                .unwrap_or(defaults.min_training_samples),
            seed: self.seed.unwrap_or(defaults.seed),
            estimator: self.estimator.unwrap_or(defaults.estimator),
            repair: self.repair.unwrap_or(defaults.repair),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ForecastConfig::default();
        assert_eq!(config.horizon, 6);
        assert_eq!(config.quantiles.len(), 7);
        assert_eq!(config.features.window_size, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ForecastConfig::builder()
            .window_size(30)
            .quantiles(&[0.1, 0.5, 0.9])
            .horizon(5)
            .seed(7)
            .build()
            .unwrap();

        assert_eq!(config.features.window_size, 30);
        assert_eq!(config.features.lags, vec![1, 5, 10]);
        assert_eq!(config.quantiles.len(), 3);
        assert_eq!(config.horizon, 5);
        assert_eq!(config.seed, 7);
    }

    #[test]
    fn test_builder_rejects_bad_values() {
        assert!(ForecastConfig::builder().horizon(0).build().is_err());
        assert!(ForecastConfig::builder().window_size(1).build().is_err());
        assert!(ForecastConfig::builder().quantiles(&[0.9, 0.1]).build().is_err());
        assert!(
            ForecastConfig::builder()
                .estimator(EstimatorParams {
                    epochs: 0,
                    ..EstimatorParams::default()
                })
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_digest_tracks_fit_settings() {
        let base = ForecastConfig::default();
        assert_eq!(base.digest(), ForecastConfig::default().digest());
        assert_eq!(base.digest().as_str().len(), CONFIG_DIGEST_LEN);

        let variants = [
            ForecastConfig::builder().horizon(10).build().unwrap(),
            ForecastConfig::builder().quantiles(&[0.1, 0.5, 0.9]).build().unwrap(),
            ForecastConfig::builder().seed(7).build().unwrap(),
            ForecastConfig::builder().window_size(30).build().unwrap(),
            ForecastConfig::builder().repair(RepairMethod::PoolAdjacent).build().unwrap(),
            ForecastConfig::builder()
                .features(FeatureConfig::minimal(20))
                .build()
                .unwrap(),
        ];
        for variant in &variants {
            assert_ne!(variant.digest(), base.digest(), "{variant:?}");
        }
    }

    #[test]
    fn test_feature_width() {
        assert_eq!(FeatureConfig::default().width(), 3 + 3 + 1 + 2);
        assert_eq!(FeatureConfig::minimal(20).width(), 6);
    }
}
