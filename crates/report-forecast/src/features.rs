//! Feature builder
//!
//! Turns a [`PriceSeries`] into one fixed-width feature vector per eligible
//! bar. Every value at bar `t` is computed from bars `0..=t` only, so the
//! vectors can be paired with future returns without look-ahead.
//!
//! Layout, in order:
//! - log return over each configured lag
//! - rolling mean of one-bar log returns over `window_size`
//! - rolling sample standard deviation of the same returns
//! - volume over its rolling mean
//! - RSI / 100 (optional)
//! - MACD line / close and MACD histogram / close (optional)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ta::Next;
use ta::indicators::{MovingAverageConvergenceDivergence, RelativeStrengthIndex};
use tracing::debug;

use crate::config::FeatureConfig;
use crate::error::{ForecastError, Result};
use crate::series::PriceSeries;

/// Features for one bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Position of the bar in the source series
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub values: Vec<f64>,
}

/// All feature vectors built from one series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub names: Vec<String>,
    pub vectors: Vec<FeatureVector>,
    /// Eligible bars withheld because a value was undefined
    pub dropped: usize,
}

impl FeatureSet {
    /// Feature vector width
    pub fn width(&self) -> usize {
        self.names.len()
    }

    /// Number of vectors
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Whether no vector survived
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Vector for the bar at `index`, if that bar produced one
    pub fn at_index(&self, index: usize) -> Option<&FeatureVector> {
        self.vectors
            .binary_search_by_key(&index, |v| v.index)
            .ok()
            .map(|pos| &self.vectors[pos])
    }
}

/// Builds feature vectors according to a [`FeatureConfig`]
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    config: FeatureConfig,
}

impl FeatureBuilder {
    /// Create a builder, validating the configuration
    pub fn new(config: FeatureConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The configuration in use
    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Bars needed before the first vector can exist
    pub fn warmup(&self) -> usize {
        let max_lag = self.config.lags.iter().copied().max().unwrap_or(1);
        self.config.window_size.max(max_lag)
    }

    /// Column names matching the vector layout
    pub fn names(&self) -> Vec<String> {
        let w = self.config.window_size;
        let mut names: Vec<String> = self
            .config
            .lags
            .iter()
            .map(|lag| format!("ret_lag_{lag}"))
            .collect();
        names.push(format!("ret_mean_{w}"));
        names.push(format!("ret_std_{w}"));
        names.push(format!("volume_ratio_{w}"));
        if self.config.include_rsi {
            names.push(format!("rsi_{}", self.config.rsi_period));
        }
        if self.config.include_macd {
            names.push("macd_norm".to_string());
            names.push("macd_hist_norm".to_string());
        }
        names
    }

    /// Build feature vectors for every eligible bar
    pub fn build(&self, series: &PriceSeries) -> Result<FeatureSet> {
        let warmup = self.warmup();
        let required = warmup + 1;
        if series.len() < required {
            return Err(ForecastError::InsufficientHistory {
                required,
                available: series.len(),
            });
        }

        let bars = series.bars();
        let closes = series.closes();
        let volumes = series.volumes();
        let w = self.config.window_size;

        // returns[t] is the log return from t-1 to t; returns[0] is unused
        let mut returns = vec![f64::NAN; closes.len()];
        for t in 1..closes.len() {
            returns[t] = (closes[t] / closes[t - 1]).ln();
        }

        let rsi = self.rsi_track(&closes)?;
        let macd = self.macd_track(&closes)?;

        let mut vectors = Vec::with_capacity(closes.len() - warmup);
        let mut dropped = 0;

        for t in warmup..closes.len() {
            let mut values = Vec::with_capacity(self.config.width());

            for &lag in &self.config.lags {
                values.push((closes[t] / closes[t - lag]).ln());
            }

            let window = &returns[t + 1 - w..=t];
            let (mean, std) = mean_and_std(window);
            values.push(mean);
            values.push(std);

            let mean_volume = volumes[t + 1 - w..=t].iter().sum::<f64>() / w as f64;
            values.push(volumes[t] / mean_volume);

            if let Some(rsi) = &rsi {
                values.push(rsi[t] / 100.0);
            }
            if let Some(macd) = &macd {
                values.push(macd[t].0 / closes[t]);
                values.push(macd[t].1 / closes[t]);
            }

            if values.iter().all(|v| v.is_finite()) {
                vectors.push(FeatureVector {
                    index: t,
                    timestamp: bars[t].timestamp,
                    values,
                });
            } else {
                dropped += 1;
            }
        }

        debug!(
            "Built {} feature vectors ({} dropped) from {} bars",
            vectors.len(),
            dropped,
            closes.len()
        );

        Ok(FeatureSet {
            names: self.names(),
            vectors,
            dropped,
        })
    }

    fn rsi_track(&self, closes: &[f64]) -> Result<Option<Vec<f64>>> {
        if !self.config.include_rsi {
            return Ok(None);
        }
        let mut rsi = RelativeStrengthIndex::new(self.config.rsi_period)
            .map_err(|e| ForecastError::InvalidConfig(format!("RSI: {e}")))?;
        Ok(Some(closes.iter().map(|&c| rsi.next(c)).collect()))
    }

    fn macd_track(&self, closes: &[f64]) -> Result<Option<Vec<(f64, f64)>>> {
        if !self.config.include_macd {
            return Ok(None);
        }
        let mut macd = MovingAverageConvergenceDivergence::new(12, 26, 9)
            .map_err(|e| ForecastError::InvalidConfig(format!("MACD: {e}")))?;
        Ok(Some(
            closes
                .iter()
                .map(|&c| {
                    let out = macd.next(c);
                    (out.macd, out.histogram)
                })
                .collect(),
        ))
    }
}

/// Build features with the default lags and indicators for `window_size`
pub fn build_features(series: &PriceSeries, window_size: usize) -> Result<FeatureSet> {
    let config = FeatureConfig {
        window_size,
        ..FeatureConfig::default()
    };
    FeatureBuilder::new(config)?.build(series)
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::test_support::synthetic_series;
    use crate::series::{PriceBar, PriceSeries};
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_insufficient_history() {
        let series = synthetic_series(20);
        let err = build_features(&series, 20).unwrap_err();
        assert!(matches!(
            err,
            ForecastError::InsufficientHistory {
                required: 21,
                available: 20
            }
        ));
    }

    #[test]
    fn test_minimum_series_yields_one_vector() {
        let series = synthetic_series(21);
        let set = build_features(&series, 20).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.vectors[0].index, 20);
        assert_eq!(set.vectors[0].values.len(), set.width());
    }

    #[test]
    fn test_vectors_are_fixed_width_and_finite() {
        let series = synthetic_series(120);
        let builder = FeatureBuilder::new(FeatureConfig::default()).unwrap();
        let set = builder.build(&series).unwrap();

        assert_eq!(set.width(), FeatureConfig::default().width());
        assert_eq!(set.len(), 100);
        assert_eq!(set.dropped, 0);
        for v in &set.vectors {
            assert_eq!(v.values.len(), set.width());
            assert!(v.values.iter().all(|x| x.is_finite()));
        }
        assert!(set.at_index(19).is_none());
        assert!(set.at_index(119).is_some());
    }

    #[test]
    fn test_no_look_ahead() {
        let series = synthetic_series(80);
        let truncated = PriceSeries::new(series.bars()[..60].to_vec()).unwrap();
        let builder = FeatureBuilder::new(FeatureConfig::default()).unwrap();

        let full = builder.build(&series).unwrap();
        let partial = builder.build(&truncated).unwrap();

        for v in &partial.vectors {
            assert_eq!(full.at_index(v.index).unwrap().values, v.values);
        }
    }

    #[test]
    fn test_lag_feature_matches_log_return() {
        let series = synthetic_series(40);
        let builder = FeatureBuilder::new(FeatureConfig::minimal(20)).unwrap();
        let set = builder.build(&series).unwrap();
        let closes = series.closes();

        let v = set.at_index(30).unwrap();
        assert!((v.values[0] - (closes[30] / closes[29]).ln()).abs() < 1e-12);
        assert!((v.values[1] - (closes[30] / closes[25]).ln()).abs() < 1e-12);
        assert!((v.values[2] - (closes[30] / closes[20]).ln()).abs() < 1e-12);
    }

    #[test]
    fn test_zero_volume_window_drops_whole_vector() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars: Vec<PriceBar> = (0..30)
            .map(|i| {
                let close = 50.0 + (i as f64 * 0.7).sin();
                PriceBar::new(
                    start + Duration::days(i),
                    close,
                    close + 1.0,
                    close - 1.0,
                    close,
                    0.0,
                )
            })
            .collect();
        let series = PriceSeries::new(bars).unwrap();
        let set = FeatureBuilder::new(FeatureConfig::minimal(20))
            .unwrap()
            .build(&series)
            .unwrap();

        assert!(set.is_empty());
        assert_eq!(set.dropped, 10);
    }
}
