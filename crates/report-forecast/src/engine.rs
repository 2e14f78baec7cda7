//! Quantile forecast engine
//!
//! Direct multi-step forecasting: for every quantile level and every horizon
//! step `h` a separate linear estimator is fitted on the target
//! `ln(close[t + h] / close[t])`. Predictions for the latest feature vector
//! are repaired for crossings per step, then turned into prices with
//! `last_close * exp(prediction)`.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument};

use crate::artifact::{ArtifactParts, FitDiagnostics, ForecastArtifact, ForecastCurve, ForecastDiagnostics};
use crate::config::ForecastConfig;
use crate::error::{ForecastError, Result};
use crate::estimator::{LinearQuantileRegressor, derive_seed, pinball_loss};
use crate::features::{FeatureBuilder, FeatureSet, FeatureVector};
use crate::repair::{is_monotone, repair};
use crate::series::PriceSeries;

/// Fits per-level, per-step quantile models and produces artifacts
#[derive(Debug, Clone)]
pub struct QuantileForecaster {
    config: ForecastConfig,
    builder: FeatureBuilder,
}

impl QuantileForecaster {
    /// Create a forecaster, validating the configuration
    pub fn new(config: ForecastConfig) -> Result<Self> {
        config.validate()?;
        let builder = FeatureBuilder::new(config.features.clone())?;
        Ok(Self { config, builder })
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    /// Build features for `series` with this forecaster's feature settings
    pub fn build_features(&self, series: &PriceSeries) -> Result<FeatureSet> {
        self.builder.build(series)
    }

    /// Build features and forecast in one call
    pub fn run(&self, ticker: &str, series: &PriceSeries) -> Result<ForecastArtifact> {
        let features = self.build_features(series)?;
        self.forecast(ticker, series, &features)
    }

    /// Forecast from prebuilt features, stamping the artifact with now
    pub fn forecast(
        &self,
        ticker: &str,
        series: &PriceSeries,
        features: &FeatureSet,
    ) -> Result<ForecastArtifact> {
        self.forecast_at(ticker, series, features, Utc::now())
    }

    /// Forecast with an explicit generation timestamp
    ///
    /// Everything except `generated_at` is a pure function of the series,
    /// the features and the configuration (including the seed).
    #[instrument(skip(self, series, features, generated_at), fields(bars = series.len()))]
    pub fn forecast_at(
        &self,
        ticker: &str,
        series: &PriceSeries,
        features: &FeatureSet,
        generated_at: DateTime<Utc>,
    ) -> Result<ForecastArtifact> {
        let n = series.len();
        let required = self.builder.warmup() + 1;
        if n < required {
            return Err(ForecastError::InsufficientHistory {
                required,
                available: n,
            });
        }
        if features.width() != self.config.features.width() {
            return Err(ForecastError::InvalidInput(format!(
                "feature width {} does not match configured width {}",
                features.width(),
                self.config.features.width()
            )));
        }

        let latest = features
            .at_index(n - 1)
            .filter(|v| v.timestamp == series.last().timestamp)
            .ok_or(ForecastError::LatestFeaturesUnavailable)?;

        let horizon = self.config.horizon;
        let training: Vec<&FeatureVector> = features
            .vectors
            .iter()
            .filter(|v| v.index + horizon < n)
            .collect();
        if training.len() < self.config.min_training_samples {
            return Err(ForecastError::InsufficientTrainingData {
                required: self.config.min_training_samples,
                available: training.len(),
            });
        }

        let closes = series.closes();
        let levels = self.config.quantiles.levels();
        let x: Vec<&[f64]> = training.iter().map(|v| v.values.as_slice()).collect();

        // predictions[step - 1][level index], in log-return space
        let mut predictions = vec![vec![0.0; levels.len()]; horizon];
        let mut fits = Vec::with_capacity(horizon * levels.len());

        for step in 1..=horizon {
            let y: Vec<f64> = training
                .iter()
                .map(|v| (closes[v.index + step] / closes[v.index]).ln())
                .collect();

            for (li, level) in levels.iter().enumerate() {
                let seed = derive_seed(self.config.seed, li, step);
                let model = LinearQuantileRegressor::fit(
                    &x,
                    &y,
                    level.value(),
                    &self.config.estimator,
                    seed,
                );

                let pred = model.predict(&latest.values);
                if !pred.is_finite() {
                    return Err(ForecastError::NonFiniteOutput {
                        level: level.value(),
                        step,
                    });
                }
                predictions[step - 1][li] = pred;

                let (loss, covered) = x.iter().zip(&y).fold((0.0, 0_usize), |(loss, covered), (row, &target)| {
                    let fitted = model.predict(row);
                    (
                        loss + pinball_loss(target, fitted, level.value()),
                        covered + usize::from(target <= fitted),
                    )
                });
                fits.push(FitDiagnostics {
                    level: *level,
                    step,
                    pinball_loss: loss / y.len() as f64,
                    coverage: covered as f64 / y.len() as f64,
                });
            }
        }

        let mut crossings_repaired = 0;
        for (i, row) in predictions.iter_mut().enumerate() {
            crossings_repaired += repair(row, self.config.repair);
            if !is_monotone(row) {
                return Err(ForecastError::RepairFailed { step: i + 1 });
            }
        }
        if crossings_repaired > 0 {
            debug!("Repaired {} crossing quantile predictions", crossings_repaired);
        }

        let last_close = series.last().close;
        let mut curves: Vec<ForecastCurve> = levels
            .iter()
            .map(|&level| ForecastCurve {
                level,
                values: Vec::with_capacity(horizon),
            })
            .collect();
        for (i, row) in predictions.iter().enumerate() {
            for (curve, &ret) in curves.iter_mut().zip(row) {
                let price = last_close * ret.exp();
                if !price.is_finite() {
                    return Err(ForecastError::NonFiniteOutput {
                        level: curve.level.value(),
                        step: i + 1,
                    });
                }
                curve.values.push(price);
            }
        }

        let last_timestamp = series.last().timestamp;
        let spacing = bar_spacing(series);
        let step_timestamps = (1..=horizon)
            .map(|h| last_timestamp + spacing * h as i32)
            .collect();

        let artifact = ForecastArtifact::new(ArtifactParts {
            ticker: ticker.to_string(),
            fingerprint: series.fingerprint(),
            config_digest: self.config.digest(),
            horizon,
            last_close,
            last_timestamp,
            step_timestamps,
            curves,
            generated_at,
            diagnostics: ForecastDiagnostics {
                training_samples: training.len(),
                feature_names: features.names.clone(),
                seed: self.config.seed,
                crossings_repaired,
                fits,
            },
        })?;

        info!(
            "Forecast for {} complete: {} levels x {} steps from {} samples",
            ticker,
            levels.len(),
            horizon,
            training.len()
        );
        Ok(artifact)
    }
}

/// Build features and forecast with `config`
pub fn forecast_series(
    ticker: &str,
    series: &PriceSeries,
    config: ForecastConfig,
) -> Result<ForecastArtifact> {
    QuantileForecaster::new(config)?.run(ticker, series)
}

/// Median spacing of the most recent bars, used to date forecast steps
fn bar_spacing(series: &PriceSeries) -> Duration {
    let bars = series.bars();
    let start = bars.len().saturating_sub(21);
    let mut gaps: Vec<Duration> = bars[start..]
        .windows(2)
        .map(|w| w[1].timestamp - w[0].timestamp)
        .collect();
    if gaps.is_empty() {
        return Duration::days(1);
    }
    gaps.sort();
    gaps[gaps.len() / 2]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeatureConfig, RepairMethod};
    use crate::series::PriceBar;
    use crate::series::test_support::synthetic_series;
    use chrono::TimeZone;

    /// Closes growing by a constant log return so the last close sits just
    /// below `f64::MAX`; any upward step from there overflows.
    fn runaway_series(n: usize) -> PriceSeries {
        let growth = 709.5 / (n - 1) as f64;
        let start = Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap();
        let bars = (0..n)
            .map(|i| {
                let close = (growth * i as f64).exp();
                PriceBar::new(start + Duration::days(i as i64), close, close, close, close, 1_000.0)
            })
            .collect();
        PriceSeries::new(bars).unwrap()
    }

    fn stamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn small_config() -> ForecastConfig {
        ForecastConfig::builder()
            .window_size(20)
            .quantiles(&[0.1, 0.5, 0.9])
            .horizon(5)
            .build()
            .unwrap()
    }

    #[test]
    fn test_three_level_example() {
        let series = synthetic_series(300);
        let forecaster = QuantileForecaster::new(small_config()).unwrap();
        let features = forecaster.build_features(&series).unwrap();
        let artifact = forecaster
            .forecast_at("TST", &series, &features, stamp())
            .unwrap();

        assert_eq!(artifact.ticker(), "TST");
        assert_eq!(artifact.horizon(), 5);
        assert_eq!(artifact.curves().len(), 3);
        for curve in artifact.curves() {
            assert_eq!(curve.values.len(), 5);
            assert!(curve.values.iter().all(|v| v.is_finite() && *v > 0.0));
        }
        for step in 1..=5 {
            let v = artifact.values_at(step);
            assert!(v[0] <= v[1] && v[1] <= v[2], "step {step}: {v:?}");
        }
        assert_eq!(artifact.fingerprint(), &series.fingerprint());
        assert_eq!(artifact.generated_at(), stamp());
        assert_eq!(artifact.diagnostics().fits.len(), 15);
        assert_eq!(artifact.diagnostics().training_samples, 275);
    }

    #[test]
    fn test_forecast_is_bit_reproducible() {
        let series = synthetic_series(200);
        let forecaster = QuantileForecaster::new(ForecastConfig::default()).unwrap();
        let features = forecaster.build_features(&series).unwrap();

        let a = forecaster.forecast_at("TST", &series, &features, stamp()).unwrap();
        let b = forecaster.forecast_at("TST", &series, &features, stamp()).unwrap();

        for (ca, cb) in a.curves().iter().zip(b.curves()) {
            let bits_a: Vec<u64> = ca.values.iter().map(|v| v.to_bits()).collect();
            let bits_b: Vec<u64> = cb.values.iter().map(|v| v.to_bits()).collect();
            assert_eq!(bits_a, bits_b);
        }
        assert_eq!(a, b);
    }

    #[test]
    fn test_default_config_stays_near_last_close() {
        let series = synthetic_series(250);
        let artifact = forecast_series("TST", &series, ForecastConfig::default()).unwrap();
        let last = series.last().close;

        assert_eq!(artifact.curves().len(), 7);
        let median = artifact.curve(0.5).unwrap();
        for v in &median.values {
            assert!((v / last - 1.0).abs() < 0.3, "median {v} vs close {last}");
        }
    }

    #[test]
    fn test_insufficient_training_data() {
        let series = synthetic_series(60);
        let config = ForecastConfig::builder()
            .min_training_samples(50)
            .horizon(6)
            .build()
            .unwrap();
        let err = forecast_series("TST", &series, config).unwrap_err();
        // 40 vectors (indices 20..60), of which 34 have a 6-step target
        assert!(matches!(
            err,
            ForecastError::InsufficientTrainingData {
                required: 50,
                available: 34
            }
        ));
    }

    #[test]
    fn test_insufficient_history() {
        let series = synthetic_series(15);
        let err = forecast_series("TST", &series, ForecastConfig::default()).unwrap_err();
        assert!(matches!(err, ForecastError::InsufficientHistory { .. }));
    }

    #[test]
    fn test_overflowing_price_is_non_finite_output() {
        let series = runaway_series(120);
        assert!(series.last().close.is_finite());
        let config = ForecastConfig::builder()
            .features(FeatureConfig::minimal(10))
            .quantiles(&[0.1, 0.5, 0.9])
            .horizon(3)
            .min_training_samples(30)
            .build()
            .unwrap();

        let err = forecast_series("TST", &series, config).unwrap_err();
        assert!(
            matches!(err, ForecastError::NonFiniteOutput { step: 1, .. }),
            "{err:?}"
        );
        assert_eq!(err.kind(), crate::error::ErrorKind::Numeric);
    }

    #[test]
    fn test_config_digest_is_part_of_artifact_id() {
        let series = synthetic_series(200);
        let short = ForecastConfig::builder().horizon(3).build().unwrap();
        let long = ForecastConfig::builder().horizon(10).build().unwrap();

        let a = forecast_series("TST", &series, short.clone()).unwrap();
        let b = forecast_series("TST", &series, long).unwrap();
        let again = forecast_series("TST", &series, short.clone()).unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), again.id());
        assert_eq!(a.config_digest(), &short.digest());
        assert_eq!((a.horizon(), b.horizon()), (3, 10));
    }

    #[test]
    fn test_latest_features_unavailable() {
        let series = synthetic_series(200);
        let forecaster = QuantileForecaster::new(ForecastConfig::default()).unwrap();
        let mut features = forecaster.build_features(&series).unwrap();
        features.vectors.pop();

        let err = forecaster.forecast("TST", &series, &features).unwrap_err();
        assert!(matches!(err, ForecastError::LatestFeaturesUnavailable));
    }

    #[test]
    fn test_mismatched_feature_width() {
        let series = synthetic_series(200);
        let forecaster = QuantileForecaster::new(ForecastConfig::default()).unwrap();
        let features = FeatureBuilder::new(FeatureConfig::minimal(20))
            .unwrap()
            .build(&series)
            .unwrap();

        let err = forecaster.forecast("TST", &series, &features).unwrap_err();
        assert!(matches!(err, ForecastError::InvalidInput(_)));
    }

    #[test]
    fn test_repair_methods_both_yield_monotone_curves() {
        let series = synthetic_series(220);
        for method in [RepairMethod::SuffixMin, RepairMethod::PoolAdjacent] {
            let config = ForecastConfig::builder().repair(method).build().unwrap();
            let artifact = forecast_series("TST", &series, config).unwrap();
            for step in 1..=artifact.horizon() {
                assert!(is_monotone(&artifact.values_at(step)));
            }
        }
    }

    #[test]
    fn test_step_timestamps_follow_bar_spacing() {
        let series = synthetic_series(200);
        let artifact = forecast_series("TST", &series, ForecastConfig::default()).unwrap();
        let last = series.last().timestamp;
        assert_eq!(artifact.step_timestamps()[0], last + Duration::days(1));
        assert_eq!(artifact.step_timestamps()[5], last + Duration::days(6));
    }
}
