//! Immutable forecast artifacts
//!
//! A [`ForecastArtifact`] is the single hand-off between the forecast stage
//! and everything downstream. Fields are private; construction goes through
//! [`ForecastArtifact::new`] which checks the invariants, and artifacts read
//! back from disk are re-checked with [`ForecastArtifact::validate`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{CONFIG_DIGEST_LEN, ConfigDigest};
use crate::error::{ForecastError, Result};
use crate::quantile::QuantileLevel;
use crate::repair::is_monotone;
use crate::series::Fingerprint;

/// Version of the persisted artifact layout
pub const ARTIFACT_SCHEMA_VERSION: u32 = 2;

/// Store key `<ticker>-<series fingerprint>-<config digest>`
///
/// The same bars forecast under a different configuration get a different
/// id, so a stored artifact is only ever reused for an identical fit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    pub fn new(ticker: &str, fingerprint: &Fingerprint, config: &ConfigDigest) -> Self {
        Self(format!("{ticker}-{fingerprint}-{config}"))
    }

    /// Parse an id previously produced by [`ArtifactId::new`]
    pub fn parse(raw: &str) -> Option<Self> {
        split(raw).map(|_| Self(raw.to_string()))
    }

    /// `(ticker, fingerprint, config digest)`; tickers may contain `-`
    pub fn parts(&self) -> Option<(&str, &str, &str)> {
        split(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn split(raw: &str) -> Option<(&str, &str, &str)> {
    let (rest, config) = raw.rsplit_once('-')?;
    let (ticker, fingerprint) = rest.rsplit_once('-')?;
    let is_hex = |s: &str, len: usize| s.len() == len && s.chars().all(|c| c.is_ascii_hexdigit());
    (!ticker.is_empty() && is_hex(fingerprint, 64) && is_hex(config, CONFIG_DIGEST_LEN))
        .then_some((ticker, fingerprint, config))
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Forecast prices for one quantile level, one value per horizon step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastCurve {
    pub level: QuantileLevel,
    pub values: Vec<f64>,
}

/// In-sample fit quality for one (level, step) estimator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitDiagnostics {
    pub level: QuantileLevel,
    /// 1-based horizon step
    pub step: usize,
    /// Mean pinball loss on the training targets (log returns)
    pub pinball_loss: f64,
    /// Share of training targets at or below the fitted quantile
    pub coverage: f64,
}

/// Summary of how a forecast was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastDiagnostics {
    pub training_samples: usize,
    pub feature_names: Vec<String>,
    pub seed: u64,
    /// Quantile predictions changed by monotonicity repair
    pub crossings_repaired: usize,
    pub fits: Vec<FitDiagnostics>,
}

impl ForecastDiagnostics {
    /// Mean absolute gap between nominal level and in-sample coverage
    pub fn mean_calibration_error(&self) -> f64 {
        if self.fits.is_empty() {
            return 0.0;
        }
        self.fits
            .iter()
            .map(|f| (f.coverage - f.level.value()).abs())
            .sum::<f64>()
            / self.fits.len() as f64
    }
}

/// Parts of an artifact before validation
#[derive(Debug, Clone)]
pub struct ArtifactParts {
    pub ticker: String,
    pub fingerprint: Fingerprint,
    pub config_digest: ConfigDigest,
    pub horizon: usize,
    pub last_close: f64,
    pub last_timestamp: DateTime<Utc>,
    pub step_timestamps: Vec<DateTime<Utc>>,
    pub curves: Vec<ForecastCurve>,
    pub generated_at: DateTime<Utc>,
    pub diagnostics: ForecastDiagnostics,
}

/// Versioned, immutable snapshot of one forecast run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastArtifact {
    schema_version: u32,
    ticker: String,
    fingerprint: Fingerprint,
    /// Digest of the configuration the curves were fitted with
    config_digest: ConfigDigest,
    horizon: usize,
    last_close: f64,
    last_timestamp: DateTime<Utc>,
    /// Projected timestamp of each horizon step
    step_timestamps: Vec<DateTime<Utc>>,
    /// Ascending by level
    curves: Vec<ForecastCurve>,
    generated_at: DateTime<Utc>,
    diagnostics: ForecastDiagnostics,
}

impl ForecastArtifact {
    /// Assemble and validate an artifact
    pub fn new(parts: ArtifactParts) -> Result<Self> {
        let artifact = Self {
            schema_version: ARTIFACT_SCHEMA_VERSION,
            ticker: parts.ticker,
            fingerprint: parts.fingerprint,
            config_digest: parts.config_digest,
            horizon: parts.horizon,
            last_close: parts.last_close,
            last_timestamp: parts.last_timestamp,
            step_timestamps: parts.step_timestamps,
            curves: parts.curves,
            generated_at: parts.generated_at,
            diagnostics: parts.diagnostics,
        };
        artifact.validate()?;
        Ok(artifact)
    }

    /// Check every invariant of the artifact
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(ForecastError::InvalidInput(msg));

        if self.schema_version != ARTIFACT_SCHEMA_VERSION {
            return invalid(format!(
                "unsupported schema version {} (expected {ARTIFACT_SCHEMA_VERSION})",
                self.schema_version
            ));
        }
        if self.ticker.is_empty() {
            return invalid("empty ticker".to_string());
        }
        if self.config_digest.as_str().len() != CONFIG_DIGEST_LEN {
            return invalid(format!("malformed config digest '{}'", self.config_digest));
        }
        if self.horizon == 0 {
            return invalid("horizon is zero".to_string());
        }
        if !(self.last_close.is_finite() && self.last_close > 0.0) {
            return invalid(format!("last close {} is not a positive price", self.last_close));
        }
        if self.curves.is_empty() {
            return invalid("no forecast curves".to_string());
        }
        if self.step_timestamps.len() != self.horizon {
            return invalid(format!(
                "{} step timestamps for horizon {}",
                self.step_timestamps.len(),
                self.horizon
            ));
        }
        if self
            .curves
            .windows(2)
            .any(|w| w[0].level.value() >= w[1].level.value())
        {
            return invalid("curve levels are not strictly ascending".to_string());
        }
        for curve in &self.curves {
            if curve.values.len() != self.horizon {
                return invalid(format!(
                    "curve {} has {} values for horizon {}",
                    curve.level.label(),
                    curve.values.len(),
                    self.horizon
                ));
            }
            if let Some(step) = curve.values.iter().position(|v| !v.is_finite()) {
                return Err(ForecastError::NonFiniteOutput {
                    level: curve.level.value(),
                    step: step + 1,
                });
            }
        }
        for step in 1..=self.horizon {
            if !is_monotone(&self.values_at(step)) {
                return Err(ForecastError::RepairFailed { step });
            }
        }
        Ok(())
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn id(&self) -> ArtifactId {
        ArtifactId::new(&self.ticker, &self.fingerprint, &self.config_digest)
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn config_digest(&self) -> &ConfigDigest {
        &self.config_digest
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Close of the last bar the forecast starts from
    pub fn last_close(&self) -> f64 {
        self.last_close
    }

    pub fn last_timestamp(&self) -> DateTime<Utc> {
        self.last_timestamp
    }

    pub fn step_timestamps(&self) -> &[DateTime<Utc>] {
        &self.step_timestamps
    }

    /// All curves, lowest level first
    pub fn curves(&self) -> &[ForecastCurve] {
        &self.curves
    }

    /// Curve for an exact level
    pub fn curve(&self, level: f64) -> Option<&ForecastCurve> {
        self.curves
            .iter()
            .find(|c| (c.level.value() - level).abs() < 1e-12)
    }

    /// Predictions across levels at a 1-based step, lowest level first
    pub fn values_at(&self, step: usize) -> Vec<f64> {
        self.curves
            .iter()
            .filter_map(|c| c.values.get(step.wrapping_sub(1)).copied())
            .collect()
    }

    pub fn levels(&self) -> Vec<QuantileLevel> {
        self.curves.iter().map(|c| c.level).collect()
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn diagnostics(&self) -> &ForecastDiagnostics {
        &self.diagnostics
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::sample_artifact;
    use super::*;

    #[test]
    fn test_accessors() {
        let artifact = sample_artifact("TST", 0xab, 0);
        assert_eq!(artifact.schema_version(), ARTIFACT_SCHEMA_VERSION);
        assert_eq!(artifact.values_at(1), vec![97.0, 103.0]);
        assert!(artifact.values_at(0).is_empty());
        assert!(artifact.curve(0.9).is_some());
        assert!(artifact.curve(0.5).is_none());
        assert!(artifact.id().as_str().starts_with("TST-abab"));
        assert!(
            artifact
                .id()
                .as_str()
                .ends_with(artifact.config_digest().as_str())
        );
    }

    #[test]
    fn test_artifact_id_parse() {
        let artifact = sample_artifact("BRK-B", 0x01, 0);
        let id = artifact.id();
        assert_eq!(ArtifactId::parse(id.as_str()), Some(id.clone()));
        let (ticker, fingerprint, config) = id.parts().unwrap();
        assert_eq!(ticker, "BRK-B");
        assert_eq!(fingerprint, artifact.fingerprint().as_str());
        assert_eq!(config, artifact.config_digest().as_str());

        assert!(ArtifactId::parse("TST-xyz").is_none());
        assert!(ArtifactId::parse("nohyphen").is_none());
        // fingerprint without a config digest
        assert!(ArtifactId::parse(&format!("TST-{}", "ab".repeat(32))).is_none());
    }

    #[test]
    fn test_config_changes_artifact_id() {
        use super::test_support::sample_artifact_for;
        use crate::config::ForecastConfig;

        let longer = ForecastConfig::builder().horizon(10).build().unwrap();
        let a = sample_artifact("TST", 1, 0);
        let b = sample_artifact_for(&longer, "TST", 1, 0);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_validate_rejects_crossing_curves() {
        let artifact = sample_artifact("TST", 1, 0);
        let mut json = serde_json::to_value(&artifact).unwrap();
        json["curves"][0]["values"][2] = serde_json::json!(200.0);
        let tampered: ForecastArtifact = serde_json::from_value(json).unwrap();
        assert!(matches!(
            tampered.validate(),
            Err(ForecastError::RepairFailed { step: 3 })
        ));
    }

    #[test]
    fn test_validate_rejects_wrong_curve_length_and_version() {
        let artifact = sample_artifact("TST", 1, 0);

        let mut json = serde_json::to_value(&artifact).unwrap();
        json["curves"][1]["values"] = serde_json::json!([1.0]);
        let short: ForecastArtifact = serde_json::from_value(json).unwrap();
        assert!(short.validate().is_err());

        let mut json = serde_json::to_value(&artifact).unwrap();
        json["schema_version"] = serde_json::json!(99);
        let future: ForecastArtifact = serde_json::from_value(json).unwrap();
        assert!(future.validate().is_err());
    }

    #[test]
    fn test_calibration_error() {
        let mut diagnostics = sample_artifact("TST", 1, 0).diagnostics().clone();
        assert_eq!(diagnostics.mean_calibration_error(), 0.0);
        diagnostics.fits.push(FitDiagnostics {
            level: QuantileLevel::new(0.9).unwrap(),
            step: 1,
            pinball_loss: 0.01,
            coverage: 0.8,
        });
        assert!((diagnostics.mean_calibration_error() - 0.1).abs() < 1e-12);
    }
}
