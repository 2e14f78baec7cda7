//! Quantile levels and ordered level sets

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ForecastError, Result};

/// Levels of the default fan: 90/70/50% bands around the median
pub const DEFAULT_QUANTILES: [f64; 7] = [0.05, 0.15, 0.25, 0.50, 0.75, 0.85, 0.95];

/// A quantile level strictly inside (0, 1)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct QuantileLevel(f64);

impl QuantileLevel {
    /// Create a level, rejecting anything outside (0, 1)
    pub fn new(value: f64) -> Result<Self> {
        if value.is_finite() && value > 0.0 && value < 1.0 {
            Ok(Self(value))
        } else {
            Err(ForecastError::InvalidConfig(format!(
                "quantile level {value} is outside (0, 1)"
            )))
        }
    }

    /// The level as a probability
    pub fn value(self) -> f64 {
        self.0
    }

    /// Label such as `q05` or `q50`, used for chart legends and tables
    pub fn label(self) -> String {
        let pct = self.0 * 100.0;
        if (pct - pct.round()).abs() < 1e-9 {
            format!("q{:02}", pct.round() as u32)
        } else {
            format!("q{pct:.1}")
        }
    }
}

impl TryFrom<f64> for QuantileLevel {
    type Error = ForecastError;

    fn try_from(value: f64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<QuantileLevel> for f64 {
    fn from(level: QuantileLevel) -> Self {
        level.0
    }
}

impl fmt::Display for QuantileLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Non-empty set of distinct quantile levels in ascending order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<QuantileLevel>", into = "Vec<QuantileLevel>")]
pub struct QuantileSet(Vec<QuantileLevel>);

impl QuantileSet {
    /// Build a set from raw values; they must already be strictly ascending
    pub fn new(values: &[f64]) -> Result<Self> {
        let levels = values
            .iter()
            .map(|&v| QuantileLevel::new(v))
            .collect::<Result<Vec<_>>>()?;
        Self::try_from(levels)
    }

    /// Levels, lowest first
    pub fn levels(&self) -> &[QuantileLevel] {
        &self.0
    }

    /// Number of levels
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; a set has at least one level
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Pair up levels symmetric around the median, outermost first
    ///
    /// `[0.05, 0.25, 0.5, 0.75, 0.95]` yields `[(0, 4), (1, 3)]`. Used to
    /// draw nested bands of the forecast fan.
    pub fn symmetric_bands(&self) -> Vec<(usize, usize)> {
        let n = self.0.len();
        (0..n / 2)
            .filter(|&i| (self.0[i].value() + self.0[n - 1 - i].value() - 1.0).abs() < 1e-9)
            .map(|i| (i, n - 1 - i))
            .collect()
    }

    /// Index of the 0.5 level, if configured
    pub fn median_index(&self) -> Option<usize> {
        self.0.iter().position(|l| (l.value() - 0.5).abs() < 1e-12)
    }
}

impl Default for QuantileSet {
    fn default() -> Self {
        Self(DEFAULT_QUANTILES.iter().map(|&v| QuantileLevel(v)).collect())
    }
}

impl TryFrom<Vec<QuantileLevel>> for QuantileSet {
    type Error = ForecastError;

    fn try_from(levels: Vec<QuantileLevel>) -> Result<Self> {
        if levels.is_empty() {
            return Err(ForecastError::InvalidConfig(
                "at least one quantile level is required".to_string(),
            ));
        }
        if let Some(pair) = levels.windows(2).find(|w| w[0].value() >= w[1].value()) {
            return Err(ForecastError::InvalidConfig(format!(
                "quantile levels must be distinct and ascending ({} then {})",
                pair[0], pair[1]
            )));
        }
        Ok(Self(levels))
    }
}

impl From<QuantileSet> for Vec<QuantileLevel> {
    fn from(set: QuantileSet) -> Self {
        set.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_bounds() {
        assert!(QuantileLevel::new(0.5).is_ok());
        assert!(QuantileLevel::new(0.0).is_err());
        assert!(QuantileLevel::new(1.0).is_err());
        assert!(QuantileLevel::new(f64::NAN).is_err());
    }

    #[test]
    fn test_level_labels() {
        assert_eq!(QuantileLevel::new(0.05).unwrap().label(), "q05");
        assert_eq!(QuantileLevel::new(0.5).unwrap().label(), "q50");
        assert_eq!(QuantileLevel::new(0.025).unwrap().label(), "q2.5");
    }

    #[test]
    fn test_set_must_be_ascending_and_distinct() {
        assert!(QuantileSet::new(&[0.1, 0.5, 0.9]).is_ok());
        assert!(QuantileSet::new(&[0.5, 0.1]).is_err());
        assert!(QuantileSet::new(&[0.1, 0.1]).is_err());
        assert!(QuantileSet::new(&[]).is_err());
    }

    #[test]
    fn test_default_set_is_valid() {
        let set = QuantileSet::default();
        let values: Vec<f64> = set.levels().iter().map(|l| l.value()).collect();
        assert!(QuantileSet::new(&values).is_ok());
        assert_eq!(set.len(), DEFAULT_QUANTILES.len());
    }

    #[test]
    fn test_symmetric_bands() {
        let set = QuantileSet::new(&[0.05, 0.15, 0.25, 0.5, 0.75, 0.85, 0.95]).unwrap();
        assert_eq!(set.symmetric_bands(), vec![(0, 6), (1, 5), (2, 4)]);
        assert_eq!(set.median_index(), Some(3));

        let lopsided = QuantileSet::new(&[0.1, 0.6]).unwrap();
        assert!(lopsided.symmetric_bands().is_empty());
    }

    #[test]
    fn test_serde_validates() {
        let ok: QuantileSet = serde_json::from_str("[0.1,0.5,0.9]").unwrap();
        assert_eq!(ok.len(), 3);
        assert!(serde_json::from_str::<QuantileSet>("[0.9,0.1]").is_err());
        assert!(serde_json::from_str::<QuantileLevel>("1.5").is_err());
    }
}
