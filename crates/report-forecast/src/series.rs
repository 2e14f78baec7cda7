//! Price bars, validated price series and content fingerprints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ForecastError, Result};

/// One OHLCV bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Why a bar was rejected during validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarDefect {
    /// A price or the volume is NaN or infinite
    NonFinite,
    /// open/high/low/close is zero or negative
    NonPositivePrice,
    /// volume is negative
    NegativeVolume,
    /// high is below open or close
    HighBelowBody,
    /// low is above open or close
    LowAboveBody,
    /// another bar already has this timestamp
    DuplicateTimestamp,
}

impl fmt::Display for BarDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NonFinite => "non-finite value",
            Self::NonPositivePrice => "non-positive price",
            Self::NegativeVolume => "negative volume",
            Self::HighBelowBody => "high below max(open, close)",
            Self::LowAboveBody => "low above min(open, close)",
            Self::DuplicateTimestamp => "duplicate timestamp",
        };
        f.write_str(text)
    }
}

/// A rejected bar and the reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarRejection {
    pub timestamp: DateTime<Utc>,
    pub defect: BarDefect,
}

impl PriceBar {
    /// Create a new bar
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Check the per-bar invariants
    pub fn check(&self) -> std::result::Result<(), BarDefect> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().chain(std::iter::once(&self.volume)).any(|v| !v.is_finite()) {
            return Err(BarDefect::NonFinite);
        }
        if prices.iter().any(|&p| p <= 0.0) {
            return Err(BarDefect::NonPositivePrice);
        }
        if self.volume < 0.0 {
            return Err(BarDefect::NegativeVolume);
        }
        if self.high < self.open.max(self.close) {
            return Err(BarDefect::HighBelowBody);
        }
        if self.low > self.open.min(self.close) {
            return Err(BarDefect::LowAboveBody);
        }
        Ok(())
    }
}

/// Chronologically ordered, validated bars
///
/// Timestamps are strictly increasing and every bar passes
/// [`PriceBar::check`]. A series is never empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PriceSeries {
    bars: Vec<PriceBar>,
}

/// Outcome of validating raw bars
#[derive(Debug, Clone)]
pub struct ValidatedSeries {
    pub series: PriceSeries,
    pub rejected: Vec<BarRejection>,
}

impl PriceSeries {
    /// Build a series from bars that must already be valid and ordered
    pub fn new(bars: Vec<PriceBar>) -> Result<Self> {
        if bars.is_empty() {
            return Err(ForecastError::InvalidInput("price series is empty".to_string()));
        }
        for (i, bar) in bars.iter().enumerate() {
            bar.check().map_err(|defect| {
                ForecastError::InvalidInput(format!("bar {i} at {}: {defect}", bar.timestamp))
            })?;
            if i > 0 && bars[i - 1].timestamp >= bar.timestamp {
                return Err(ForecastError::InvalidInput(format!(
                    "bar {i} at {} is not after its predecessor",
                    bar.timestamp
                )));
            }
        }
        Ok(Self { bars })
    }

    /// Sort raw bars by timestamp and drop the ones that break an invariant
    ///
    /// Bad bars are rejected individually; the series survives as long as
    /// at least one bar remains. For duplicate timestamps the first valid
    /// occurrence wins.
    pub fn validate(mut raw: Vec<PriceBar>) -> Result<ValidatedSeries> {
        raw.sort_by_key(|bar| bar.timestamp);

        let mut bars: Vec<PriceBar> = Vec::with_capacity(raw.len());
        let mut rejected = Vec::new();

        for bar in raw {
            if let Err(defect) = bar.check() {
                rejected.push(BarRejection {
                    timestamp: bar.timestamp,
                    defect,
                });
                continue;
            }
            if bars.last().is_some_and(|prev| prev.timestamp == bar.timestamp) {
                rejected.push(BarRejection {
                    timestamp: bar.timestamp,
                    defect: BarDefect::DuplicateTimestamp,
                });
                continue;
            }
            bars.push(bar);
        }

        if bars.is_empty() {
            return Err(ForecastError::InvalidInput(format!(
                "no valid bars remain ({} rejected)",
                rejected.len()
            )));
        }

        Ok(ValidatedSeries {
            series: Self { bars },
            rejected,
        })
    }

    /// All bars, oldest first
    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    /// Number of bars
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Most recent bar
    pub fn last(&self) -> &PriceBar {
        // never empty by construction
        &self.bars[self.bars.len() - 1]
    }

    /// Oldest bar
    pub fn first(&self) -> &PriceBar {
        &self.bars[0]
    }

    /// Closing prices, oldest first
    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    /// Volumes, oldest first
    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.volume).collect()
    }

    /// Content hash of this series
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }
}

/// BLAKE3 content hash of a [`PriceSeries`], hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash every bar's timestamp and OHLCV bytes in order
    pub fn of(series: &PriceSeries) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(series.len() as u64).to_le_bytes());
        for bar in series.bars() {
            hasher.update(&bar.timestamp.timestamp().to_le_bytes());
            hasher.update(&bar.timestamp.timestamp_subsec_nanos().to_le_bytes());
            hasher.update(&bar.open.to_le_bytes());
            hasher.update(&bar.high.to_le_bytes());
            hasher.update(&bar.low.to_le_bytes());
            hasher.update(&bar.close.to_le_bytes());
            hasher.update(&bar.volume.to_le_bytes());
        }
        Self(hasher.finalize().to_hex().to_string())
    }

    /// Full hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for file names and logs
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ts(day: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(day)
    }

    fn bar(day: i64, close: f64) -> PriceBar {
        PriceBar::new(ts(day), close, close + 1.0, close - 1.0, close, 1000.0)
    }

    #[test]
    fn test_bar_checks() {
        assert!(bar(0, 10.0).check().is_ok());

        let mut b = bar(0, 10.0);
        b.high = 9.0;
        assert_eq!(b.check(), Err(BarDefect::HighBelowBody));

        let mut b = bar(0, 10.0);
        b.low = 10.5;
        assert_eq!(b.check(), Err(BarDefect::LowAboveBody));

        let mut b = bar(0, 10.0);
        b.close = f64::NAN;
        assert_eq!(b.check(), Err(BarDefect::NonFinite));

        let mut b = bar(0, 10.0);
        b.volume = -1.0;
        assert_eq!(b.check(), Err(BarDefect::NegativeVolume));

        let b = PriceBar::new(ts(0), 0.0, 1.0, 0.0, 0.5, 1.0);
        assert_eq!(b.check(), Err(BarDefect::NonPositivePrice));
    }

    #[test]
    fn test_validate_sorts_and_rejects_individual_bars() {
        let mut broken = bar(1, 11.0);
        broken.high = 5.0;
        let raw = vec![bar(2, 12.0), broken, bar(0, 10.0), bar(2, 99.0)];

        let validated = PriceSeries::validate(raw).unwrap();
        let closes = validated.series.closes();
        assert_eq!(closes, vec![10.0, 12.0]);
        assert_eq!(validated.rejected.len(), 2);
        assert!(
            validated
                .rejected
                .iter()
                .any(|r| r.defect == BarDefect::HighBelowBody)
        );
        assert!(
            validated
                .rejected
                .iter()
                .any(|r| r.defect == BarDefect::DuplicateTimestamp)
        );
    }

    #[test]
    fn test_validate_all_bad_is_input_error() {
        let mut b = bar(0, 10.0);
        b.open = -1.0;
        let err = PriceSeries::validate(vec![b]).unwrap_err();
        assert!(matches!(err, ForecastError::InvalidInput(_)));
    }

    #[test]
    fn test_new_rejects_unordered() {
        let err = PriceSeries::new(vec![bar(1, 10.0), bar(0, 10.0)]).unwrap_err();
        assert!(matches!(err, ForecastError::InvalidInput(_)));
        assert!(PriceSeries::new(vec![]).is_err());
    }

    #[test]
    fn test_fingerprint_is_content_hash() {
        let a = PriceSeries::new(vec![bar(0, 10.0), bar(1, 11.0)]).unwrap();
        let b = PriceSeries::new(vec![bar(0, 10.0), bar(1, 11.0)]).unwrap();
        let c = PriceSeries::new(vec![bar(0, 10.0), bar(1, 11.5)]).unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().as_str().len(), 64);
        assert_eq!(a.fingerprint().short().len(), 12);
    }
}
