//! Technical indicator tracks shared by the charts and the narrative

use report_forecast::PriceSeries;
use report_pipeline::CollaboratorError;
use ta::Next;
use ta::indicators::{
    MovingAverageConvergenceDivergence, RelativeStrengthIndex, SimpleMovingAverage,
};

pub const SMA_SHORT: usize = 20;
pub const SMA_LONG: usize = 50;
pub const RSI_PERIOD: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;

/// One value per bar for every indicator
///
/// Early values are computed from a partial window; use
/// [`Indicators::warmed_up`] to decide where a track becomes meaningful.
#[derive(Debug, Clone, PartialEq)]
pub struct Indicators {
    pub sma_short: Vec<f64>,
    pub sma_long: Vec<f64>,
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
    pub rsi: Vec<f64>,
}

fn indicator_error(name: &str, e: impl std::fmt::Display) -> CollaboratorError {
    CollaboratorError::InvalidInput(format!("{name}: {e}"))
}

impl Indicators {
    pub fn compute(series: &PriceSeries) -> Result<Self, CollaboratorError> {
        let closes = series.closes();

        let mut sma_short =
            SimpleMovingAverage::new(SMA_SHORT).map_err(|e| indicator_error("SMA", e))?;
        let mut sma_long =
            SimpleMovingAverage::new(SMA_LONG).map_err(|e| indicator_error("SMA", e))?;
        let mut rsi = RelativeStrengthIndex::new(RSI_PERIOD).map_err(|e| indicator_error("RSI", e))?;
        let mut macd = MovingAverageConvergenceDivergence::new(MACD_FAST, MACD_SLOW, MACD_SIGNAL)
            .map_err(|e| indicator_error("MACD", e))?;

        let n = closes.len();
        let mut out = Self {
            sma_short: Vec::with_capacity(n),
            sma_long: Vec::with_capacity(n),
            macd: Vec::with_capacity(n),
            signal: Vec::with_capacity(n),
            histogram: Vec::with_capacity(n),
            rsi: Vec::with_capacity(n),
        };
        for &close in &closes {
            out.sma_short.push(sma_short.next(close));
            out.sma_long.push(sma_long.next(close));
            out.rsi.push(rsi.next(close));
            let m = macd.next(close);
            out.macd.push(m.macd);
            out.signal.push(m.signal);
            out.histogram.push(m.histogram);
        }
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.sma_short.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sma_short.is_empty()
    }

    /// Whether a track with `period` has a full window at the last bar
    pub fn warmed_up(&self, period: usize) -> bool {
        self.len() >= period
    }
}

/// Last value of a track, if any
pub fn last(track: &[f64]) -> Option<f64> {
    track.last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_series;

    #[test]
    fn test_tracks_align_with_bars() {
        let series = sample_series(120);
        let ind = Indicators::compute(&series).unwrap();
        assert_eq!(ind.len(), 120);
        assert_eq!(ind.rsi.len(), 120);
        assert!(ind.warmed_up(SMA_LONG));
        assert!(ind.rsi.iter().all(|r| (0.0..=100.0).contains(r)));
        for i in 0..ind.len() {
            assert!((ind.macd[i] - ind.signal[i] - ind.histogram[i]).abs() < 1e-9);
        }
    }

    #[test]
    fn test_sma_matches_window_mean() {
        let series = sample_series(60);
        let ind = Indicators::compute(&series).unwrap();
        let closes = series.closes();
        let expected = closes[40..60].iter().sum::<f64>() / 20.0;
        assert!((last(&ind.sma_short).unwrap() - expected).abs() < 1e-9);
        assert!(!Indicators::compute(&sample_series(10)).unwrap().warmed_up(SMA_SHORT));
    }
}
