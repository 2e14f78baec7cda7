//! Numeric summary of the report window fed to the narrative prompt

use report_forecast::PriceSeries;
use serde::Serialize;

use crate::charts::Indicators;
use crate::charts::indicators::{RSI_PERIOD, SMA_LONG, SMA_SHORT, last};

/// Bars in the "recent performance" block
pub const RECENT_BARS: usize = 10;

/// Market data and indicator readings at the last bar
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataSummary {
    pub bars: usize,
    pub start: String,
    pub end: String,
    pub last_close: f64,
    /// Percent change from the first close
    pub change_pct: f64,
    pub high: f64,
    pub low: f64,
    pub avg_volume: f64,
    pub rsi: Option<f64>,
    pub macd: f64,
    pub macd_histogram: f64,
    pub sma_short: Option<f64>,
    pub sma_long: Option<f64>,
    pub price_vs_sma_short_pct: Option<f64>,
    pub price_vs_sma_long_pct: Option<f64>,
    pub sma_short_vs_long_pct: Option<f64>,
    pub recent_high: f64,
    pub recent_low: f64,
    pub recent_avg_volume: f64,
}

fn pct(from: f64, to: f64) -> f64 {
    (to - from) / from * 100.0
}

fn mean(values: impl ExactSizeIterator<Item = f64>) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    values.sum::<f64>() / n as f64
}

impl DataSummary {
    /// Summarize `series`; `ind` must be computed from the same series
    pub fn new(series: &PriceSeries, ind: &Indicators) -> Self {
        let bars = series.bars();
        let first = series.first();
        let latest = series.last();
        let recent = &bars[bars.len().saturating_sub(RECENT_BARS)..];

        let sma_short = last(&ind.sma_short).filter(|_| ind.warmed_up(SMA_SHORT));
        let sma_long = last(&ind.sma_long).filter(|_| ind.warmed_up(SMA_LONG));
        let rsi = last(&ind.rsi).filter(|_| ind.warmed_up(RSI_PERIOD + 1));

        Self {
            bars: bars.len(),
            start: first.timestamp.format("%Y-%m-%d %H:%M").to_string(),
            end: latest.timestamp.format("%Y-%m-%d %H:%M").to_string(),
            last_close: latest.close,
            change_pct: pct(first.close, latest.close),
            high: bars.iter().map(|b| b.high).fold(f64::MIN, f64::max),
            low: bars.iter().map(|b| b.low).fold(f64::MAX, f64::min),
            avg_volume: mean(bars.iter().map(|b| b.volume)),
            rsi,
            macd: last(&ind.macd).unwrap_or_default(),
            macd_histogram: last(&ind.histogram).unwrap_or_default(),
            sma_short,
            sma_long,
            price_vs_sma_short_pct: sma_short.map(|s| pct(s, latest.close)),
            price_vs_sma_long_pct: sma_long.map(|s| pct(s, latest.close)),
            sma_short_vs_long_pct: sma_short.zip(sma_long).map(|(s, l)| pct(l, s)),
            recent_high: recent.iter().map(|b| b.high).fold(f64::MIN, f64::max),
            recent_low: recent.iter().map(|b| b.low).fold(f64::MAX, f64::min),
            recent_avg_volume: mean(recent.iter().map(|b| b.volume)),
        }
    }
}
