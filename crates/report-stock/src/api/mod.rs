//! Price history sources
//!
//! Both ingestors return raw bars; validation happens in the pipeline.

pub mod csv_file;
pub mod yahoo;

pub use csv_file::CsvIngestor;
pub use yahoo::YahooIngestor;

use chrono::{DateTime, Duration, Utc};
use report_forecast::PriceBar;

/// Median spacing between consecutive bars, if there are at least two
pub fn median_spacing(bars: &[PriceBar]) -> Option<Duration> {
    let mut gaps: Vec<i64> = bars
        .windows(2)
        .map(|w| (w[1].timestamp - w[0].timestamp).num_seconds())
        .filter(|&s| s > 0)
        .collect();
    if gaps.is_empty() {
        return None;
    }
    gaps.sort_unstable();
    Some(Duration::seconds(gaps[gaps.len() / 2]))
}

/// Aggregate bars into buckets of `target` length
///
/// Buckets restart at the first bar of every UTC day, so a session opening
/// at 13:30 produces 13:30, 17:30, ... buckets. Each bucket takes the first
/// open, the highest high, the lowest low, the last close and the summed
/// volume, stamped with its first bar. Bars must be sorted by time.
pub fn resample(bars: &[PriceBar], target: Duration) -> Vec<PriceBar> {
    let bucket_secs = target.num_seconds().max(1);
    let mut out: Vec<PriceBar> = Vec::new();
    let mut day_start: Option<DateTime<Utc>> = None;
    let mut current_key: Option<(chrono::NaiveDate, i64)> = None;

    for bar in bars {
        let day = bar.timestamp.date_naive();
        let start = match day_start {
            Some(s) if s.date_naive() == day => s,
            _ => {
                day_start = Some(bar.timestamp);
                bar.timestamp
            }
        };
        let key = (day, (bar.timestamp - start).num_seconds() / bucket_secs);

        match out.last_mut() {
            Some(agg) if current_key == Some(key) => {
                agg.high = agg.high.max(bar.high);
                agg.low = agg.low.min(bar.low);
                agg.close = bar.close;
                agg.volume += bar.volume;
            }
            _ => {
                out.push(*bar);
                current_key = Some(key);
            }
        }
    }
    out
}

/// Resample when the bars are finer than `target`
pub fn coarsen_to(bars: Vec<PriceBar>, target: Duration) -> Vec<PriceBar> {
    match median_spacing(&bars) {
        Some(spacing) if spacing < target => resample(&bars, target),
        _ => bars,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hourly(day: u32, hours: &[u32]) -> Vec<PriceBar> {
        hours
            .iter()
            .enumerate()
            .map(|(i, &h)| {
                let ts = Utc.with_ymd_and_hms(2024, 3, day, h, 30, 0).unwrap();
                let base = 100.0 + i as f64;
                PriceBar::new(ts, base, base + 2.0, base - 1.0, base + 0.5, 10.0)
            })
            .collect()
    }

    #[test]
    fn test_resample_hourly_to_four_hours() {
        // 7 session hours: 13:30 .. 19:30
        let bars = hourly(4, &[13, 14, 15, 16, 17, 18, 19]);
        let out = resample(&bars, Duration::hours(4));

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].timestamp, bars[0].timestamp);
        assert_eq!(out[0].open, bars[0].open);
        assert_eq!(out[0].close, bars[3].close);
        assert_eq!(out[0].high, bars[3].high);
        assert_eq!(out[0].low, bars[0].low);
        assert!((out[0].volume - 40.0).abs() < 1e-12);
        assert_eq!(out[1].timestamp, bars[4].timestamp);
        assert!((out[1].volume - 30.0).abs() < 1e-12);
    }

    #[test]
    fn test_resample_restarts_each_day() {
        let mut bars = hourly(4, &[13, 14]);
        bars.extend(hourly(5, &[13, 14]));
        let out = resample(&bars, Duration::hours(4));
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].timestamp.date_naive(), bars[2].timestamp.date_naive());
    }

    #[test]
    fn test_coarsen_leaves_coarser_bars_alone() {
        let bars = hourly(4, &[13, 17]);
        assert_eq!(median_spacing(&bars), Some(Duration::hours(4)));
        assert_eq!(coarsen_to(bars.clone(), Duration::hours(4)), bars);
        assert_eq!(median_spacing(&bars[..1]), None);
    }
}
