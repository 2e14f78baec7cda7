//! Stock report collaborators
//!
//! Concrete implementations of the pipeline seams:
//!
//! - [`api`]: Yahoo Finance and CSV price history ([`YahooIngestor`], [`CsvIngestor`])
//! - [`charts`]: moving-average, momentum and forecast-fan SVG charts ([`SvgChartRenderer`])
//! - [`narrative`]: LLM-written analysis from a Jinja prompt ([`LlmNarrator`])
//! - [`report`]: the final markdown document ([`MarkdownAssembler`])
//!
//! # Example
//!
//! ```rust,ignore
//! use report_pipeline::{Collaborators, Orchestrator};
//! use report_stock::{LlmNarrator, MarkdownAssembler, SvgChartRenderer, YahooIngestor};
//!
//! let collaborators = Collaborators {
//!     ingestor: Arc::new(YahooIngestor::new()?),
//!     renderer: Arc::new(SvgChartRenderer::new("output/charts")),
//!     narrator: Some(Arc::new(LlmNarrator::new(provider)?)),
//!     assembler: Arc::new(MarkdownAssembler::new("output")),
//! };
//! ```

pub mod api;
pub mod charts;
pub mod narrative;
pub mod report;

pub use api::{CsvIngestor, YahooIngestor};
pub use charts::SvgChartRenderer;
pub use narrative::LlmNarrator;
pub use report::{MarkdownAssembler, forecast_table};

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{Duration, TimeZone, Utc};
    use report_forecast::artifact::ArtifactParts;
    use report_forecast::{
        ForecastArtifact, ForecastConfig, ForecastCurve, ForecastDiagnostics, PriceBar,
        PriceSeries, QuantileLevel,
    };
    use report_pipeline::{ReportRequest, StageInputs, Ticker, Timeframe};
    use std::sync::Arc;
    use uuid::Uuid;

    /// Daily bars with drift and a few overlapping cycles
    pub fn sample_series(n: usize) -> PriceSeries {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let bars = (0..n)
            .map(|i| {
                let t = i as f64;
                let close = 150.0 * (1.0 + 0.001 * t) + 4.0 * (t / 9.0).sin() + 1.5 * (t / 2.7).cos();
                let open = close - 0.6 * (t / 3.0).sin();
                PriceBar::new(
                    start + Duration::days(i as i64),
                    open,
                    open.max(close) + 0.8,
                    open.min(close) - 0.8,
                    close,
                    2_000_000.0 + 300_000.0 * (t / 4.0).sin(),
                )
            })
            .collect();
        PriceSeries::new(bars).unwrap()
    }

    /// Five-step artifact fanning out symmetrically from the last close
    pub fn sample_artifact(series: &PriceSeries, levels: &[f64]) -> ForecastArtifact {
        let last = series.last();
        let horizon = 5;
        let curves = levels
            .iter()
            .map(|&level| ForecastCurve {
                level: QuantileLevel::new(level).unwrap(),
                values: (1..=horizon)
                    .map(|step| last.close * (1.0 + (level - 0.5) * 0.02 * step as f64))
                    .collect(),
            })
            .collect();
        ForecastArtifact::new(ArtifactParts {
            ticker: "TST".to_string(),
            fingerprint: series.fingerprint(),
            config_digest: ForecastConfig::default().digest(),
            horizon,
            last_close: last.close,
            last_timestamp: last.timestamp,
            step_timestamps: (1..=horizon as i64)
                .map(|d| last.timestamp + Duration::days(d))
                .collect(),
            curves,
            generated_at: Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap(),
            diagnostics: ForecastDiagnostics {
                training_samples: 90,
                feature_names: vec!["ret_lag_1".to_string(), "rsi".to_string()],
                seed: 42,
                crossings_repaired: 1,
                fits: Vec::new(),
            },
        })
        .unwrap()
    }

    /// Inputs for ticker TST with a three-level forecast
    pub fn sample_inputs(n: usize) -> StageInputs {
        let series = Arc::new(sample_series(n));
        let artifact = Arc::new(sample_artifact(&series, &[0.1, 0.5, 0.9]));
        StageInputs {
            run_id: Uuid::new_v4(),
            request: ReportRequest::new(Ticker::new("TST").unwrap(), Timeframe::SixMonths),
            report_series: Arc::clone(&series),
            forecast_series: series,
            artifact,
        }
    }
}
