//! SVG chart rendering
//!
//! Three charts per report: price with moving averages and volume,
//! momentum (MACD and RSI), and the quantile forecast fan.

pub mod indicators;
pub mod svg;

pub use indicators::Indicators;

use async_trait::async_trait;
use report_forecast::{ForecastArtifact, PriceSeries, QuantileSet};
use report_pipeline::{ChartFile, ChartKind, CollaboratorError, Renderer, StageInputs};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

use indicators::{RSI_PERIOD, SMA_LONG, SMA_SHORT};
use svg::{Panel, SvgDocument, extent, palette};

const WIDTH: u32 = 960;
const LEFT: f64 = 64.0;
const PLOT_WIDTH: f64 = 872.0;

/// Bars of history shown before the forecast fan
pub const FAN_HISTORY_BARS: usize = 60;

/// Writes charts to `<output_dir>/<TICKER>/<kind>.svg`
#[derive(Debug, Clone)]
pub struct SvgChartRenderer {
    output_dir: PathBuf,
}

impl SvgChartRenderer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

#[async_trait]
impl Renderer for SvgChartRenderer {
    #[instrument(skip(self, inputs), fields(ticker = %inputs.request.ticker, run_id = %inputs.run_id))]
    async fn render(&self, inputs: &StageInputs) -> Result<Vec<ChartFile>, CollaboratorError> {
        let dir = self.output_dir.join(inputs.request.ticker.as_str());
        tokio::fs::create_dir_all(&dir).await?;

        let indicators = Indicators::compute(&inputs.report_series)?;
        let mut charts = Vec::with_capacity(ChartKind::ALL.len());
        for kind in ChartKind::ALL {
            let title = format!("{} {}", inputs.request.ticker, kind.title());
            let svg = match kind {
                ChartKind::MovingAverage => {
                    moving_average_chart(&title, &inputs.report_series, &indicators)
                }
                ChartKind::Momentum => momentum_chart(&title, &indicators),
                ChartKind::ForecastFan => {
                    forecast_fan_chart(&title, &inputs.forecast_series, &inputs.artifact)?
                }
            };
            let path = dir.join(format!("{}.svg", kind.file_stem()));
            tokio::fs::write(&path, svg).await?;
            debug!(path = %path.display(), "Wrote chart");
            charts.push(ChartFile { kind, path });
        }

        info!(charts = charts.len(), dir = %dir.display(), "Charts rendered");
        Ok(charts)
    }
}

fn indexed(values: &[f64], from: usize) -> Vec<(f64, f64)> {
    values
        .iter()
        .enumerate()
        .skip(from)
        .map(|(i, &v)| (i as f64, v))
        .collect()
}

/// Close with SMA overlays above a volume panel
pub fn moving_average_chart(title: &str, series: &PriceSeries, ind: &Indicators) -> String {
    let bars = series.bars();
    let n = bars.len();
    let closes = series.closes();
    let volumes = series.volumes();

    let short_from = SMA_SHORT.saturating_sub(1);
    let long_from = SMA_LONG.saturating_sub(1);
    let (lo, hi) = extent(
        bars.iter()
            .flat_map(|b| [&b.low, &b.high])
            .chain(ind.sma_short.iter().skip(short_from))
            .chain(ind.sma_long.iter().skip(long_from)),
    )
    .unwrap_or((0.0, 1.0));

    let x_max = (n.max(2) - 1) as f64;
    let price = Panel::new(LEFT, 40.0, PLOT_WIDTH, 300.0)
        .x_range(0.0, x_max)
        .y_range(lo, hi);
    let max_volume = volumes.iter().copied().fold(0.0, f64::max);
    let volume = Panel::new(LEFT, 360.0, PLOT_WIDTH, 100.0)
        .x_range(-0.5, x_max + 0.5)
        .y_fixed(0.0, max_volume.max(1.0));

    let mut doc = SvgDocument::new(WIDTH, 500);
    doc.title(title);
    doc.axes(&price, 5, 2);
    doc.polyline(&price, &indexed(&closes, 0), palette::PRICE, 1.5);
    doc.polyline(&price, &indexed(&ind.sma_short, short_from), palette::SHORT, 1.2);
    doc.polyline(&price, &indexed(&ind.sma_long, long_from), palette::LONG, 1.2);
    doc.legend(
        &price,
        &[
            ("Close", palette::PRICE),
            ("SMA 20", palette::SHORT),
            ("SMA 50", palette::LONG),
        ],
    );

    let slot = volume.width / n.max(1) as f64;
    for (i, bar) in bars.iter().enumerate() {
        let colour = if bar.close >= bar.open {
            palette::UP
        } else {
            palette::DOWN
        };
        let top = volume.py(bar.volume);
        doc.rect(
            volume.px(i as f64) - slot * 0.4,
            top,
            slot * 0.8,
            volume.bottom() - top,
            colour,
            0.5,
        );
    }
    doc.text(LEFT - 6.0, volume.top + 10.0, 10, "end", "Vol");
    date_labels(&mut doc, &price, series, volume.bottom() + 16.0);
    doc.finish()
}

/// MACD with signal and histogram above RSI with 30/70 guides
pub fn momentum_chart(title: &str, ind: &Indicators) -> String {
    let n = ind.len();
    let x_max = (n.max(2) - 1) as f64;

    let (lo, hi) = extent(ind.macd.iter().chain(&ind.signal).chain(&ind.histogram))
        .unwrap_or((-1.0, 1.0));
    let macd = Panel::new(LEFT, 40.0, PLOT_WIDTH, 220.0)
        .x_range(-0.5, x_max + 0.5)
        .y_range(lo.min(0.0), hi.max(0.0));
    let rsi = Panel::new(LEFT, 290.0, PLOT_WIDTH, 150.0)
        .x_range(-0.5, x_max + 0.5)
        .y_fixed(0.0, 100.0);

    let mut doc = SvgDocument::new(WIDTH, 470);
    doc.title(title);
    doc.axes(&macd, 5, 2);

    let slot = macd.width / n.max(1) as f64;
    let zero = macd.py(0.0);
    for (i, &h) in ind.histogram.iter().enumerate() {
        let y = macd.py(h);
        let colour = if h >= 0.0 { palette::UP } else { palette::DOWN };
        doc.rect(
            macd.px(i as f64) - slot * 0.4,
            y.min(zero),
            slot * 0.8,
            (zero - y).abs(),
            colour,
            0.6,
        );
    }
    doc.polyline(&macd, &indexed(&ind.macd, 0), palette::SHORT, 1.2);
    doc.polyline(&macd, &indexed(&ind.signal, 0), palette::SIGNAL, 1.2);
    doc.legend(
        &macd,
        &[
            ("MACD 12/26", palette::SHORT),
            ("Signal 9", palette::SIGNAL),
        ],
    );

    doc.axes(&rsi, 3, 0);
    for level in [30.0, 70.0] {
        let y = rsi.py(level);
        doc.line(rsi.left, y, rsi.right(), y, palette::SIGNAL, true);
    }
    doc.polyline(&rsi, &indexed(&ind.rsi, RSI_PERIOD), palette::RSI, 1.2);
    doc.legend(&rsi, &[("RSI 14", palette::RSI)]);
    doc.finish()
}

/// History tail followed by nested quantile bands and the median path
pub fn forecast_fan_chart(
    title: &str,
    series: &PriceSeries,
    artifact: &ForecastArtifact,
) -> Result<String, CollaboratorError> {
    let levels = QuantileSet::try_from(artifact.levels())
        .map_err(|e| CollaboratorError::Malformed(format!("forecast levels: {e}")))?;

    let bars = series.bars();
    let tail = &bars[bars.len().saturating_sub(FAN_HISTORY_BARS)..];
    let secs = |t: chrono::DateTime<chrono::Utc>| t.timestamp() as f64;

    let origin = (secs(artifact.last_timestamp()), artifact.last_close());
    let path = |values: &[f64]| -> Vec<(f64, f64)> {
        std::iter::once(origin)
            .chain(
                artifact
                    .step_timestamps()
                    .iter()
                    .zip(values)
                    .map(|(&t, &v)| (secs(t), v)),
            )
            .collect()
    };
    let history: Vec<(f64, f64)> = tail.iter().map(|b| (secs(b.timestamp), b.close)).collect();

    let x_min = history.first().map_or(origin.0, |p| p.0);
    let x_max = artifact
        .step_timestamps()
        .last()
        .map_or(origin.0, |&t| secs(t));
    let (lo, hi) = extent(
        history
            .iter()
            .map(|p| &p.1)
            .chain(artifact.curves().iter().flat_map(|c| c.values.iter()))
            .chain(std::iter::once(&origin.1)),
    )
    .unwrap_or((0.0, 1.0));
    let panel = Panel::new(LEFT, 40.0, PLOT_WIDTH, 360.0)
        .x_range(x_min, x_max)
        .y_range(lo, hi);

    let mut doc = SvgDocument::new(WIDTH, 450);
    doc.title(title);
    doc.axes(&panel, 5, 2);

    let curves = artifact.curves();
    let bands = levels.symmetric_bands();
    let mut legend: Vec<(String, &str)> = Vec::new();
    for (depth, &(lower, upper)) in bands.iter().enumerate() {
        let opacity = 0.12 + 0.12 * depth as f64;
        doc.band(
            &panel,
            &path(&curves[lower].values),
            &path(&curves[upper].values),
            palette::FAN,
            opacity,
        );
        legend.push((
            format!(
                "{}-{} band",
                curves[lower].level.label(),
                curves[upper].level.label()
            ),
            palette::FAN,
        ));
    }
    if bands.is_empty() {
        for curve in curves {
            doc.polyline(&panel, &path(&curve.values), palette::FAN, 1.0);
        }
    }

    let x_split = panel.px(origin.0);
    doc.line(x_split, panel.top, x_split, panel.bottom(), palette::VOLUME, true);
    doc.polyline(&panel, &history, palette::PRICE, 1.5);
    if let Some(median) = levels.median_index() {
        doc.polyline(&panel, &path(&curves[median].values), palette::LONG, 1.8);
        legend.push(("Median".to_string(), palette::LONG));
    }
    legend.insert(0, ("Close".to_string(), palette::PRICE));
    let entries: Vec<(&str, &str)> = legend.iter().map(|(l, c)| (l.as_str(), *c)).collect();
    doc.legend(&panel, &entries);

    let first = tail.first().map_or(artifact.last_timestamp(), |b| b.timestamp);
    let last = artifact
        .step_timestamps()
        .last()
        .copied()
        .unwrap_or(artifact.last_timestamp());
    doc.text(panel.left, panel.bottom() + 16.0, 10, "start", &first.format("%Y-%m-%d").to_string());
    doc.text(panel.right(), panel.bottom() + 16.0, 10, "end", &last.format("%Y-%m-%d %H:%M").to_string());
    doc.text(x_split, panel.bottom() + 16.0, 10, "middle", "forecast start");
    Ok(doc.finish())
}

fn date_labels(doc: &mut SvgDocument, panel: &Panel, series: &PriceSeries, y: f64) {
    let first = series.first().timestamp.format("%Y-%m-%d").to_string();
    let last = series.last().timestamp.format("%Y-%m-%d").to_string();
    doc.text(panel.left, y, 10, "start", &first);
    doc.text(panel.right(), y, 10, "end", &last);
}
