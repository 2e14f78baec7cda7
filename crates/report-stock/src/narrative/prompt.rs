//! Jinja templates for the narrative request

use chrono::{DateTime, Utc};
use minijinja::{Environment, context};
use report_forecast::ForecastArtifact;
use report_pipeline::{ChartFile, CollaboratorError, REQUIRED_SECTIONS, StageInputs};
use serde::Serialize;

use super::summary::DataSummary;

pub const SYSTEM_PROMPT: &str = "You are a senior equity analyst and trader with 20+ years of \
experience in technical analysis. You write precise, professional investment reports with \
exact price levels and clearly stated risks. You never invent data that was not provided.";

const ANALYSIS_TEMPLATE: &str = r#"Prepare a professional technical report for {{ ticker }}.

## Market data ({{ window }})
- Bars: {{ summary.bars }}
- Date range: {{ summary.start }} to {{ summary.end }}
- Last close: ${{ summary.last_close | fixed(2) }}
- Change over the window: {{ summary.change_pct | fixed(2) }}%
- Window high / low: ${{ summary.high | fixed(2) }} / ${{ summary.low | fixed(2) }}
- Average volume: {{ summary.avg_volume | thousands }}

## Indicators at the last bar
{% if summary.rsi is not none %}- RSI (14): {{ summary.rsi | fixed(2) }}
{% endif %}- MACD (12/26/9): {{ summary.macd | fixed(4) }}, histogram {{ summary.macd_histogram | fixed(4) }}
{% if summary.sma_short is not none %}- SMA 20: ${{ summary.sma_short | fixed(2) }} (price {{ summary.price_vs_sma_short_pct | fixed(2) }}% vs SMA 20)
{% endif %}{% if summary.sma_long is not none %}- SMA 50: ${{ summary.sma_long | fixed(2) }} (price {{ summary.price_vs_sma_long_pct | fixed(2) }}% vs SMA 50, SMA 20 {{ summary.sma_short_vs_long_pct | fixed(2) }}% vs SMA 50)
{% endif %}
## Last {{ recent_bars }} bars
- High / low: ${{ summary.recent_high | fixed(2) }} / ${{ summary.recent_low | fixed(2) }}
- Average volume: {{ summary.recent_avg_volume | thousands }}

## Quantile price forecast
Trained on {{ forecast.training_samples }} samples of {{ forecast_window }} bars; the fan starts from the close of {{ forecast.last_close | fixed(2) }} at {{ forecast.start }}.

| Step | Time |{% for label in forecast.labels %} {{ label }} |{% endfor %}
|---|---|{% for label in forecast.labels %}---|{% endfor %}
{% for row in forecast.rows %}| {{ row.step }} | {{ row.time }} |{% for value in row.values %} {{ value | fixed(2) }} |{% endfor %}
{% endfor %}
Fit diagnostics: mean calibration error {{ forecast.calibration_error | fixed(3) }}, {{ forecast.crossings_repaired }} quantile crossings repaired.
Treat the outer quantiles as the plausible range, not as targets.

{% if charts %}Charts prepared for the report: {% for chart in charts %}{{ chart }}{% if not loop.last %}, {% endif %}{% endfor %}.
{% else %}Charts are rendered separately; base the analysis on the figures above.
{% endif %}
## Required structure
Answer in markdown using exactly these level-2 headings, in this order, each with substantive content:
{% for section in sections %}
## {{ section }}
{% endfor %}
Under Scenarios give bull, base and bear cases with rough probabilities that sum to 100%, tied to the forecast quantiles. Be specific with price levels and percentages.

Report generated on: {{ generated_at }}
"#;

/// One horizon step of the forecast table
#[derive(Debug, Clone, Serialize)]
struct ForecastRow {
    step: usize,
    time: String,
    values: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
struct ForecastContext {
    labels: Vec<String>,
    rows: Vec<ForecastRow>,
    last_close: f64,
    start: String,
    training_samples: usize,
    calibration_error: f64,
    crossings_repaired: usize,
}

impl ForecastContext {
    fn new(artifact: &ForecastArtifact) -> Self {
        let rows = artifact
            .step_timestamps()
            .iter()
            .enumerate()
            .map(|(i, t)| ForecastRow {
                step: i + 1,
                time: t.format("%Y-%m-%d %H:%M").to_string(),
                values: artifact.values_at(i + 1),
            })
            .collect();
        let diagnostics = artifact.diagnostics();
        Self {
            labels: artifact.levels().iter().map(|l| l.label()).collect(),
            rows,
            last_close: artifact.last_close(),
            start: artifact.last_timestamp().format("%Y-%m-%d %H:%M").to_string(),
            training_samples: diagnostics.training_samples,
            calibration_error: diagnostics.mean_calibration_error(),
            crossings_repaired: diagnostics.crossings_repaired,
        }
    }
}

/// Renders the analysis prompt
pub struct PromptRenderer {
    env: Environment<'static>,
}

impl std::fmt::Debug for PromptRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptRenderer").finish_non_exhaustive()
    }
}

fn fixed(value: f64, places: Option<usize>) -> String {
    format!("{value:.prec$}", prec = places.unwrap_or(2))
}

/// Whole number with thousands separators
fn thousands(value: f64) -> String {
    let digits = format!("{:.0}", value.abs());
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if value < 0.0 && digits != "0" {
        out.insert(0, '-');
    }
    out
}

impl PromptRenderer {
    pub fn new() -> Result<Self, CollaboratorError> {
        let mut env = Environment::new();
        env.add_filter("fixed", fixed);
        env.add_filter("thousands", thousands);
        env.add_template("analysis", ANALYSIS_TEMPLATE)
            .map_err(|e| CollaboratorError::InvalidInput(format!("prompt template: {e}")))?;
        Ok(Self { env })
    }

    /// Render the user prompt for one run
    pub fn render(
        &self,
        inputs: &StageInputs,
        summary: &DataSummary,
        charts: &[ChartFile],
        generated_at: DateTime<Utc>,
    ) -> Result<String, CollaboratorError> {
        let template = self
            .env
            .get_template("analysis")
            .map_err(|e| CollaboratorError::InvalidInput(format!("prompt template: {e}")))?;
        let charts: Vec<&str> = charts.iter().map(|c| c.kind.title()).collect();

        template
            .render(context! {
                ticker => inputs.request.ticker.as_str(),
                window => inputs.request.report_window.to_string(),
                forecast_window => inputs.request.forecast_window.to_string(),
                summary => summary,
                recent_bars => super::summary::RECENT_BARS,
                forecast => ForecastContext::new(&inputs.artifact),
                charts => charts,
                sections => REQUIRED_SECTIONS,
                generated_at => generated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            })
            .map_err(|e| CollaboratorError::InvalidInput(format!("prompt render: {e}")))
    }
}
