//! Command-line interface for the stock report pipeline
//!
//! ```bash
//! # Full report from Yahoo Finance, narrative via GEMINI_API_KEY or OPENAI_API_KEY
//! stock-report run --ticker AAPL --timeframe 6mo
//!
//! # Offline: history from CSV, no narrative
//! stock-report run --ticker AAPL --csv data/ --no-narrative
//!
//! # Forecast only
//! stock-report forecast --ticker AAPL --csv data/AAPL.csv --horizon 10
//! ```

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use report_forecast::{ArtifactStore, FileArtifactStore, ForecastConfig, PriceSeries, QuantileForecaster};
use report_pipeline::{
    CancelFlag, Collaborators, FileRunStore, HistoryWindow, Ingestor, Interval, Narrator,
    Orchestrator, PipelineConfig, ReportRequest, RunStatus, RunStore, ScheduleMode, Ticker,
    Timeframe,
};
use report_stock::{
    CsvIngestor, LlmNarrator, MarkdownAssembler, SvgChartRenderer, YahooIngestor, forecast_table,
};
use report_utils::AppConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "stock-report")]
#[command(version, about = "Quantile-forecast stock reports", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline and write a markdown report
    Run(RunArgs),
    /// Fit a forecast from a CSV file and print the quantile table
    Forecast(ForecastArgs),
    /// Print a stored run record as JSON
    ShowRun {
        #[arg(long)]
        id: Uuid,
    },
    /// List stored runs, oldest first
    Runs,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(long, value_parser = parse_ticker)]
    ticker: Ticker,

    /// Report window: 1d, 5d, 1mo, 3mo, 6mo, 1y or 2y
    #[arg(long, default_value = "6mo")]
    timeframe: Timeframe,

    /// History the forecast model is trained on
    #[arg(long, default_value = "2y")]
    forecast_timeframe: Timeframe,

    /// Bar interval of the forecast history
    #[arg(long, default_value = "4h")]
    forecast_interval: Interval,

    /// Read history from a CSV file or a directory of <TICKER>.csv files
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Forecast steps ahead
    #[arg(long)]
    horizon: Option<usize>,

    /// Skip the LLM narrative
    #[arg(long)]
    no_narrative: bool,

    /// Run Narrate after Render so the narrator sees the charts
    #[arg(long)]
    sequential: bool,
}

#[derive(Args, Debug)]
struct ForecastArgs {
    #[arg(long, value_parser = parse_ticker)]
    ticker: Ticker,

    #[arg(long)]
    csv: PathBuf,

    #[arg(long, default_value = "2y")]
    timeframe: Timeframe,

    #[arg(long, default_value = "1d")]
    interval: Interval,

    #[arg(long)]
    horizon: Option<usize>,
}

fn parse_ticker(raw: &str) -> Result<Ticker, String> {
    Ticker::new(raw).map_err(|e| e.to_string())
}

fn forecast_config(horizon: Option<usize>) -> anyhow::Result<ForecastConfig> {
    let mut builder = ForecastConfig::builder();
    if let Some(horizon) = horizon {
        builder = builder.horizon(horizon);
    }
    Ok(builder.build()?)
}

fn narrator(disabled: bool) -> anyhow::Result<Option<Arc<dyn Narrator>>> {
    if disabled {
        return Ok(None);
    }
    match report_llm::provider_from_lookup(|key| std::env::var(key).ok()) {
        Ok(provider) => {
            info!(provider = provider.name(), model = provider.default_model(), "Narrative enabled");
            Ok(Some(Arc::new(LlmNarrator::new(provider)?)))
        }
        Err(e) => {
            warn!(error = %e, "Narrative disabled");
            Ok(None)
        }
    }
}

async fn run_report(config: &AppConfig, args: RunArgs) -> anyhow::Result<()> {
    let ingestor: Arc<dyn Ingestor> = match &args.csv {
        Some(path) => Arc::new(CsvIngestor::new(path)),
        None => Arc::new(YahooIngestor::new()?),
    };
    let collaborators = Collaborators {
        ingestor,
        renderer: Arc::new(SvgChartRenderer::new(config.output_dir.join("charts"))),
        narrator: narrator(args.no_narrative)?,
        assembler: Arc::new(MarkdownAssembler::new(&config.output_dir)),
    };

    let schedule = if args.sequential {
        ScheduleMode::Sequential
    } else {
        ScheduleMode::Concurrent
    };
    let pipeline = PipelineConfig::builder()
        .schedule(schedule)
        .forecast(forecast_config(args.horizon)?)
        .build()?;

    let artifacts = Arc::new(FileArtifactStore::open(config.forecasts_dir()).await?);
    let runs = Arc::new(FileRunStore::open(config.runs_dir()).await?);
    let orchestrator = Orchestrator::new(collaborators, artifacts, runs, pipeline)?;

    let cancel = CancelFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current stage");
            on_signal.cancel();
        }
    });

    let request = ReportRequest::new(args.ticker, args.timeframe).with_forecast_window(
        HistoryWindow {
            lookback: args.forecast_timeframe,
            interval: args.forecast_interval,
        },
    );
    let run = orchestrator.run(request, &cancel).await;

    println!("{}", run.summary());
    if let Some(path) = &run.report_path {
        println!("Report: {}", path.display());
    }
    if run.status == Some(RunStatus::Failed) {
        bail!("run {} failed", run.id);
    }
    Ok(())
}

async fn run_forecast(config: &AppConfig, args: ForecastArgs) -> anyhow::Result<()> {
    let window = HistoryWindow {
        lookback: args.timeframe,
        interval: args.interval,
    };
    let bars = CsvIngestor::new(&args.csv)
        .fetch(&args.ticker, window)
        .await
        .with_context(|| format!("reading {}", args.csv.display()))?;
    let validated = PriceSeries::validate(bars)?;
    if !validated.rejected.is_empty() {
        warn!(rejected = validated.rejected.len(), "Dropped invalid bars");
    }

    let forecaster = QuantileForecaster::new(forecast_config(args.horizon)?)?;
    let series = validated.series;
    let ticker = args.ticker.to_string();
    let artifact = tokio::task::spawn_blocking(move || forecaster.run(&ticker, &series)).await??;

    let store = FileArtifactStore::open(config.forecasts_dir()).await?;
    let id = store.put(Arc::new(artifact)).await?;
    let artifact = store.get(&id).await?;

    println!("{}", forecast_table(&artifact));
    println!("Artifact: {id}");
    Ok(())
}

async fn show_run(config: &AppConfig, id: Uuid) -> anyhow::Result<()> {
    let store = FileRunStore::open(config.runs_dir()).await?;
    let run = store.load(id).await?;
    println!("{}", serde_json::to_string_pretty(&run)?);
    Ok(())
}

async fn list_runs(config: &AppConfig) -> anyhow::Result<()> {
    let store = FileRunStore::open(config.runs_dir()).await?;
    for run in store.list().await? {
        println!("{}  {}", run.created_at.format("%Y-%m-%d %H:%M:%S"), run.summary());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.log_json {
        report_utils::init_tracing_json();
    } else {
        report_utils::init_tracing();
    }

    let config = AppConfig::from_env()?;
    info!(environment = %config.environment, output = %config.output_dir.display(), "Starting stock-report");

    match cli.command {
        Command::Run(args) => run_report(&config, args).await,
        Command::Forecast(args) => run_forecast(&config, args).await,
        Command::ShowRun { id } => show_run(&config, id).await,
        Command::Runs => list_runs(&config).await,
    }
}
