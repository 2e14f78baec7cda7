//! Pipeline orchestrator
//!
//! Drives one [`PipelineRun`] through
//! `Ingest -> Validate -> BuildFeatures -> Forecast -> Render -> Narrate -> Assemble`.
//! Stage failures never escape as errors: each one becomes a [`StageResult`]
//! and one handler applies the stage's [`FailurePolicy`]: a single attempt
//! for fatal stages, retries of transient errors for the rest, and either a
//! skip or an abort once the stage gives up.
//!
//! Forecast fitting runs on the blocking pool. Render and Narrate read the
//! same `Arc<ForecastArtifact>` and run concurrently unless the schedule is
//! [`ScheduleMode::Sequential`]. Both run under their own timeout, and a
//! timeout counts as a transient failure of that stage. Cancellation is honored between stages only.

use chrono::{DateTime, Utc};
use report_forecast::{
    ArtifactStore, FeatureSet, ForecastArtifact, PriceBar, PriceSeries, QuantileForecaster,
};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::{Instant, timeout};
use tracing::{debug, error, info, instrument, warn};

use crate::collaborators::{
    Assembler, AssemblyInput, ChartFile, Ingestor, Narrative, Narrator, Renderer, StageInputs,
};
use crate::config::{PipelineConfig, ScheduleMode};
use crate::error::{Result, StageError};
use crate::request::ReportRequest;
use crate::retry::Attempted;
use crate::run::{PipelineRun, RunState, RunStatus};
use crate::run_store::RunStore;
use crate::stage::{FailurePolicy, Stage, StageResult, StageStatus};

/// External collaborators used by the stages
#[derive(Clone)]
pub struct Collaborators {
    pub ingestor: Arc<dyn Ingestor>,
    pub renderer: Arc<dyn Renderer>,
    /// `None` disables narration; the Narrate stage is then skipped
    pub narrator: Option<Arc<dyn Narrator>>,
    pub assembler: Arc<dyn Assembler>,
}

/// Cooperative cancellation shared between a caller and a running pipeline
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; takes effect before the next stage starts
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Wall-clock start plus a monotonic timer for one stage
struct StageClock {
    started_at: DateTime<Utc>,
    start: Instant,
}

impl StageClock {
    fn start() -> Self {
        Self {
            started_at: Utc::now(),
            start: Instant::now(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn ok(&self, stage: Stage) -> StageResult {
        StageResult::ok(stage, self.started_at, self.elapsed_ms())
    }

    fn not_ok(&self, stage: Stage, status: StageStatus, err: &StageError) -> StageResult {
        StageResult::not_ok(
            stage,
            status,
            self.started_at,
            self.elapsed_ms(),
            err.to_string(),
            err.kind_label(),
        )
    }
}

/// Raw bars as fetched
struct RawHistory {
    report: Vec<PriceBar>,
    /// `None` when the forecast reuses the report bars
    forecast: Option<Vec<PriceBar>>,
}

/// Validated series for the report and the forecast
struct History {
    report: Arc<PriceSeries>,
    forecast: Arc<PriceSeries>,
}

/// Sequences the stages of a report run
pub struct Orchestrator {
    collaborators: Collaborators,
    artifacts: Arc<dyn ArtifactStore>,
    runs: Arc<dyn RunStore>,
    forecaster: Arc<QuantileForecaster>,
    config: PipelineConfig,
}

impl Orchestrator {
    /// Create an orchestrator, validating the configuration
    pub fn new(
        collaborators: Collaborators,
        artifacts: Arc<dyn ArtifactStore>,
        runs: Arc<dyn RunStore>,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let forecaster = QuantileForecaster::new(config.forecast.clone())?;
        Ok(Self {
            collaborators,
            artifacts,
            runs,
            forecaster: Arc::new(forecaster),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute one run to completion
    ///
    /// The returned run is always finalized and has been handed to the run
    /// store. A failure to persist the record is logged, not returned.
    #[instrument(skip(self, request, cancel), fields(ticker = %request.ticker))]
    pub async fn run(&self, request: ReportRequest, cancel: &CancelFlag) -> PipelineRun {
        let mut run = PipelineRun::new(request);
        info!(run_id = %run.id, "Starting pipeline run");

        if let Err(e) = self.drive(&mut run, cancel).await {
            error!(run_id = %run.id, error = %e, "Run bookkeeping failed");
            if !run.is_finalized() {
                let stage = match run.state {
                    RunState::Running(stage) => stage,
                    _ => Stage::Ingest,
                };
                if let Err(e) = run.abort(stage) {
                    error!(run_id = %run.id, error = %e, "Could not abort run");
                }
            }
        }

        match run.status {
            Some(RunStatus::Failed) | None => warn!(summary = %run.summary(), "Pipeline run failed"),
            Some(status) => info!(%status, summary = %run.summary(), "Pipeline run finished"),
        }

        if let Err(e) = self.runs.save(&run).await {
            error!(run_id = %run.id, error = %e, "Failed to persist run record");
        }
        run
    }

    async fn drive(&self, run: &mut PipelineRun, cancel: &CancelFlag) -> Result<()> {
        let Some(raw) = self.ingest(run, cancel).await? else {
            return Ok(());
        };
        let Some(history) = self.validate(run, cancel, raw).await? else {
            return Ok(());
        };
        let Some(features) = self.build_features(run, cancel, &history).await? else {
            return Ok(());
        };
        let Some(artifact) = self.forecast(run, cancel, &history, features).await? else {
            return Ok(());
        };

        let inputs = StageInputs {
            run_id: run.id,
            request: run.request.clone(),
            report_series: history.report,
            forecast_series: history.forecast,
            artifact,
        };

        let Some((charts, narrative)) = self.render_and_narrate(run, cancel, &inputs).await? else {
            return Ok(());
        };
        self.assemble(run, cancel, inputs, charts, narrative).await
    }

    /// Check for cancellation, then enter `stage`; false means the run ended
    fn enter(&self, run: &mut PipelineRun, stage: Stage, cancel: &CancelFlag) -> Result<bool> {
        if cancel.is_cancelled() {
            warn!(run_id = %run.id, %stage, "Run cancelled before stage");
            run.cancelled = true;
            run.record(StageResult::not_ok(
                stage,
                StageStatus::Failed,
                Utc::now(),
                0,
                "run cancelled",
                "cancelled",
            ))?;
            run.abort(stage)?;
            return Ok(false);
        }
        run.begin(stage)?;
        debug!(run_id = %run.id, %stage, "Entering stage");
        Ok(true)
    }

    /// Time budget of a stage, if it has one
    fn budget(&self, stage: Stage) -> Option<Duration> {
        match stage {
            Stage::Render => Some(self.config.render_timeout),
            Stage::Narrate => Some(self.config.narrate_timeout),
            _ => None,
        }
    }

    /// Run the work of `stage` the way its [`FailurePolicy`] prescribes
    ///
    /// `Fatal` stages get exactly one attempt. Every other policy retries
    /// transient errors with backoff. A stage with a time budget runs its
    /// whole retry loop under that budget, and running out is reported as
    /// [`StageError::TimedOut`].
    async fn attempt<T, F, Fut>(&self, stage: Stage, mut call: F) -> Attempted<T, StageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, StageError>>,
    {
        let attempts = AtomicU32::new(0);
        let work = async {
            let mut counted = || {
                attempts.fetch_add(1, Ordering::Relaxed);
                call()
            };
            match stage.policy() {
                FailurePolicy::Fatal => Attempted {
                    result: counted().await,
                    attempts: 1,
                },
                FailurePolicy::RetryTransient | FailurePolicy::Skip | FailurePolicy::FatalWhenEmpty => {
                    self.config
                        .retry
                        .execute(stage.as_str(), StageError::is_transient, counted)
                        .await
                }
            }
        };

        let Some(budget) = self.budget(stage) else {
            return work.await;
        };
        match timeout(budget, work).await {
            Ok(attempted) => attempted,
            Err(_) => Attempted {
                result: Err(StageError::TimedOut(budget)),
                attempts: attempts.load(Ordering::Relaxed).max(1),
            },
        }
    }

    /// [`Self::attempt`], unless a `FatalWhenEmpty` stage has no inputs
    async fn attempt_if_present<T, F, Fut>(
        &self,
        stage: Stage,
        present: bool,
        call: F,
    ) -> Attempted<T, StageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, StageError>>,
    {
        if !present && stage.policy() == FailurePolicy::FatalWhenEmpty {
            return Attempted {
                result: Err(StageError::NothingToAssemble),
                attempts: 0,
            };
        }
        self.attempt(stage, call).await
    }

    /// Record a settled stage and abort the run if its policy says so
    ///
    /// `None` means the stage produced nothing; check
    /// [`PipelineRun::is_finalized`] to tell a skip from an abort.
    fn commit<T>(&self, run: &mut PipelineRun, settled: Settled<T>) -> Result<Option<T>> {
        let stage = settled.result.stage;
        if settled.result.is_ok() {
            info!(
                run_id = %run.id,
                %stage,
                elapsed_ms = settled.result.elapsed_ms,
                attempts = settled.result.attempts,
                "Stage completed"
            );
        }
        run.record(settled.result)?;
        if settled.abort {
            run.abort(stage)?;
        }
        Ok(settled.value)
    }

    async fn ingest(&self, run: &mut PipelineRun, cancel: &CancelFlag) -> Result<Option<RawHistory>> {
        if !self.enter(run, Stage::Ingest, cancel)? {
            return Ok(None);
        }
        let clock = StageClock::start();
        let ingestor = &self.collaborators.ingestor;
        let request = &run.request;
        let shares = request.shares_history();

        let attempted = self
            .attempt(Stage::Ingest, move || async move {
                let raw = if shares {
                    RawHistory {
                        report: ingestor.fetch(&request.ticker, request.report_window).await?,
                        forecast: None,
                    }
                } else {
                    let (report, forecast) = tokio::join!(
                        ingestor.fetch(&request.ticker, request.report_window),
                        ingestor.fetch(&request.ticker, request.forecast_window)
                    );
                    RawHistory {
                        report: report?,
                        forecast: Some(forecast?),
                    }
                };
                Ok::<_, StageError>(raw)
            })
            .await;

        let settled = settle(Stage::Ingest, &clock, attempted).detail(|raw| {
            format!(
                "{} report bars, {} forecast bars",
                raw.report.len(),
                raw.forecast.as_ref().map_or(raw.report.len(), Vec::len)
            )
        });
        self.commit(run, settled)
    }

    async fn validate(
        &self,
        run: &mut PipelineRun,
        cancel: &CancelFlag,
        raw: RawHistory,
    ) -> Result<Option<History>> {
        if !self.enter(run, Stage::Validate, cancel)? {
            return Ok(None);
        }
        let clock = StageClock::start();

        let attempted = self
            .attempt(Stage::Validate, || {
                let report = raw.report.clone();
                let forecast = raw.forecast.clone();
                async move {
                    let report = PriceSeries::validate(report)?;
                    let forecast = forecast.map(PriceSeries::validate).transpose()?;
                    let rejected =
                        report.rejected.len() + forecast.as_ref().map_or(0, |f| f.rejected.len());
                    let report_series = Arc::new(report.series);
                    let forecast_series = forecast
                        .map_or_else(|| Arc::clone(&report_series), |f| Arc::new(f.series));
                    let history = History {
                        report: report_series,
                        forecast: forecast_series,
                    };
                    Ok::<_, StageError>((history, rejected))
                }
            })
            .await;

        let settled = settle(Stage::Validate, &clock, attempted).detail(|(history, rejected)| {
            format!(
                "{} report bars, {} forecast bars, {rejected} rejected",
                history.report.len(),
                history.forecast.len()
            )
        });
        let Some((history, rejected)) = self.commit(run, settled)? else {
            return Ok(None);
        };
        if rejected > 0 {
            warn!(run_id = %run.id, rejected, "Dropped invalid price bars");
        }
        Ok(Some(history))
    }

    async fn build_features(
        &self,
        run: &mut PipelineRun,
        cancel: &CancelFlag,
        history: &History,
    ) -> Result<Option<FeatureSet>> {
        if !self.enter(run, Stage::BuildFeatures, cancel)? {
            return Ok(None);
        }
        let clock = StageClock::start();
        let forecaster = &self.forecaster;
        let series = &history.forecast;

        let attempted = self
            .attempt(Stage::BuildFeatures, move || async move {
                forecaster.build_features(series).map_err(StageError::from)
            })
            .await;

        let settled = settle(Stage::BuildFeatures, &clock, attempted).detail(|features| {
            format!(
                "{} vectors of width {}, {} dropped",
                features.len(),
                features.width(),
                features.dropped
            )
        });
        self.commit(run, settled)
    }

    /// Fit on the blocking pool, then store the artifact
    ///
    /// Each attempt fits and stores afresh. The downstream stages receive the
    /// stored artifact, which is the earlier one when the same series was
    /// already forecast under the same configuration.
    async fn forecast(
        &self,
        run: &mut PipelineRun,
        cancel: &CancelFlag,
        history: &History,
        features: FeatureSet,
    ) -> Result<Option<Arc<ForecastArtifact>>> {
        if !self.enter(run, Stage::Forecast, cancel)? {
            return Ok(None);
        }
        let clock = StageClock::start();
        let features = Arc::new(features);
        let ticker = run.request.ticker.to_string();

        let attempted = self
            .attempt(Stage::Forecast, || {
                let forecaster = Arc::clone(&self.forecaster);
                let series = Arc::clone(&history.forecast);
                let features = Arc::clone(&features);
                let ticker = ticker.clone();
                let store = Arc::clone(&self.artifacts);
                async move {
                    let fitted = tokio::task::spawn_blocking(move || {
                        forecaster.forecast(&ticker, &series, &features)
                    })
                    .await
                    .map_err(|e| StageError::Worker(e.to_string()))??;
                    let generated_at = fitted.generated_at();
                    let id = store.put(Arc::new(fitted)).await?;
                    let stored = store.get(&id).await?;
                    if stored.generated_at() != generated_at {
                        info!(artifact_id = %id, "Series already forecast, reusing stored artifact");
                    }
                    Ok::<_, StageError>(stored)
                }
            })
            .await;

        let settled = settle(Stage::Forecast, &clock, attempted)
            .detail(|artifact| format!("artifact {}", artifact.id()));
        let Some(artifact) = self.commit(run, settled)? else {
            return Ok(None);
        };
        run.artifact_id = Some(artifact.id());
        Ok(Some(artifact))
    }

    async fn render_and_narrate(
        &self,
        run: &mut PipelineRun,
        cancel: &CancelFlag,
        inputs: &StageInputs,
    ) -> Result<Option<(Vec<ChartFile>, Option<Narrative>)>> {
        if !self.enter(run, Stage::Render, cancel)? {
            return Ok(None);
        }

        match self.config.schedule {
            ScheduleMode::Concurrent => {
                let (rendered, narrated) =
                    tokio::join!(self.render(inputs), self.narrate(inputs, &[]));
                let charts = self.commit(run, rendered)?;
                if run.is_finalized() {
                    return Ok(None);
                }
                run.begin(Stage::Narrate)?;
                let narrative = self.commit(run, narrated)?;
                if run.is_finalized() {
                    return Ok(None);
                }
                Ok(Some((charts.unwrap_or_default(), narrative)))
            }
            ScheduleMode::Sequential => {
                let charts = self.commit(run, self.render(inputs).await)?;
                if run.is_finalized() {
                    return Ok(None);
                }
                let charts = charts.unwrap_or_default();

                if !self.enter(run, Stage::Narrate, cancel)? {
                    return Ok(None);
                }
                let narrative = self.commit(run, self.narrate(inputs, &charts).await)?;
                if run.is_finalized() {
                    return Ok(None);
                }
                Ok(Some((charts, narrative)))
            }
        }
    }

    async fn render(&self, inputs: &StageInputs) -> Settled<Vec<ChartFile>> {
        let clock = StageClock::start();
        let renderer = &self.collaborators.renderer;
        let attempted = self
            .attempt(Stage::Render, move || async move {
                renderer.render(inputs).await.map_err(StageError::from)
            })
            .await;
        settle(Stage::Render, &clock, attempted).detail(|charts| format!("{} charts", charts.len()))
    }

    async fn narrate(&self, inputs: &StageInputs, charts: &[ChartFile]) -> Settled<Narrative> {
        let clock = StageClock::start();
        let Some(narrator) = &self.collaborators.narrator else {
            info!(run_id = %inputs.run_id, "Narration disabled, skipping");
            let disabled = Attempted {
                result: Err(StageError::Disabled("narration disabled".to_string())),
                attempts: 1,
            };
            return settle(Stage::Narrate, &clock, disabled);
        };
        let attempted = self
            .attempt(Stage::Narrate, move || async move {
                narrator.narrate(inputs, charts).await.map_err(StageError::from)
            })
            .await;
        settle(Stage::Narrate, &clock, attempted).detail(|narrative| {
            format!("{} sections by {}", narrative.sections.len(), narrative.author)
        })
    }

    async fn assemble(
        &self,
        run: &mut PipelineRun,
        cancel: &CancelFlag,
        inputs: StageInputs,
        charts: Vec<ChartFile>,
        narrative: Option<Narrative>,
    ) -> Result<()> {
        if !self.enter(run, Stage::Assemble, cancel)? {
            return Ok(());
        }
        let clock = StageClock::start();
        let present = !charts.is_empty() || narrative.is_some();

        run.charts.clone_from(&charts);
        let input = AssemblyInput {
            inputs,
            generated_at: Utc::now(),
            charts,
            narrative,
            notices: run.non_ok_stages().cloned().collect(),
        };

        let assembler = &self.collaborators.assembler;
        let input = &input;
        let attempted = self
            .attempt_if_present(Stage::Assemble, present, move || async move {
                assembler.assemble(input).await.map_err(StageError::from)
            })
            .await;

        let settled = settle(Stage::Assemble, &clock, attempted)
            .detail(|path| path.display().to_string());
        if let Some(path) = self.commit(run, settled)? {
            info!(run_id = %run.id, path = %path.display(), "Report assembled");
            run.report_path = Some(path);
            run.complete()?;
        }
        Ok(())
    }
}

/// Outcome of one stage once its failure policy has been applied
struct Settled<T> {
    result: StageResult,
    value: Option<T>,
    /// The run stops at this stage
    abort: bool,
}

impl<T> Settled<T> {
    /// Attach a detail line when the stage produced a value
    fn detail(mut self, describe: impl FnOnce(&T) -> String) -> Self {
        if let Some(value) = &self.value {
            self.result = self.result.with_detail(describe(value));
        }
        self
    }
}

/// Turn an attempted stage into its recorded result
///
/// A `Skip` stage that fails is recorded as skipped and the run goes on.
/// A failure under any other policy is recorded as failed and aborts the run.
fn settle<T>(stage: Stage, clock: &StageClock, attempted: Attempted<T, StageError>) -> Settled<T> {
    let attempts = attempted.attempts;
    let err = match attempted.result {
        Ok(value) => {
            return Settled {
                result: clock.ok(stage).with_attempts(attempts),
                value: Some(value),
                abort: false,
            };
        }
        Err(err) => err,
    };

    let (status, abort) = match stage.policy() {
        FailurePolicy::Skip => (StageStatus::Skipped, false),
        FailurePolicy::Fatal | FailurePolicy::RetryTransient | FailurePolicy::FatalWhenEmpty => {
            (StageStatus::Failed, true)
        }
    };
    if abort {
        error!(%stage, error = %err, attempts, "Stage failed, aborting run");
    } else {
        warn!(%stage, error = %err, attempts, "Stage skipped");
    }
    Settled {
        result: clock.not_ok(stage, status, &err).with_attempts(attempts),
        value: None,
        abort,
    }
}
