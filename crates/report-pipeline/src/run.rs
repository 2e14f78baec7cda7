//! Pipeline run records
//!
//! A [`PipelineRun`] moves through the stages in order and is finalized
//! exactly once, either as `Done` or `Aborted`. After that every mutation
//! is rejected.

use chrono::{DateTime, Utc};
use report_forecast::ArtifactId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::collaborators::ChartFile;
use crate::error::{PipelineError, Result};
use crate::request::ReportRequest;
use crate::stage::{Stage, StageResult, StageStatus};

/// Position of a run in the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running(Stage),
    Done,
    Aborted(Stage),
}

/// Final status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every stage succeeded
    Ok,
    /// Report produced with one or more skipped stages
    Degraded,
    /// No report
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        })
    }
}

/// Audit record of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub request: ReportRequest,
    pub state: RunState,
    pub status: Option<RunStatus>,
    pub stages: Vec<StageResult>,
    pub artifact_id: Option<ArtifactId>,
    pub charts: Vec<ChartFile>,
    pub report_path: Option<PathBuf>,
    pub cancelled: bool,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(request: ReportRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            state: RunState::Pending,
            status: None,
            stages: Vec::new(),
            artifact_id: None,
            charts: Vec::new(),
            report_path: None,
            cancelled: false,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self.state, RunState::Done | RunState::Aborted(_))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_finalized() {
            Err(PipelineError::AlreadyFinalized(self.id.to_string()))
        } else {
            Ok(())
        }
    }

    /// Enter `stage`; stages must be entered in order
    pub fn begin(&mut self, stage: Stage) -> Result<()> {
        self.ensure_open()?;
        if let Some(last) = self.stages.last() {
            if last.stage >= stage {
                return Err(PipelineError::InvalidTransition(format!(
                    "stage {stage} cannot follow {}",
                    last.stage
                )));
            }
        }
        self.state = RunState::Running(stage);
        Ok(())
    }

    /// Record a stage result
    pub fn record(&mut self, result: StageResult) -> Result<()> {
        self.ensure_open()?;
        self.stages.push(result);
        Ok(())
    }

    /// Finish successfully; status is degraded if any stage was skipped
    pub fn complete(&mut self) -> Result<RunStatus> {
        self.ensure_open()?;
        let status = if self.stages.iter().any(|s| s.status == StageStatus::Skipped) {
            RunStatus::Degraded
        } else {
            RunStatus::Ok
        };
        self.state = RunState::Done;
        self.status = Some(status);
        self.finished_at = Some(Utc::now());
        Ok(status)
    }

    /// Abort at `stage`
    pub fn abort(&mut self, stage: Stage) -> Result<()> {
        self.ensure_open()?;
        self.state = RunState::Aborted(stage);
        self.status = Some(RunStatus::Failed);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Results that were not ok, in stage order
    pub fn non_ok_stages(&self) -> impl Iterator<Item = &StageResult> {
        self.stages.iter().filter(|s| !s.is_ok())
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// One-line human summary
    pub fn summary(&self) -> String {
        let status = self.status.map_or_else(|| "running".to_string(), |s| s.to_string());
        let mut line = format!("run {} for {}: {}", self.id, self.request.ticker, status);
        for result in self.non_ok_stages() {
            line.push_str(&format!(
                "; {} {}: {}",
                result.stage,
                match result.status {
                    StageStatus::Skipped => "skipped",
                    _ => "failed",
                },
                result.reason.as_deref().unwrap_or("no reason recorded")
            ));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Ticker, Timeframe};

    fn run() -> PipelineRun {
        PipelineRun::new(ReportRequest::new(
            Ticker::new("TST").unwrap(),
            Timeframe::SixMonths,
        ))
    }

    #[test]
    fn test_complete_ok_and_degraded() {
        let mut ok = run();
        ok.begin(Stage::Ingest).unwrap();
        ok.record(StageResult::ok(Stage::Ingest, Utc::now(), 1)).unwrap();
        assert_eq!(ok.complete().unwrap(), RunStatus::Ok);

        let mut degraded = run();
        degraded.begin(Stage::Narrate).unwrap();
        degraded
            .record(StageResult::not_ok(
                Stage::Narrate,
                StageStatus::Skipped,
                Utc::now(),
                90_000,
                "timed out",
                "transient_upstream",
            ))
            .unwrap();
        assert_eq!(degraded.complete().unwrap(), RunStatus::Degraded);
        assert!(degraded.summary().contains("narrate skipped: timed out"));
    }

    #[test]
    fn test_finalized_exactly_once() {
        let mut r = run();
        r.abort(Stage::Ingest).unwrap();
        assert_eq!(r.status, Some(RunStatus::Failed));
        assert_eq!(r.state, RunState::Aborted(Stage::Ingest));
        assert!(matches!(r.complete(), Err(PipelineError::AlreadyFinalized(_))));
        assert!(r.abort(Stage::Validate).is_err());
        assert!(r.begin(Stage::Validate).is_err());
    }

    #[test]
    fn test_stages_must_advance() {
        let mut r = run();
        r.begin(Stage::Forecast).unwrap();
        r.record(StageResult::ok(Stage::Forecast, Utc::now(), 1)).unwrap();
        assert!(r.begin(Stage::Ingest).is_err());
        assert!(r.begin(Stage::Render).is_ok());
    }

    #[test]
    fn test_record_serializes() {
        let mut r = run();
        r.abort(Stage::Validate).unwrap();
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["state"]["state"], "aborted");
        assert_eq!(json["state"]["stage"], "validate");
        let back: PipelineRun = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }
}
