//! Stock report pipeline
//!
//! The [`Orchestrator`] runs `Ingest -> Validate -> BuildFeatures -> Forecast
//! -> Render -> Narrate -> Assemble` for one [`ReportRequest`], applying a
//! fixed failure policy per [`Stage`] and recording every outcome in a
//! [`PipelineRun`]. Collaborators plug in through the traits in
//! [`collaborators`].

pub mod collaborators;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod request;
pub mod retry;
pub mod run;
pub mod run_store;
pub mod stage;

pub use collaborators::{
    Assembler, AssemblyInput, ChartFile, ChartKind, Ingestor, Narrative, NarrativeSection,
    Narrator, REQUIRED_SECTIONS, Renderer, StageInputs,
};
pub use config::{PipelineConfig, PipelineConfigBuilder, ScheduleMode};
pub use error::{CollaboratorError, PipelineError, Result, StageError};
pub use orchestrator::{CancelFlag, Collaborators, Orchestrator};
pub use request::{HistoryWindow, Interval, ReportRequest, Ticker, Timeframe};
pub use retry::{Attempted, RetryPolicy};
pub use run::{PipelineRun, RunState, RunStatus};
pub use run_store::{FileRunStore, InMemoryRunStore, RunStore};
pub use stage::{FailurePolicy, Stage, StageResult, StageStatus};
