//! Collaborator seams: ingestion, chart rendering, narration and assembly
//!
//! The orchestrator only sees these traits. Concrete implementations
//! (Yahoo, CSV, SVG charts, LLM narrator, markdown assembler) live in
//! `report-stock`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use report_forecast::{ForecastArtifact, PriceBar, PriceSeries};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::CollaboratorError;
use crate::request::{HistoryWindow, ReportRequest, Ticker};
use crate::stage::StageResult;

/// Headings every narrative must contain, in report order
pub const REQUIRED_SECTIONS: [&str; 5] = [
    "Executive Summary",
    "Technical Analysis",
    "Investment Strategy",
    "Risk Assessment",
    "Scenarios",
];

/// Kind of chart produced by the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    MovingAverage,
    Momentum,
    ForecastFan,
}

impl ChartKind {
    pub const ALL: [Self; 3] = [Self::MovingAverage, Self::Momentum, Self::ForecastFan];

    pub fn title(self) -> &'static str {
        match self {
            Self::MovingAverage => "Price and Moving Averages",
            Self::Momentum => "Momentum (MACD and RSI)",
            Self::ForecastFan => "Quantile Forecast",
        }
    }

    pub fn file_stem(self) -> &'static str {
        match self {
            Self::MovingAverage => "moving_average",
            Self::Momentum => "momentum",
            Self::ForecastFan => "forecast_fan",
        }
    }
}

/// A rendered chart on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartFile {
    pub kind: ChartKind,
    pub path: PathBuf,
}

/// One titled narrative section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrativeSection {
    pub title: String,
    pub body: String,
}

/// Well-formed narrative with every required section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Narrative {
    pub sections: Vec<NarrativeSection>,
    /// Model or source that wrote it
    pub author: String,
}

impl Narrative {
    /// Parse markdown into the required sections
    ///
    /// Headings may use any `#` depth, bold markers or numbering
    /// (`## 1. Executive Summary`). Text before the first recognized heading
    /// is dropped; unrecognized headings stay with the preceding section. A
    /// missing or empty required section makes the whole narrative malformed.
    pub fn from_markdown(text: &str, author: impl Into<String>) -> Result<Self, CollaboratorError> {
        let mut bodies: Vec<Option<String>> = vec![None; REQUIRED_SECTIONS.len()];
        let mut current: Option<usize> = None;

        for line in text.lines() {
            if let Some(index) = heading_index(line) {
                current = Some(index);
                bodies[index].get_or_insert_with(String::new);
                continue;
            }
            if let Some(index) = current {
                if let Some(body) = bodies[index].as_mut() {
                    body.push_str(line);
                    body.push('\n');
                }
            }
        }

        let missing: Vec<&str> = REQUIRED_SECTIONS
            .iter()
            .zip(&bodies)
            .filter(|(_, body)| body.as_deref().is_none_or(|b| b.trim().is_empty()))
            .map(|(title, _)| *title)
            .collect();
        if !missing.is_empty() {
            return Err(CollaboratorError::Malformed(format!(
                "narrative is missing sections: {}",
                missing.join(", ")
            )));
        }

        let sections = REQUIRED_SECTIONS
            .iter()
            .zip(bodies)
            .map(|(title, body)| NarrativeSection {
                title: (*title).to_string(),
                body: body.unwrap_or_default().trim().to_string(),
            })
            .collect();

        Ok(Self {
            sections,
            author: author.into(),
        })
    }

    pub fn section(&self, title: &str) -> Option<&NarrativeSection> {
        self.sections
            .iter()
            .find(|s| s.title.eq_ignore_ascii_case(title))
    }
}

fn heading_index(line: &str) -> Option<usize> {
    let trimmed = line.trim();
    let is_heading = trimmed.starts_with('#')
        || (trimmed.starts_with("**") && trimmed.ends_with("**") && trimmed.len() > 4);
    if !is_heading {
        return None;
    }
    let title: String = trimmed
        .trim_start_matches('#')
        .replace("**", "")
        .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c.is_whitespace())
        .trim_end_matches(':')
        .trim()
        .to_ascii_lowercase();
    REQUIRED_SECTIONS
        .iter()
        .position(|s| title.starts_with(&s.to_ascii_lowercase()))
}

/// Immutable inputs shared by Render, Narrate and Assemble
///
/// Everything is behind `Arc`, so concurrent stages read the same snapshot.
#[derive(Debug, Clone)]
pub struct StageInputs {
    pub run_id: Uuid,
    pub request: ReportRequest,
    /// Bars covering the report window
    pub report_series: Arc<PriceSeries>,
    /// Bars the forecast was trained on
    pub forecast_series: Arc<PriceSeries>,
    pub artifact: Arc<ForecastArtifact>,
}

/// Everything the assembler may use
#[derive(Debug, Clone)]
pub struct AssemblyInput {
    pub inputs: StageInputs,
    pub generated_at: DateTime<Utc>,
    pub charts: Vec<ChartFile>,
    pub narrative: Option<Narrative>,
    /// Non-ok stage results so far, for the status banner
    pub notices: Vec<StageResult>,
}

/// Fetches raw OHLCV bars
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Ingestor: Send + Sync {
    async fn fetch(
        &self,
        ticker: &Ticker,
        window: HistoryWindow,
    ) -> Result<Vec<PriceBar>, CollaboratorError>;

    fn name(&self) -> &str;
}

/// Draws charts from the series and forecast
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, inputs: &StageInputs) -> Result<Vec<ChartFile>, CollaboratorError>;
}

/// Writes the narrative report text
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Narrator: Send + Sync {
    /// `charts` is empty when narration runs concurrently with rendering
    async fn narrate(
        &self,
        inputs: &StageInputs,
        charts: &[ChartFile],
    ) -> Result<Narrative, CollaboratorError>;
}

/// Produces the final document
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Assembler: Send + Sync {
    async fn assemble(&self, input: &AssemblyInput) -> Result<PathBuf, CollaboratorError>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Markdown containing every required section
    pub fn complete_markdown() -> String {
        REQUIRED_SECTIONS
            .iter()
            .map(|title| format!("## {title}\nText for {title}.\n"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
