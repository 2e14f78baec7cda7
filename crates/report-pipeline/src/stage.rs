//! Pipeline stages, their failure policies and per-stage results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingest,
    Validate,
    BuildFeatures,
    Forecast,
    Render,
    Narrate,
    Assemble,
}

/// What a stage failure does to the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Abort the run
    Fatal,
    /// Retry transient errors with backoff, abort otherwise
    RetryTransient,
    /// Record the stage as skipped and continue
    Skip,
    /// Abort only if there is nothing at all to work with
    FatalWhenEmpty,
}

impl Stage {
    pub const ORDER: [Self; 7] = [
        Self::Ingest,
        Self::Validate,
        Self::BuildFeatures,
        Self::Forecast,
        Self::Render,
        Self::Narrate,
        Self::Assemble,
    ];

    /// Declared failure policy of this stage
    pub fn policy(self) -> FailurePolicy {
        match self {
            Self::Ingest | Self::Validate => FailurePolicy::Fatal,
            Self::BuildFeatures | Self::Forecast => FailurePolicy::RetryTransient,
            Self::Render | Self::Narrate => FailurePolicy::Skip,
            Self::Assemble => FailurePolicy::FatalWhenEmpty,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Validate => "validate",
            Self::BuildFeatures => "build_features",
            Self::Forecast => "forecast",
            Self::Render => "render",
            Self::Narrate => "narrate",
            Self::Assemble => "assemble",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Ok,
    Skipped,
    Failed,
}

/// Recorded result of one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: Stage,
    pub status: StageStatus,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    /// Human-readable reason for a non-ok status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Error class for a non-ok status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Extra information for ok stages (bar counts, artifact id, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StageResult {
    pub fn ok(stage: Stage, started_at: DateTime<Utc>, elapsed_ms: u64) -> Self {
        Self {
            stage,
            status: StageStatus::Ok,
            attempts: 1,
            started_at,
            elapsed_ms,
            reason: None,
            error_kind: None,
            detail: None,
        }
    }

    pub fn not_ok(
        stage: Stage,
        status: StageStatus,
        started_at: DateTime<Utc>,
        elapsed_ms: u64,
        reason: impl Into<String>,
        error_kind: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            status,
            attempts: 1,
            started_at,
            elapsed_ms,
            reason: Some(reason.into()),
            error_kind: Some(error_kind.into()),
            detail: None,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == StageStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_table() {
        assert_eq!(Stage::Ingest.policy(), FailurePolicy::Fatal);
        assert_eq!(Stage::Validate.policy(), FailurePolicy::Fatal);
        assert_eq!(Stage::BuildFeatures.policy(), FailurePolicy::RetryTransient);
        assert_eq!(Stage::Forecast.policy(), FailurePolicy::RetryTransient);
        assert_eq!(Stage::Render.policy(), FailurePolicy::Skip);
        assert_eq!(Stage::Narrate.policy(), FailurePolicy::Skip);
        assert_eq!(Stage::Assemble.policy(), FailurePolicy::FatalWhenEmpty);
    }

    #[test]
    fn test_order_is_sorted() {
        let mut sorted = Stage::ORDER;
        sorted.sort();
        assert_eq!(sorted, Stage::ORDER);
        assert_eq!(
            serde_json::to_string(&Stage::BuildFeatures).unwrap(),
            "\"build_features\""
        );
    }
}
