//! Configuration for pipeline runs

use report_forecast::ForecastConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::retry::RetryPolicy;

/// How Render and Narrate are scheduled relative to each other
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    /// Run both at once; the narrator sees no charts
    #[default]
    Concurrent,
    /// Render first, then narrate with the rendered charts
    Sequential,
}

/// Configuration for the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Retry policy for stages that retry transient errors
    pub retry: RetryPolicy,

    /// Time budget of the Narrate stage
    pub narrate_timeout: Duration,

    /// Time budget of the Render stage
    pub render_timeout: Duration,

    pub schedule: ScheduleMode,

    /// Feature and model settings for the Forecast stage
    pub forecast: ForecastConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            narrate_timeout: Duration::from_secs(90),
            render_timeout: Duration::from_secs(60),
            schedule: ScheduleMode::Concurrent,
            forecast: ForecastConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.retry.validate().map_err(PipelineError::InvalidConfig)?;

        if self.narrate_timeout.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "narrate_timeout must be greater than 0".to_string(),
            ));
        }

        if self.render_timeout.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "render_timeout must be greater than 0".to_string(),
            ));
        }

        self.forecast.validate()?;
        Ok(())
    }
}

/// Builder for PipelineConfig
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    retry: Option<RetryPolicy>,
    narrate_timeout: Option<Duration>,
    render_timeout: Option<Duration>,
    schedule: Option<ScheduleMode>,
    forecast: Option<ForecastConfig>,
}

impl PipelineConfigBuilder {
    /// Set the retry policy
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Set the narrate timeout
    pub fn narrate_timeout(mut self, timeout: Duration) -> Self {
        self.narrate_timeout = Some(timeout);
        self
    }

    /// Set the render timeout
    pub fn render_timeout(mut self, timeout: Duration) -> Self {
        self.render_timeout = Some(timeout);
        self
    }

    /// Set the Render/Narrate scheduling mode
    pub fn schedule(mut self, schedule: ScheduleMode) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Set the forecast configuration
    pub fn forecast(mut self, forecast: ForecastConfig) -> Self {
        self.forecast = Some(forecast);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<PipelineConfig> {
        let defaults = PipelineConfig::default();
        let config = PipelineConfig {
            retry: self.retry.unwrap_or(defaults.retry),
            narrate_timeout: self.narrate_timeout.unwrap_or(defaults.narrate_timeout),
            render_timeout: self.render_timeout.unwrap_or(defaults.render_timeout),
            schedule: self.schedule.unwrap_or(defaults.schedule),
            forecast: self.forecast.unwrap_or(defaults.forecast),
        };

        config.validate()?;
        Ok(config)
    }
}
