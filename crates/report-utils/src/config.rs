//! Application-level configuration
//!
//! Paths and environment shared by every stage of the report pipeline.
//! Values come from environment variables with sensible defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Environment variable overriding [`AppConfig::output_dir`]
pub const OUTPUT_DIR_ENV: &str = "STOCK_REPORT_OUTPUT_DIR";
/// Environment variable overriding [`AppConfig::artifact_dir`]
pub const ARTIFACT_DIR_ENV: &str = "STOCK_REPORT_ARTIFACT_DIR";
/// Environment variable overriding [`AppConfig::environment`]
pub const ENVIRONMENT_ENV: &str = "STOCK_REPORT_ENV";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configured path is empty
    #[error("{0} must not be empty")]
    EmptyPath(&'static str),
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name
    pub app_name: String,
    /// Environment (development, production, ...)
    pub environment: String,
    /// Directory for charts and assembled reports
    pub output_dir: PathBuf,
    /// Directory for persisted forecast artifacts and run records
    pub artifact_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: "stock-report".to_string(),
            environment: "development".to_string(),
            output_dir: PathBuf::from("reports"),
            artifact_dir: PathBuf::from("artifacts"),
        }
    }
}

impl AppConfig {
    /// Build a configuration from environment variables, using defaults
    /// for anything unset
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(dir) = lookup(OUTPUT_DIR_ENV) {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(ARTIFACT_DIR_ENV) {
            config.artifact_dir = PathBuf::from(dir);
        }
        if let Some(env) = lookup(ENVIRONMENT_ENV) {
            config.environment = env;
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath("output_dir"));
        }
        if self.artifact_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath("artifact_dir"));
        }
        Ok(())
    }

    /// Directory holding persisted forecast artifacts
    pub fn forecasts_dir(&self) -> PathBuf {
        self.artifact_dir.join("forecasts")
    }

    /// Directory holding persisted pipeline run records
    pub fn runs_dir(&self) -> PathBuf {
        self.artifact_dir.join("runs")
    }
}
