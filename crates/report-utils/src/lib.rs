//! Shared utilities for the stock report workspace
//!
//! This crate provides the ambient pieces every other crate leans on:
//! tracing setup and the application-level configuration (where reports,
//! charts and persisted artifacts are written).

pub mod config;
pub mod logging;

pub use config::{AppConfig, ConfigError};
pub use logging::{init_tracing, init_tracing_json};
