//! Report requests: validated tickers, lookback timeframes and bar intervals

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CollaboratorError;

/// Upper-cased ticker symbol of 1 to 10 characters from `[A-Z0-9.-^=]`
///
/// At least one character must be a letter or digit, so a ticker is always
/// safe to use as a single path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ticker(String);

impl Ticker {
    pub fn new(raw: &str) -> Result<Self, CollaboratorError> {
        let symbol = raw.trim().to_ascii_uppercase();
        if symbol.is_empty() || symbol.len() > 10 {
            return Err(CollaboratorError::InvalidInput(format!(
                "ticker '{raw}' must be 1-10 characters"
            )));
        }
        if let Some(bad) = symbol
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '=')))
        {
            return Err(CollaboratorError::InvalidInput(format!(
                "ticker '{raw}' contains invalid character '{bad}'"
            )));
        }
        if !symbol.chars().any(|c| c.is_ascii_alphanumeric()) {
            return Err(CollaboratorError::InvalidInput(format!(
                "ticker '{raw}' must contain a letter or digit"
            )));
        }
        Ok(Self(symbol))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Ticker {
    type Error = CollaboratorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Ticker> for String {
    fn from(ticker: Ticker) -> Self {
        ticker.0
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bar spacing requested from a data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "2m")]
    TwoMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl Interval {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TwoMinutes => "2m",
            Self::FifteenMinutes => "15m",
            Self::OneHour => "1h",
            Self::FourHours => "4h",
            Self::OneDay => "1d",
        }
    }

    /// Nominal bar length
    pub fn duration(self) -> Duration {
        match self {
            Self::TwoMinutes => Duration::minutes(2),
            Self::FifteenMinutes => Duration::minutes(15),
            Self::OneHour => Duration::hours(1),
            Self::FourHours => Duration::hours(4),
            Self::OneDay => Duration::days(1),
        }
    }
}

impl FromStr for Interval {
    type Err = CollaboratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::TwoMinutes,
            Self::FifteenMinutes,
            Self::OneHour,
            Self::FourHours,
            Self::OneDay,
        ]
        .into_iter()
        .find(|i| i.as_str().eq_ignore_ascii_case(s.trim()))
        .ok_or_else(|| {
            CollaboratorError::InvalidInput(format!(
                "unknown interval '{s}' (expected one of 2m, 15m, 1h, 4h, 1d)"
            ))
        })
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lookback window of a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "5d")]
    FiveDays,
    #[serde(rename = "1mo")]
    OneMonth,
    #[serde(rename = "3mo")]
    ThreeMonths,
    #[serde(rename = "6mo")]
    SixMonths,
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "2y")]
    TwoYears,
}

impl Timeframe {
    pub const ALL: [Self; 7] = [
        Self::OneDay,
        Self::FiveDays,
        Self::OneMonth,
        Self::ThreeMonths,
        Self::SixMonths,
        Self::OneYear,
        Self::TwoYears,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneDay => "1d",
            Self::FiveDays => "5d",
            Self::OneMonth => "1mo",
            Self::ThreeMonths => "3mo",
            Self::SixMonths => "6mo",
            Self::OneYear => "1y",
            Self::TwoYears => "2y",
        }
    }

    /// Bar interval used for this window
    pub fn interval(self) -> Interval {
        match self {
            Self::OneDay => Interval::TwoMinutes,
            Self::FiveDays => Interval::FifteenMinutes,
            Self::OneMonth => Interval::OneHour,
            Self::ThreeMonths => Interval::FourHours,
            Self::SixMonths | Self::OneYear | Self::TwoYears => Interval::OneDay,
        }
    }

    /// Calendar length of the window
    pub fn lookback(self) -> Duration {
        match self {
            Self::OneDay => Duration::days(1),
            Self::FiveDays => Duration::days(5),
            Self::OneMonth => Duration::days(30),
            Self::ThreeMonths => Duration::days(91),
            Self::SixMonths => Duration::days(182),
            Self::OneYear => Duration::days(365),
            Self::TwoYears => Duration::days(730),
        }
    }
}

impl FromStr for Timeframe {
    type Err = CollaboratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                CollaboratorError::InvalidInput(format!(
                    "unknown timeframe '{s}' (expected one of 1d, 5d, 1mo, 3mo, 6mo, 1y, 2y)"
                ))
            })
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A history window: how far back and at what bar spacing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryWindow {
    pub lookback: Timeframe,
    pub interval: Interval,
}

impl HistoryWindow {
    /// Window using the timeframe's standard interval
    pub fn for_timeframe(timeframe: Timeframe) -> Self {
        Self {
            lookback: timeframe,
            interval: timeframe.interval(),
        }
    }
}

impl fmt::Display for HistoryWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.lookback, self.interval)
    }
}

/// One report to produce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub ticker: Ticker,
    /// Window shown in charts and the narrative
    pub report_window: HistoryWindow,
    /// Window the forecast model is trained on
    pub forecast_window: HistoryWindow,
}

impl ReportRequest {
    /// Request with a two-year, four-hour forecast history
    pub fn new(ticker: Ticker, timeframe: Timeframe) -> Self {
        Self {
            ticker,
            report_window: HistoryWindow::for_timeframe(timeframe),
            forecast_window: HistoryWindow {
                lookback: Timeframe::TwoYears,
                interval: Interval::FourHours,
            },
        }
    }

    /// Override the forecast history window
    pub fn with_forecast_window(mut self, window: HistoryWindow) -> Self {
        self.forecast_window = window;
        self
    }

    /// Whether report and forecast use the same bars
    pub fn shares_history(&self) -> bool {
        self.report_window == self.forecast_window
    }
}
