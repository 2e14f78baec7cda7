//! Yahoo Finance price history

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use report_forecast::PriceBar;
use report_pipeline::{CollaboratorError, HistoryWindow, Ingestor, Interval, RetryPolicy, Ticker};
use std::num::NonZeroU32;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, instrument};
use yahoo_finance_api as yahoo;

use super::coarsen_to;

type SharedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Requests per minute allowed against Yahoo by default
pub const DEFAULT_REQUESTS_PER_MINUTE: NonZeroU32 = match NonZeroU32::new(30) {
    Some(n) => n,
    None => NonZeroU32::MIN,
};

/// Ingestor backed by the Yahoo Finance chart API
///
/// Requests are rate limited, and transient failures (rate limits,
/// timeouts, 5xx) are retried before the error reaches the pipeline.
/// Yahoo has no 4h interval, so those windows are fetched hourly and
/// resampled.
pub struct YahooIngestor {
    connector: yahoo::YahooConnector,
    rate_limiter: SharedRateLimiter,
    retry: RetryPolicy,
}

impl YahooIngestor {
    /// Create an ingestor with the default rate limit and retry policy
    pub fn new() -> Result<Self, CollaboratorError> {
        Self::with_rate_limit(DEFAULT_REQUESTS_PER_MINUTE)
    }

    /// Create an ingestor allowing `per_minute` requests
    pub fn with_rate_limit(per_minute: NonZeroU32) -> Result<Self, CollaboratorError> {
        let connector = yahoo::YahooConnector::new()
            .map_err(|e| CollaboratorError::Upstream(format!("yahoo connector: {e}")))?;
        Ok(Self {
            connector,
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))),
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch_once(
        &self,
        symbol: &str,
        interval: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PriceBar>, CollaboratorError> {
        self.rate_limiter.until_ready().await;

        let start = to_offset(start)?;
        let end = to_offset(end)?;
        let response = self
            .connector
            .get_quote_history_interval(symbol, start, end, interval)
            .await
            .map_err(|e| classify(symbol, &e.to_string()))?;

        let quotes = response
            .quotes()
            .map_err(|e| CollaboratorError::NotFound(format!("{symbol}: {e}")))?;

        Ok(quotes
            .iter()
            .filter_map(|q| {
                let timestamp = DateTime::from_timestamp(q.timestamp as i64, 0)?;
                Some(PriceBar::new(
                    timestamp,
                    q.open,
                    q.high,
                    q.low,
                    q.close,
                    q.volume as f64,
                ))
            })
            .collect())
    }
}

/// Interval requested from Yahoo for a window interval
fn source_interval(interval: Interval) -> &'static str {
    match interval {
        Interval::TwoMinutes => "2m",
        Interval::FifteenMinutes => "15m",
        Interval::OneHour | Interval::FourHours => "1h",
        Interval::OneDay => "1d",
    }
}

fn to_offset(ts: DateTime<Utc>) -> Result<OffsetDateTime, CollaboratorError> {
    OffsetDateTime::from_unix_timestamp(ts.timestamp())
        .map_err(|e| CollaboratorError::InvalidInput(format!("timestamp {ts}: {e}")))
}

/// Map a Yahoo error message to a collaborator error
fn classify(symbol: &str, message: &str) -> CollaboratorError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("429") || lower.contains("too many requests") {
        CollaboratorError::RateLimited(message.to_string())
    } else if lower.contains("timed out") || lower.contains("timeout") {
        CollaboratorError::Timeout(message.to_string())
    } else if lower.contains("404") || lower.contains("not found") || lower.contains("no data") {
        CollaboratorError::NotFound(format!("{symbol}: {message}"))
    } else {
        CollaboratorError::Upstream(message.to_string())
    }
}

#[async_trait]
impl Ingestor for YahooIngestor {
    #[instrument(skip(self, ticker, window), fields(ticker = %ticker, window = %window))]
    async fn fetch(
        &self,
        ticker: &Ticker,
        window: HistoryWindow,
    ) -> Result<Vec<PriceBar>, CollaboratorError> {
        let end = Utc::now();
        let start = end - window.lookback.lookback();
        let interval = source_interval(window.interval);

        let outcome = self
            .retry
            .execute("yahoo_fetch", CollaboratorError::is_transient, || {
                self.fetch_once(ticker.as_str(), interval, start, end)
            })
            .await;
        let bars = outcome.result?;
        debug!(bars = bars.len(), attempts = outcome.attempts, "Fetched Yahoo history");

        if bars.is_empty() {
            return Err(CollaboratorError::NotFound(format!(
                "no {interval} bars for {ticker} over {}",
                window.lookback
            )));
        }

        let bars = coarsen_to(bars, window.interval.duration());
        info!(bars = bars.len(), "Yahoo history ready");
        Ok(bars)
    }

    fn name(&self) -> &str {
        "yahoo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use report_pipeline::Timeframe;

    #[test]
    fn test_source_interval() {
        assert_eq!(source_interval(Interval::FourHours), "1h");
        assert_eq!(source_interval(Interval::OneDay), "1d");
        assert_eq!(source_interval(Interval::TwoMinutes), "2m");
    }

    #[test]
    fn test_classify_errors() {
        assert!(matches!(
            classify("AAPL", "HTTP 429 Too Many Requests"),
            CollaboratorError::RateLimited(_)
        ));
        assert!(matches!(
            classify("AAPL", "operation timed out"),
            CollaboratorError::Timeout(_)
        ));
        assert!(matches!(
            classify("ZZZZ", "fetching the data from yahoo! finance failed: 404 Not Found"),
            CollaboratorError::NotFound(_)
        ));
        assert!(classify("AAPL", "connection reset").is_transient());
    }

    #[tokio::test]
    #[ignore] // Requires network access
    async fn test_fetch_daily_history() {
        let ingestor = YahooIngestor::new().unwrap();
        let bars = ingestor
            .fetch(
                &Ticker::new("AAPL").unwrap(),
                HistoryWindow::for_timeframe(Timeframe::OneMonth),
            )
            .await
            .unwrap();
        assert!(!bars.is_empty());
    }
}
