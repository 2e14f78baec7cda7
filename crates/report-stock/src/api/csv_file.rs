//! OHLCV history from CSV files

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::{ReaderBuilder, StringRecord, Trim};
use report_forecast::PriceBar;
use report_pipeline::{CollaboratorError, HistoryWindow, Ingestor, Ticker};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::coarsen_to;

/// Reads `Date`/`Datetime,Open,High,Low,Close,Volume` files
///
/// The path is either a single file used for every ticker or a directory
/// holding `<TICKER>.csv` files. The lookback is measured back from the
/// newest bar in the file, not from the current time, so fixtures stay
/// usable.
#[derive(Debug, Clone)]
pub struct CsvIngestor {
    path: PathBuf,
}

/// Column positions found in the header
struct Columns {
    date: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: usize,
}

impl Columns {
    fn from_header(header: &StringRecord) -> Result<Self, CollaboratorError> {
        let find = |names: &[&str]| {
            header
                .iter()
                .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
                .ok_or_else(|| {
                    CollaboratorError::Malformed(format!("CSV header has no {} column", names[0]))
                })
        };
        Ok(Self {
            date: find(&["Date", "Datetime", "Timestamp"])?,
            open: find(&["Open"])?,
            high: find(&["High"])?,
            low: find(&["Low"])?,
            close: find(&["Close"])?,
            volume: find(&["Volume"])?,
        })
    }

    fn bar(&self, record: &StringRecord) -> Option<PriceBar> {
        let number = |i: usize| record.get(i)?.parse::<f64>().ok();
        Some(PriceBar::new(
            parse_timestamp(record.get(self.date)?)?,
            number(self.open)?,
            number(self.high)?,
            number(self.low)?,
            number(self.close)?,
            number(self.volume)?,
        ))
    }
}

/// Parse the date formats written by common market-data exporters
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%:z") {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(ts.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
}

/// Parse CSV bytes into bars, skipping rows that do not parse
pub fn parse_bars(bytes: &[u8]) -> Result<Vec<PriceBar>, CollaboratorError> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(bytes);
    let header = reader
        .headers()
        .map_err(|e| CollaboratorError::Malformed(format!("CSV header: {e}")))?
        .clone();
    let columns = Columns::from_header(&header)?;

    let mut bars = Vec::new();
    let mut skipped = 0usize;
    for record in reader.records() {
        let record = record.map_err(|e| CollaboratorError::Malformed(format!("CSV row: {e}")))?;
        match columns.bar(&record) {
            Some(bar) => bars.push(bar),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!(skipped, "Skipped CSV rows that did not parse");
    }
    Ok(bars)
}

impl CsvIngestor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn file_for(&self, ticker: &Ticker) -> PathBuf {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) if meta.is_dir() => self.path.join(format!("{ticker}.csv")),
            _ => self.path.clone(),
        }
    }
}

#[async_trait]
impl Ingestor for CsvIngestor {
    async fn fetch(
        &self,
        ticker: &Ticker,
        window: HistoryWindow,
    ) -> Result<Vec<PriceBar>, CollaboratorError> {
        let file = self.file_for(ticker).await;
        let bytes = match tokio::fs::read(&file).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CollaboratorError::NotFound(format!(
                    "no CSV history for {ticker} at {}",
                    file.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let mut bars = parse_bars(&bytes)?;
        bars.sort_by_key(|b| b.timestamp);
        let Some(newest) = bars.last().map(|b| b.timestamp) else {
            return Err(CollaboratorError::NotFound(format!(
                "{} holds no usable rows",
                file.display()
            )));
        };

        let cutoff = newest - window.lookback.lookback();
        bars.retain(|b| b.timestamp > cutoff);
        let bars = coarsen_to(bars, window.interval.duration());
        if bars.len() < 2 {
            warn!(ticker = %ticker, file = %file.display(), "CSV window holds fewer than two bars");
        }
        debug!(ticker = %ticker, bars = bars.len(), window = %window, "Loaded CSV history");
        Ok(bars)
    }

    fn name(&self) -> &str {
        "csv"
    }
}
