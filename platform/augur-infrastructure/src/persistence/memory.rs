use super::canonicalize_bars;
use augur_domain::errors::StoreError;
use augur_domain::repositories::row_store::{BarQuery, CancelToken, KnownRange, RowStore};
use augur_domain::value_objects::bar::Bar;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::fs::File;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct OhlcvRecord {
    pub timestamp_utc: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Bars held in memory, sorted and unique by timestamp. Raw query artifacts
/// are not supported.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRowStore {
    bars: Vec<Bar>,
}

impl InMemoryRowStore {
    pub fn new(mut bars: Vec<Bar>) -> Self {
        let dropped = canonicalize_bars(&mut bars);
        if dropped > 0 {
            tracing::debug!(dropped, "dropped invalid or duplicate bars");
        }
        Self { bars }
    }

    pub fn from_csv(path: &Path) -> Result<Self, String> {
        Ok(Self::new(load_csv(path)?))
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

impl RowStore for InMemoryRowStore {
    fn known_range(&self) -> Result<Option<KnownRange>, StoreError> {
        Ok(match (self.bars.first(), self.bars.last()) {
            (Some(first), Some(last)) => Some(KnownRange {
                first: first.timestamp,
                last: last.timestamp,
            }),
            _ => None,
        })
    }

    fn load_bars(&self, query: &BarQuery, cancel: &CancelToken) -> Result<Vec<Bar>, StoreError> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let from = self.bars.partition_point(|b| b.timestamp < query.start);
        let to = self.bars.partition_point(|b| b.timestamp < query.end);
        let bars = self.bars[from..to.max(from)].to_vec();
        metrics::counter!("augur.infra.memory.load_bars.calls_total", "result" => "ok").increment(1);
        metrics::counter!("augur.infra.memory.load_bars.bars_total").increment(bars.len() as u64);
        Ok(bars)
    }
}

/// Reads `timestamp_utc,open,high,low,close,volume` rows. Timestamps may be
/// RFC 3339, `YYYY-MM-DD HH:MM:SS[+zz]` (UTC when no offset) or epoch seconds.
pub fn load_csv(path: &Path) -> Result<Vec<Bar>, String> {
    let span = tracing::info_span!("infra.csv.load_ohlcv", path = %path.display());
    let _enter = span.enter();

    let file = File::open(path)
        .map_err(|err| format!("failed to open OHLCV CSV {}: {}", path.display(), err))?;
    let mut reader = csv::Reader::from_reader(file);

    let mut bars = Vec::new();
    for result in reader.deserialize::<OhlcvRecord>() {
        let record = result.map_err(|err| format!("failed to parse CSV row: {}", err))?;
        bars.push(Bar {
            timestamp: parse_timestamp(&record.timestamp_utc)?,
            open: record.open,
            high: record.high,
            low: record.low,
            close: record.close,
            volume: record.volume,
        });
    }
    tracing::debug!(rows = bars.len(), "loaded OHLCV CSV");
    Ok(bars)
}

fn parse_timestamp(value: &str) -> Result<i64, String> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.timestamp());
    }
    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%z") {
        return Ok(dt.timestamp());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        let dt: DateTime<Utc> = Utc.from_utc_datetime(&naive);
        return Ok(dt.timestamp());
    }
    if let Ok(epoch) = value.parse::<i64>() {
        return Ok(epoch);
    }

    Err(format!("unsupported timestamp format: {}", value))
}
