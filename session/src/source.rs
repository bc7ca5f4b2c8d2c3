//! External data source interfaces.
//!
//! The historical store and the live feed are collaborators outside this
//! system; the pipeline only consumes these traits. `MemoryHistory` and
//! `ReplayLiveSource` are the bundled implementations used by the sim
//! app and the test suites, `CsvHistory` reads bar files from disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, NaiveDateTime, Utc};
use crossbeam::channel::{self, Receiver};
use serde::Deserialize;

use crate::bar::{Bar, Interval, Quote, SharedBar, SharedQuote, StreamKind};
use crate::error::EngineError;

/// One unit flowing through a merged input stream.
#[derive(Debug, Clone)]
pub enum StreamItem {
    Bar(SharedBar),
    Quote(SharedQuote),
}

impl StreamItem {
    pub fn symbol(&self) -> &str {
        match self {
            Self::Bar(bar) => &bar.symbol,
            Self::Quote(quote) => &quote.symbol,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Bar(bar) => bar.timestamp,
            Self::Quote(quote) => quote.timestamp,
        }
    }

    /// When this item becomes knowable. A bar is only complete at its
    /// window close; a quote is known at its exact timestamp.
    pub fn effective_time(&self) -> DateTime<Utc> {
        match self {
            Self::Bar(bar) => bar.close_time(),
            Self::Quote(quote) => quote.timestamp,
        }
    }
}

/// Read access to persisted bars; also serves live-mode gap fills.
pub trait HistoricalSource: Send + Sync {
    fn get_bars(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, EngineError>;

    fn get_quotes(
        &self,
        _symbol: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<Quote>, EngineError> {
        Ok(Vec::new())
    }
}

/// In-memory historical source, ordered on insert.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    bars: RwLock<HashMap<(String, Interval), Vec<Bar>>>,
    quotes: RwLock<HashMap<String, Vec<Quote>>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bar(&self, bar: Bar) {
        let mut guard = self.bars.write().expect("memory history lock poisoned");
        let series = guard
            .entry((bar.symbol.clone(), bar.interval))
            .or_default();
        let pos = series
            .binary_search_by_key(&bar.timestamp, |b| b.timestamp)
            .unwrap_or_else(|pos| pos);
        series.insert(pos, bar);
    }

    pub fn push_bars(&self, bars: impl IntoIterator<Item = Bar>) {
        for bar in bars {
            self.push_bar(bar);
        }
    }

    pub fn push_quote(&self, quote: Quote) {
        let mut guard = self.quotes.write().expect("memory history lock poisoned");
        let series = guard.entry(quote.symbol.clone()).or_default();
        let pos = series
            .binary_search_by_key(&quote.timestamp, |q| q.timestamp)
            .unwrap_or_else(|pos| pos);
        series.insert(pos, quote);
    }
}

impl HistoricalSource for MemoryHistory {
    fn get_bars(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, EngineError> {
        let guard = self.bars.read().expect("memory history lock poisoned");
        Ok(guard
            .get(&(symbol.to_string(), interval))
            .map(|series| {
                series
                    .iter()
                    .filter(|bar| bar.timestamp >= start && bar.timestamp < end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn get_quotes(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Quote>, EngineError> {
        let guard = self.quotes.read().expect("memory history lock poisoned");
        Ok(guard
            .get(symbol)
            .map(|series| {
                series
                    .iter()
                    .filter(|quote| quote.timestamp >= start && quote.timestamp < end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[derive(Debug, Deserialize)]
struct CsvBarRow {
    datetime: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

/// Historical source backed by one CSV file per symbol and interval,
/// named `{symbol}_{interval}.csv` under a data directory.
#[derive(Debug)]
pub struct CsvHistory {
    dir: PathBuf,
}

impl CsvHistory {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn file_for(&self, symbol: &str, interval: Interval) -> PathBuf {
        self.dir.join(format!("{}_{}.csv", symbol, interval.as_str()))
    }
}

impl HistoricalSource for CsvHistory {
    fn get_bars(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, EngineError> {
        let path = self.file_for(symbol, interval);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::Reader::from_path(&path)?;
        let mut out = Vec::new();
        for row in reader.deserialize::<CsvBarRow>() {
            let row = row?;
            let timestamp = parse_datetime(&row.datetime)?;
            if timestamp < start || timestamp >= end {
                continue;
            }
            out.push(Bar {
                symbol: symbol.to_string(),
                interval,
                timestamp,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            });
        }
        out.sort_by_key(|bar| bar.timestamp);
        Ok(out)
    }
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>, EngineError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    let patterns = ["%Y-%m-%d %H:%M:%S%.f", "%Y/%m/%d %H:%M:%S%.f"];
    for pattern in patterns {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, pattern) {
            return Ok(DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc));
        }
    }

    Err(EngineError::Source(format!("invalid datetime: {value}")))
}

/// Live market-data subscription API.
pub trait LiveSource: Send + Sync {
    /// Whether the source can deliver this stream live.
    fn can_stream(&self, symbol: &str, kind: StreamKind, interval: Option<Interval>) -> bool;

    fn subscribe(
        &self,
        symbol: &str,
        kind: StreamKind,
        interval: Option<Interval>,
    ) -> Result<Receiver<StreamItem>, EngineError>;
}

/// Live source that replays canned items through bounded channels.
/// Used by the live app without a real feed and by the live-mode tests.
#[derive(Debug, Default)]
pub struct ReplayLiveSource {
    items: RwLock<HashMap<(String, StreamKind), Vec<StreamItem>>>,
}

impl ReplayLiveSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage_bar(&self, bar: Bar) {
        let mut guard = self.items.write().expect("replay source lock poisoned");
        guard
            .entry((bar.symbol.clone(), StreamKind::Bars))
            .or_default()
            .push(StreamItem::Bar(Arc::new(bar)));
    }

    pub fn stage_quote(&self, quote: Quote) {
        let mut guard = self.items.write().expect("replay source lock poisoned");
        guard
            .entry((quote.symbol.clone(), StreamKind::Quotes))
            .or_default()
            .push(StreamItem::Quote(Arc::new(quote)));
    }
}

impl LiveSource for ReplayLiveSource {
    fn can_stream(&self, symbol: &str, kind: StreamKind, interval: Option<Interval>) -> bool {
        let guard = self.items.read().expect("replay source lock poisoned");
        let Some(items) = guard.get(&(symbol.to_string(), kind)) else {
            return false;
        };
        match interval {
            None => !items.is_empty(),
            Some(wanted) => items.iter().any(|item| match item {
                StreamItem::Bar(bar) => bar.interval == wanted,
                StreamItem::Quote(_) => true,
            }),
        }
    }

    fn subscribe(
        &self,
        symbol: &str,
        kind: StreamKind,
        interval: Option<Interval>,
    ) -> Result<Receiver<StreamItem>, EngineError> {
        let guard = self.items.read().expect("replay source lock poisoned");
        let staged = guard
            .get(&(symbol.to_string(), kind))
            .cloned()
            .unwrap_or_default();

        let filtered: Vec<StreamItem> = staged
            .into_iter()
            .filter(|item| match (item, interval) {
                (StreamItem::Bar(bar), Some(wanted)) => bar.interval == wanted,
                _ => true,
            })
            .collect();

        let (tx, rx) = channel::bounded(filtered.len().max(1));
        for item in filtered {
            tx.send(item)
                .map_err(|_| EngineError::Source("replay channel closed".to_string()))?;
        }
        // Dropping the sender lets the coordinator observe end of stream.
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{HistoricalSource, LiveSource, MemoryHistory, ReplayLiveSource};
    use crate::bar::{Bar, Interval, StreamKind};

    fn bar(minute: u32) -> Bar {
        Bar {
            symbol: "AAPL".to_string(),
            interval: Interval::M1,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 9, 30 + minute, 0).unwrap(),
            open: 100.0,
            high: 100.5,
            low: 99.5,
            close: 100.2,
            volume: 1000.0,
        }
    }

    #[test]
    fn memory_history_filters_half_open_range() {
        let history = MemoryHistory::new();
        history.push_bars([bar(2), bar(0), bar(1)]);

        let start = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 2, 9, 32, 0).unwrap();
        let bars = history
            .get_bars("AAPL", Interval::M1, start, end)
            .expect("memory source");
        assert_eq!(bars.len(), 2);
        assert!(bars[0].timestamp < bars[1].timestamp);
    }

    #[test]
    fn replay_source_delivers_staged_items_then_disconnects() {
        let source = ReplayLiveSource::new();
        source.stage_bar(bar(0));
        source.stage_bar(bar(1));

        assert!(source.can_stream("AAPL", StreamKind::Bars, Some(Interval::M1)));
        assert!(!source.can_stream("AAPL", StreamKind::Quotes, None));

        let rx = source
            .subscribe("AAPL", StreamKind::Bars, Some(Interval::M1))
            .expect("subscribe");
        assert_eq!(rx.iter().count(), 2);
    }
}
