//! Session-scoped shared data store.
//!
//! One `SessionData` instance exists per active session. All four pipeline
//! workers hold the same `Arc` and dereference it instead of copying
//! payloads through queues. Write domains are disjoint by convention:
//! the coordinator appends streamed bars, the processor appends derived
//! bars and real-time indicators, the quality manager writes scores.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::bar::{Interval, SharedBar, SharedQuote};

/// Market open/close of the active trading session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionBounds {
    pub date: NaiveDate,
    pub open: DateTime<Utc>,
    pub close: DateTime<Utc>,
}

/// A historical indicator series with O(1) time-to-index lookup.
///
/// Values are laid out on a fixed step grid starting at `start`; the
/// index for a timestamp is a single integer division.
#[derive(Debug, Clone)]
pub struct IndexedSeries {
    start: DateTime<Utc>,
    step: Duration,
    values: Vec<f64>,
}

impl IndexedSeries {
    pub fn new(start: DateTime<Utc>, step: Duration, values: Vec<f64>) -> Self {
        let step = if step > Duration::zero() {
            step
        } else {
            Duration::seconds(1)
        };
        Self { start, step, values }
    }

    pub fn index_at(&self, timestamp: DateTime<Utc>) -> Option<usize> {
        if timestamp < self.start {
            return None;
        }
        let offset = (timestamp - self.start).num_seconds() / self.step.num_seconds();
        let index = offset as usize;
        (index < self.values.len()).then_some(index)
    }

    pub fn value_at(&self, timestamp: DateTime<Utc>) -> Option<f64> {
        self.index_at(timestamp).map(|index| self.values[index])
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Default)]
struct IntervalSeries {
    bars: Vec<SharedBar>,
    quality: Option<f64>,
    realtime: HashMap<String, f64>,
}

#[derive(Debug, Default)]
struct SymbolData {
    intervals: HashMap<Interval, IntervalSeries>,
    quotes: Vec<SharedQuote>,
}

/// Unified per-session store of bars, indicators and quality scores.
#[derive(Debug, Default)]
pub struct SessionData {
    symbols: RwLock<HashMap<String, SymbolData>>,
    historical: RwLock<HashMap<String, IndexedSeries>>,
    bounds: RwLock<Option<SessionBounds>>,
}

impl SessionData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the session active and records its market bounds.
    pub fn activate(&self, bounds: SessionBounds) {
        let mut guard = self.bounds.write().expect("session bounds lock poisoned");
        *guard = Some(bounds);
    }

    pub fn deactivate(&self) {
        let mut guard = self.bounds.write().expect("session bounds lock poisoned");
        *guard = None;
    }

    pub fn bounds(&self) -> Option<SessionBounds> {
        *self.bounds.read().expect("session bounds lock poisoned")
    }

    pub fn is_active(&self) -> bool {
        self.bounds().is_some()
    }

    /// Appends a bar to the symbol/interval sequence, keeping timestamps
    /// strictly increasing. A bar whose timestamp is already present is
    /// suppressed and `false` is returned. An older timestamp (a gap fill
    /// recovered after newer bars arrived) is placed at its sorted slot.
    pub fn append_bar(&self, bar: SharedBar) -> bool {
        let mut guard = self.symbols.write().expect("session data lock poisoned");
        let series = guard
            .entry(bar.symbol.clone())
            .or_default()
            .intervals
            .entry(bar.interval)
            .or_default();

        match series.bars.last() {
            None => {
                series.bars.push(bar);
                true
            }
            Some(last) if bar.timestamp > last.timestamp => {
                series.bars.push(bar);
                true
            }
            Some(_) => {
                match series
                    .bars
                    .binary_search_by_key(&bar.timestamp, |b| b.timestamp)
                {
                    Ok(_) => false,
                    Err(pos) => {
                        series.bars.insert(pos, bar);
                        true
                    }
                }
            }
        }
    }

    pub fn append_quote(&self, quote: SharedQuote) {
        let mut guard = self.symbols.write().expect("session data lock poisoned");
        guard.entry(quote.symbol.clone()).or_default().quotes.push(quote);
    }

    /// Returns shared handles to the live sequence. The handles are `Arc`
    /// clones; the bars themselves are never copied.
    pub fn get_bars(&self, symbol: &str, interval: Interval) -> Vec<SharedBar> {
        let guard = self.symbols.read().expect("session data lock poisoned");
        guard
            .get(symbol)
            .and_then(|data| data.intervals.get(&interval))
            .map(|series| series.bars.clone())
            .unwrap_or_default()
    }

    /// Zero-copy read access to the sequence for hot paths.
    pub fn with_bars<R>(
        &self,
        symbol: &str,
        interval: Interval,
        f: impl FnOnce(&[SharedBar]) -> R,
    ) -> R {
        let guard = self.symbols.read().expect("session data lock poisoned");
        let bars = guard
            .get(symbol)
            .and_then(|data| data.intervals.get(&interval))
            .map(|series| series.bars.as_slice())
            .unwrap_or(&[]);
        f(bars)
    }

    pub fn get_bar_count(&self, symbol: &str, interval: Interval) -> usize {
        self.with_bars(symbol, interval, |bars| bars.len())
    }

    pub fn last_bar(&self, symbol: &str, interval: Interval) -> Option<SharedBar> {
        self.with_bars(symbol, interval, |bars| bars.last().cloned())
    }

    pub fn quote_count(&self, symbol: &str) -> usize {
        let guard = self.symbols.read().expect("session data lock poisoned");
        guard.get(symbol).map(|data| data.quotes.len()).unwrap_or(0)
    }

    pub fn set_quality(&self, symbol: &str, interval: Interval, pct: f64) {
        let mut guard = self.symbols.write().expect("session data lock poisoned");
        guard
            .entry(symbol.to_string())
            .or_default()
            .intervals
            .entry(interval)
            .or_default()
            .quality = Some(pct.clamp(0.0, 100.0));
    }

    pub fn get_quality(&self, symbol: &str, interval: Interval) -> Option<f64> {
        let guard = self.symbols.read().expect("session data lock poisoned");
        guard
            .get(symbol)
            .and_then(|data| data.intervals.get(&interval))
            .and_then(|series| series.quality)
    }

    pub fn set_realtime_indicator(&self, symbol: &str, interval: Interval, name: &str, value: f64) {
        let mut guard = self.symbols.write().expect("session data lock poisoned");
        guard
            .entry(symbol.to_string())
            .or_default()
            .intervals
            .entry(interval)
            .or_default()
            .realtime
            .insert(name.to_string(), value);
    }

    pub fn get_realtime_indicator(&self, symbol: &str, interval: Interval, name: &str) -> Option<f64> {
        let guard = self.symbols.read().expect("session data lock poisoned");
        guard
            .get(symbol)
            .and_then(|data| data.intervals.get(&interval))
            .and_then(|series| series.realtime.get(name).copied())
    }

    pub fn set_historical_indicator(&self, name: &str, series: IndexedSeries) {
        let mut guard = self
            .historical
            .write()
            .expect("historical indicator lock poisoned");
        guard.insert(name.to_string(), series);
    }

    /// O(1) time-indexed lookup into a historical indicator series.
    pub fn get_historical_indicator(
        &self,
        name: &str,
        timestamp: DateTime<Utc>,
    ) -> Option<f64> {
        let guard = self
            .historical
            .read()
            .expect("historical indicator lock poisoned");
        guard.get(name).and_then(|series| series.value_at(timestamp))
    }

    pub fn historical_indicator_len(&self, name: &str) -> usize {
        let guard = self
            .historical
            .read()
            .expect("historical indicator lock poisoned");
        guard.get(name).map(|series| series.len()).unwrap_or(0)
    }

    /// Drops current-session bars and quotes, keeping anything loaded
    /// before market open. Real-time indicators are session scoped and
    /// cleared with them; historical indicators stay until the next
    /// session reload replaces them.
    pub fn clear_session_bars(&self) {
        let Some(bounds) = self.bounds() else {
            return;
        };
        let mut guard = self.symbols.write().expect("session data lock poisoned");
        for data in guard.values_mut() {
            for series in data.intervals.values_mut() {
                series.bars.retain(|bar| bar.timestamp < bounds.open);
                series.realtime.clear();
            }
            data.quotes.retain(|quote| quote.timestamp < bounds.open);
        }
    }

    pub fn clear_all(&self) {
        self.symbols
            .write()
            .expect("session data lock poisoned")
            .clear();
        self.historical
            .write()
            .expect("historical indicator lock poisoned")
            .clear();
        self.deactivate();
    }
}
