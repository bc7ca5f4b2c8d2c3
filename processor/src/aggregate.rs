//! Derived-bar aggregation from base bars.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use session::bar::{Bar, Interval, SharedBar};

/// An in-progress derived bar for one aggregation bucket.
#[derive(Debug, Clone)]
struct PendingBar {
    bucket: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl PendingBar {
    fn start(bucket: DateTime<Utc>, bar: &Bar) -> Self {
        Self {
            bucket,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
        }
    }

    fn absorb(&mut self, bar: &Bar) {
        self.high = self.high.max(bar.high);
        self.low = self.low.min(bar.low);
        self.close = bar.close;
        self.volume += bar.volume;
    }

    fn finish(self, symbol: &str, interval: Interval) -> SharedBar {
        Arc::new(Bar {
            symbol: symbol.to_string(),
            interval,
            timestamp: self.bucket,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        })
    }
}

/// Start of the aggregation bucket a timestamp belongs to, aligned to
/// epoch multiples of the interval length.
pub fn bucket_start(timestamp: DateTime<Utc>, interval: Interval) -> DateTime<Utc> {
    let step = interval.seconds() as i64;
    let aligned = timestamp.timestamp() - timestamp.timestamp().rem_euclid(step);
    Utc.timestamp_opt(aligned, 0)
        .single()
        .unwrap_or(timestamp)
}

/// Rolls base bars into coarser derived bars, one accumulator per
/// (symbol, derived interval).
#[derive(Debug, Default)]
pub struct Aggregator {
    pending: HashMap<(String, Interval), PendingBar>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one base bar into the accumulator for `derived`. Returns any
    /// derived bars completed by it: the sealed bucket when this base bar
    /// reaches the bucket edge, plus a partial flushed when the base bar
    /// opens a later bucket after a gap. A partial left over from a
    /// previous day is discarded rather than flushed.
    pub fn apply(&mut self, base: &Bar, derived: Interval) -> Vec<SharedBar> {
        let bucket = bucket_start(base.timestamp, derived);
        let key = (base.symbol.clone(), derived);

        let mut completed = Vec::new();
        match self.pending.get_mut(&key) {
            Some(pending) if pending.bucket == bucket => pending.absorb(base),
            Some(pending) => {
                let stale = pending.bucket.date_naive() != bucket.date_naive();
                let previous = self
                    .pending
                    .insert(key, PendingBar::start(bucket, base))
                    .map(|p| p.finish(&base.symbol, derived));
                if let Some(previous) = previous {
                    if !stale {
                        completed.push(previous);
                    }
                }
            }
            None => {
                self.pending.insert(key, PendingBar::start(bucket, base));
            }
        }

        // The base bar whose close reaches the bucket edge seals it.
        if base.timestamp + Duration::seconds(base.interval.seconds() as i64)
            >= bucket + Duration::seconds(derived.seconds() as i64)
        {
            if let Some(pending) = self.pending.remove(&(base.symbol.clone(), derived)) {
                completed.push(pending.finish(&base.symbol, derived));
            }
        }
        completed
    }
}
