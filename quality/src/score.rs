//! Completeness scoring for session bar sequences.

use chrono::{DateTime, Duration, Utc};

use session::bar::Interval;
use session::data::SessionData;

/// Bars expected between session open and an effective time, given the
/// interval cadence. Zero before the first bar could have closed.
pub fn expected_bars(open: DateTime<Utc>, until: DateTime<Utc>, interval: Interval) -> u64 {
    if until <= open {
        return 0;
    }
    let elapsed = (until - open).num_seconds().max(0) as u64;
    elapsed / interval.seconds() as u64
}

/// Percentage of expected session bars actually present, 100 when
/// nothing is expected yet.
pub fn session_quality(
    store: &SessionData,
    symbol: &str,
    interval: Interval,
    open: DateTime<Utc>,
    until: DateTime<Utc>,
) -> f64 {
    let expected = expected_bars(open, until, interval);
    if expected == 0 {
        return 100.0;
    }
    let horizon = until - Duration::seconds(interval.seconds() as i64);
    let actual = store.with_bars(symbol, interval, |bars| {
        bars.iter()
            .filter(|bar| bar.timestamp >= open && bar.timestamp <= horizon)
            .count()
    }) as u64;
    let actual = actual.min(expected);
    actual as f64 / expected as f64 * 100.0
}
