//! Gap detection and live-mode recovery.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use session::bar::{Interval, SharedBar};
use session::config::GapFillConfig;
use session::data::SessionData;
use session::error::EngineError;
use session::metrics::PipelineMetrics;
use session::source::HistoricalSource;

/// A detected hole in a session bar sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct GapInfo {
    pub symbol: String,
    pub interval: Interval,
    /// Timestamp of the first missing bar.
    pub start_ts: DateTime<Utc>,
    /// Timestamp one step past the last missing bar.
    pub end_ts: DateTime<Utc>,
    pub bar_count: u32,
    pub retry_count: u32,
    pub last_retry_ts: Option<DateTime<Utc>>,
}

/// Missing `[start, end)` timestamp ranges in a session sequence.
/// `open` anchors the expected grid; `until` is the effective time of
/// the newest knowable bar.
pub fn detect_gaps(
    bars: &[SharedBar],
    interval: Interval,
    open: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let step = Duration::seconds(interval.seconds() as i64);
    let session: Vec<&SharedBar> = bars
        .iter()
        .filter(|bar| bar.timestamp >= open && bar.timestamp + step <= until)
        .collect();

    let mut gaps = Vec::new();
    let Some(first) = session.first() else {
        let expected = (until - open).num_seconds() / step.num_seconds();
        if expected > 0 {
            gaps.push((open, open + step * expected as i32));
        }
        return gaps;
    };

    if first.timestamp > open {
        gaps.push((open, first.timestamp));
    }
    for pair in session.windows(2) {
        let expected_next = pair[0].timestamp + step;
        if pair[1].timestamp > expected_next {
            gaps.push((expected_next, pair[1].timestamp));
        }
    }
    gaps
}

/// Tracks open gaps across detection passes and drives bounded-retry
/// recovery in live mode.
pub struct GapTracker {
    config: GapFillConfig,
    open_gaps: HashMap<(String, Interval, DateTime<Utc>), GapInfo>,
}

impl GapTracker {
    pub fn new(config: GapFillConfig) -> Self {
        Self {
            config,
            open_gaps: HashMap::new(),
        }
    }

    pub fn config(&self) -> GapFillConfig {
        self.config
    }

    pub fn open_gap_count(&self) -> usize {
        self.open_gaps.len()
    }

    /// Reconciles the tracked set for one sequence against a fresh
    /// detection pass. Newly seen gaps are recorded; tracked gaps that no
    /// longer appear are counted as filled.
    pub fn reconcile(
        &mut self,
        symbol: &str,
        interval: Interval,
        detected: &[(DateTime<Utc>, DateTime<Utc>)],
        metrics: &PipelineMetrics,
    ) {
        let step = Duration::seconds(interval.seconds() as i64);
        let mut still_open = Vec::new();
        for &(start, end) in detected {
            let key = (symbol.to_string(), interval, start);
            still_open.push(key.clone());
            let bar_count = ((end - start).num_seconds() / step.num_seconds()).max(0) as u32;
            match self.open_gaps.get_mut(&key) {
                Some(gap) => {
                    gap.end_ts = end;
                    gap.bar_count = bar_count;
                }
                None => {
                    warn!(
                        symbol,
                        interval = interval.as_str(),
                        start = %start,
                        bars = bar_count,
                        "gap detected"
                    );
                    metrics.incr_gaps_detected();
                    self.open_gaps.insert(
                        key,
                        GapInfo {
                            symbol: symbol.to_string(),
                            interval,
                            start_ts: start,
                            end_ts: end,
                            bar_count,
                            retry_count: 0,
                            last_retry_ts: None,
                        },
                    );
                }
            }
        }

        self.open_gaps.retain(|key, gap| {
            if key.0 != symbol || key.1 != interval || still_open.contains(key) {
                return true;
            }
            info!(
                symbol = %gap.symbol,
                interval = gap.interval.as_str(),
                start = %gap.start_ts,
                "gap recovered"
            );
            metrics.incr_gaps_filled();
            false
        });
    }

    /// One recovery sweep: re-requests bars for every open gap whose
    /// retry budget and cadence allow it. Gaps out of retries are
    /// abandoned as permanently degraded.
    pub fn sweep(
        &mut self,
        store: &SessionData,
        source: &dyn HistoricalSource,
        now: DateTime<Utc>,
        metrics: &PipelineMetrics,
    ) -> Result<(), EngineError> {
        let cadence = Duration::seconds(self.config.cadence_secs as i64);
        let max_retries = self.config.max_retries;

        let mut abandoned = Vec::new();
        for (key, gap) in self.open_gaps.iter_mut() {
            if let Some(last) = gap.last_retry_ts {
                if now - last < cadence {
                    continue;
                }
            }
            if gap.retry_count >= max_retries {
                warn!(
                    symbol = %gap.symbol,
                    interval = gap.interval.as_str(),
                    start = %gap.start_ts,
                    retries = gap.retry_count,
                    "gap abandoned"
                );
                metrics.incr_gaps_abandoned();
                abandoned.push(key.clone());
                continue;
            }

            gap.retry_count += 1;
            gap.last_retry_ts = Some(now);
            let recovered = source.get_bars(&gap.symbol, gap.interval, gap.start_ts, gap.end_ts)?;
            for bar in recovered {
                store.append_bar(std::sync::Arc::new(bar));
            }
        }
        for key in abandoned {
            self.open_gaps.remove(&key);
        }
        Ok(())
    }
}
