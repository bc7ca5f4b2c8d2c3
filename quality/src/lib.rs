//! `quality` crate entry.
//!
//! The data quality manager scores session sequences for completeness,
//! tracks the holes behind any lost points, and in live mode drives
//! bounded-retry recovery against the historical source. It sits off
//! the paced path: the coordinator never waits for it.

pub mod gap;
pub mod score;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use tracing::warn;

use session::bar::Interval;
use session::config::SessionConfig;
use session::data::SessionData;
use session::error::EngineError;
use session::metrics::PipelineMetrics;
use session::notify::{BarNotice, EdgeTally, NoticeKind, QualityUpdate};
use session::source::HistoricalSource;

use crate::gap::GapTracker;

const RECV_POLL: StdDuration = StdDuration::from_millis(50);

/// Wiring between the quality manager and the rest of the pipeline.
pub struct QualityLinks {
    pub notices_rx: Receiver<BarNotice>,
    pub updates_tx: Sender<QualityUpdate>,
    /// Inbound notices, acknowledged once handled.
    pub tally: Arc<EdgeTally>,
    pub metrics: Arc<PipelineMetrics>,
    pub stop: Arc<AtomicBool>,
}

pub struct QualityManager {
    store: Arc<SessionData>,
    source: Arc<dyn HistoricalSource>,
    links: QualityLinks,
    /// Recovery sweeps run only in live mode.
    fill_enabled: bool,
    sweep_cadence: StdDuration,
    derived: HashMap<String, Vec<Interval>>,
    tracker: GapTracker,
    /// Last published score per sequence, to publish on change only.
    last_scores: HashMap<(String, Interval), f64>,
    /// Effective time of the newest knowable bar per sequence.
    last_until: HashMap<(String, Interval), DateTime<Utc>>,
    active_date: Option<NaiveDate>,
}

impl QualityManager {
    pub fn new(
        config: &SessionConfig,
        store: Arc<SessionData>,
        source: Arc<dyn HistoricalSource>,
        links: QualityLinks,
    ) -> Self {
        let derived = config
            .symbols
            .iter()
            .map(|symbol| (symbol.symbol.clone(), symbol.derived_intervals()))
            .collect();
        Self {
            store,
            source,
            links,
            fill_enabled: config.mode == session::config::RunMode::Live,
            sweep_cadence: StdDuration::from_secs(config.gap_fill.cadence_secs.max(1)),
            derived,
            tracker: GapTracker::new(config.gap_fill),
            last_scores: HashMap::new(),
            last_until: HashMap::new(),
            active_date: None,
        }
    }

    /// Worker loop. Exits when the notice channel disconnects or the
    /// stop flag trips.
    pub fn run(&mut self) {
        let mut next_sweep = Instant::now() + self.sweep_cadence;
        loop {
            if self.links.stop.load(Ordering::Relaxed) {
                return;
            }
            match self.links.notices_rx.recv_timeout(RECV_POLL) {
                Ok(notice) => {
                    self.handle_notice(&notice);
                    self.links.tally.record_handled();
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }
            if self.fill_enabled && Instant::now() >= next_sweep {
                if let Err(error) = self.run_sweep() {
                    warn!(error = %error, "gap recovery sweep failed");
                }
                next_sweep = Instant::now() + self.sweep_cadence;
            }
        }
    }

    fn handle_notice(&mut self, notice: &BarNotice) {
        if notice.kind != NoticeKind::Bars {
            return;
        }
        let Some(interval) = notice.interval else {
            return;
        };
        let Some(bounds) = self.store.bounds() else {
            return;
        };
        if self.active_date != Some(bounds.date) {
            self.reset_session(bounds.date);
        }

        let until = notice.timestamp + Duration::seconds(interval.seconds());
        self.last_until
            .insert((notice.symbol.clone(), interval), until);
        self.rescore(&notice.symbol, interval, bounds.open, until);
    }

    /// Recomputes the score and gap set for one base sequence and
    /// propagates the score to its derived intervals.
    fn rescore(&mut self, symbol: &str, interval: Interval, open: DateTime<Utc>, until: DateTime<Utc>) {
        let quality = score::session_quality(&self.store, symbol, interval, open, until);

        let detected = self.store.with_bars(symbol, interval, |bars| {
            gap::detect_gaps(bars, interval, open, until)
        });
        self.tracker
            .reconcile(symbol, interval, &detected, &self.links.metrics);

        self.publish(symbol, interval, quality);
        let derived = self.derived.get(symbol).cloned().unwrap_or_default();
        for derived_interval in derived {
            self.publish(symbol, derived_interval, quality);
        }
    }

    fn publish(&mut self, symbol: &str, interval: Interval, quality: f64) {
        self.store.set_quality(symbol, interval, quality);
        let key = (symbol.to_string(), interval);
        let changed = self
            .last_scores
            .get(&key)
            .is_none_or(|last| (last - quality).abs() > f64::EPSILON);
        if changed {
            self.last_scores.insert(key, quality);
            let _ = self.links.updates_tx.send(QualityUpdate {
                symbol: symbol.to_string(),
                interval,
                score: quality,
            });
        }
    }

    /// One live recovery pass, followed by a fresh detection pass so a
    /// closed hole is reflected immediately.
    fn run_sweep(&mut self) -> Result<(), EngineError> {
        self.tracker
            .sweep(&self.store, &*self.source, Utc::now(), &self.links.metrics)?;

        let Some(bounds) = self.store.bounds() else {
            return Ok(());
        };
        let sequences: Vec<((String, Interval), DateTime<Utc>)> = self
            .last_until
            .iter()
            .map(|(key, until)| (key.clone(), *until))
            .collect();
        for ((symbol, interval), until) in sequences {
            self.rescore(&symbol, interval, bounds.open, until);
        }
        Ok(())
    }

    fn reset_session(&mut self, date: NaiveDate) {
        self.active_date = Some(date);
        self.tracker = GapTracker::new(self.tracker.config());
        self.last_scores.clear();
        self.last_until.clear();
    }
}
