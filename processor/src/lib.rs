//! `processor` crate entry.
//!
//! The data processor consumes generation notices for streamed base
//! bars, rolls them into the coarser derived bars the session asked
//! for, refreshes realtime indicators, and forwards one notice per
//! appended bar to the analysis engine. The coordinator edge is paced:
//! readiness is signalled only after a notice is fully handled.

pub mod aggregate;
pub mod indicators;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use session::bar::{Interval, SharedBar};
use session::config::{IndicatorConfig, SessionConfig};
use session::data::SessionData;
use session::error::EngineError;
use session::metrics::PipelineMetrics;
use session::notify::{BarNotice, EdgeTally, NoticeKind};
use session::subscription::{PaceMode, StreamSubscription};

const RECV_POLL: StdDuration = StdDuration::from_millis(50);

/// Wiring between the processor and the rest of the pipeline.
pub struct ProcessorLinks {
    pub notices_rx: Receiver<BarNotice>,
    pub analysis_tx: Sender<BarNotice>,
    /// Signalled by the processor once a notice is fully handled.
    pub ready: Arc<StreamSubscription>,
    /// Signalled by the analysis engine; the processor waits on it.
    pub analysis_ready: Arc<StreamSubscription>,
    /// Inbound notices, acknowledged once handled.
    pub tally: Arc<EdgeTally>,
    /// Outbound notices; sends are recorded, analysis acknowledges.
    pub analysis_edge: Arc<EdgeTally>,
    pub metrics: Arc<PipelineMetrics>,
    pub stop: Arc<AtomicBool>,
}

pub struct Processor {
    store: Arc<SessionData>,
    links: ProcessorLinks,
    mode: PaceMode,
    /// Derived intervals per symbol, smallest first.
    derived: HashMap<String, Vec<Interval>>,
    realtime_configs: Vec<IndicatorConfig>,
    aggregator: aggregate::Aggregator,
    awaiting_analysis: bool,
}

impl Processor {
    pub fn new(
        config: &SessionConfig,
        store: Arc<SessionData>,
        mode: PaceMode,
        links: ProcessorLinks,
    ) -> Self {
        let derived = config
            .symbols
            .iter()
            .map(|symbol| (symbol.symbol.clone(), symbol.derived_intervals()))
            .collect();
        Self {
            store,
            links,
            mode,
            derived,
            realtime_configs: config.realtime_indicators.clone(),
            aggregator: aggregate::Aggregator::new(),
            awaiting_analysis: false,
        }
    }

    /// Worker loop. Exits when the notice channel disconnects or the
    /// stop flag trips.
    pub fn run(&mut self) {
        loop {
            if self.links.stop.load(Ordering::Relaxed) {
                return;
            }
            let notice = match self.links.notices_rx.recv_timeout(RECV_POLL) {
                Ok(notice) => notice,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return,
            };
            if let Err(error) = self.handle_notice(&notice) {
                if matches!(error, EngineError::Stopped) {
                    return;
                }
                warn!(
                    symbol = %notice.symbol,
                    error = %error,
                    "notice processing failed"
                );
            }
            self.links.tally.record_handled();
            // Unblocks the coordinator for the next delivery.
            self.links.ready.signal_ready();
        }
    }

    fn handle_notice(&mut self, notice: &BarNotice) -> Result<(), EngineError> {
        if notice.kind != NoticeKind::Bars {
            return Ok(());
        }
        let Some(interval) = notice.interval else {
            return Ok(());
        };
        let Some(base) = self.noticed_bar(notice, interval) else {
            debug!(symbol = %notice.symbol, "noticed bar not found in store");
            return Ok(());
        };

        indicators::refresh(&self.store, &self.realtime_configs, &notice.symbol, interval);

        let mut outbound = vec![BarNotice {
            symbol: base.symbol.clone(),
            interval: Some(base.interval),
            timestamp: base.timestamp,
            kind: NoticeKind::Bars,
        }];

        let intervals = self
            .derived
            .get(&notice.symbol)
            .cloned()
            .unwrap_or_default();
        for interval in intervals {
            for derived in self.aggregator.apply(&base, interval) {
                let notice = BarNotice {
                    symbol: derived.symbol.clone(),
                    interval: Some(derived.interval),
                    timestamp: derived.timestamp,
                    kind: NoticeKind::Bars,
                };
                if self.store.append_bar(Arc::clone(&derived)) {
                    self.links.metrics.incr_bars_derived();
                    indicators::refresh(
                        &self.store,
                        &self.realtime_configs,
                        &notice.symbol,
                        derived.interval,
                    );
                    outbound.push(notice);
                }
            }
        }

        for notice in outbound {
            self.pace_analysis()?;
            if self.links.analysis_tx.send(notice).is_ok() {
                self.links.analysis_edge.record_sent();
                self.awaiting_analysis = true;
            }
        }
        Ok(())
    }

    /// The bar a notice refers to. Under edge pacing this is the latest
    /// bar of the sequence; a recovered out-of-order bar is looked up by
    /// timestamp.
    fn noticed_bar(&self, notice: &BarNotice, interval: Interval) -> Option<SharedBar> {
        self.store
            .with_bars(&notice.symbol, interval, |bars| {
                match bars.last() {
                    Some(last) if last.timestamp == notice.timestamp => Some(Arc::clone(last)),
                    _ => bars
                        .iter()
                        .rev()
                        .find(|bar| bar.timestamp == notice.timestamp)
                        .map(Arc::clone),
                }
            })
    }

    fn pace_analysis(&mut self) -> Result<(), EngineError> {
        if !self.awaiting_analysis {
            return Ok(());
        }
        match self
            .links
            .analysis_ready
            .wait_until_ready(self.mode, RECV_POLL, &self.links.stop)
        {
            Ok(()) => {
                self.awaiting_analysis = false;
                Ok(())
            }
            Err(EngineError::Overrun { stage }) => {
                warn!(stage = %stage, "analysis missed its deadline");
                self.links.metrics.incr_overruns();
                Ok(())
            }
            Err(error) => Err(error),
        }
    }
}
