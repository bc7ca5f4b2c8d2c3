//! `analysis` crate entry.
//!
//! The analysis engine dispatches store events to strategies, reviews
//! the signals they produce against the risk limits, and emits the
//! resulting decisions. Each strategy runs isolated: a panic disables
//! that strategy and the rest of the pipeline carries on.

pub mod risk;
pub mod signal;
pub mod strategy;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error};

use session::config::RiskConfig;
use session::data::SessionData;
use session::metrics::PipelineMetrics;
use session::notify::{BarNotice, EdgeTally, NoticeKind, QualityUpdate};
use session::subscription::StreamSubscription;

use crate::signal::{Decision, Signal};
use crate::strategy::Strategy;

const RECV_POLL: StdDuration = StdDuration::from_millis(50);

/// Wiring between the analysis engine and the rest of the pipeline.
pub struct AnalysisLinks {
    pub notices_rx: Receiver<BarNotice>,
    pub quality_rx: Receiver<QualityUpdate>,
    pub decisions_tx: Sender<Decision>,
    /// Signalled once a bar notice is fully handled.
    pub ready: Arc<StreamSubscription>,
    /// Inbound bar notices, acknowledged once handled.
    pub tally: Arc<EdgeTally>,
    pub metrics: Arc<PipelineMetrics>,
    pub stop: Arc<AtomicBool>,
}

struct StrategySlot {
    strategy: Box<dyn Strategy>,
    disabled: bool,
}

pub struct AnalysisEngine {
    store: Arc<SessionData>,
    risk: RiskConfig,
    strategies: Vec<StrategySlot>,
    links: AnalysisLinks,
}

impl AnalysisEngine {
    pub fn new(
        store: Arc<SessionData>,
        risk: RiskConfig,
        strategies: Vec<Box<dyn Strategy>>,
        links: AnalysisLinks,
    ) -> Self {
        Self {
            store,
            risk,
            strategies: strategies
                .into_iter()
                .map(|strategy| StrategySlot {
                    strategy,
                    disabled: false,
                })
                .collect(),
            links,
        }
    }

    /// Worker loop. Exits once both inbound channels disconnect, or the
    /// stop flag trips. Quality updates buffered at shutdown are still
    /// dispatched.
    pub fn run(&mut self) {
        let mut notices_open = true;
        loop {
            if self.links.stop.load(Ordering::Relaxed) {
                return;
            }
            let quality_open = self.drain_quality_updates();
            if notices_open {
                match self.links.notices_rx.recv_timeout(RECV_POLL) {
                    Ok(notice) => {
                        self.handle_notice(&notice);
                        self.links.tally.record_handled();
                        // Unblocks the processor for the next notice.
                        self.links.ready.signal_ready();
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => notices_open = false,
                }
            } else if quality_open {
                match self.links.quality_rx.recv_timeout(RECV_POLL) {
                    Ok(update) => self.handle_quality_update(&update),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            } else {
                return;
            }
        }
    }

    /// Dispatches every buffered quality update. Returns false once the
    /// channel has disconnected.
    fn drain_quality_updates(&mut self) -> bool {
        loop {
            match self.links.quality_rx.try_recv() {
                Ok(update) => self.handle_quality_update(&update),
                Err(crossbeam::channel::TryRecvError::Empty) => return true,
                Err(crossbeam::channel::TryRecvError::Disconnected) => return false,
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
        let lookup = self.store.with_bars(&notice.symbol, interval, |bars| {
            let bar = match bars.last() {
                Some(last) if last.timestamp == notice.timestamp => Some(Arc::clone(last)),
                _ => bars
                    .iter()
                    .rev()
                    .find(|bar| bar.timestamp == notice.timestamp)
                    .map(Arc::clone),
            };
            bar.map(|bar| (bar, bars.to_vec()))
        });
        let Some((bar, sequence)) = lookup else {
            debug!(symbol = %notice.symbol, "noticed bar not found in store");
            return;
        };

        let decided_at = bar.close_time();
        let signals = self.dispatch(|strategy, store| {
            let mut signals = strategy.on_bar(store, &bar);
            signals.extend(strategy.on_bars(store, &sequence));
            signals
        });
        self.review(signals, decided_at);
    }

    fn handle_quality_update(&mut self, update: &QualityUpdate) {
        let decided_at = chrono::Utc::now();
        let signals = self.dispatch(|strategy, store| strategy.on_quality_update(store, update));
        self.review(signals, decided_at);
    }

    /// Runs one hook across the strategies, isolating panics. A strategy
    /// that panics is disabled for the remainder of the run.
    fn dispatch(
        &mut self,
        hook: impl Fn(&mut dyn Strategy, &SessionData) -> Vec<Signal>,
    ) -> Vec<Signal> {
        let mut signals = Vec::new();
        for slot in self.strategies.iter_mut() {
            if slot.disabled {
                continue;
            }
            let store = &self.store;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                hook(slot.strategy.as_mut(), store)
            }));
            match outcome {
                Ok(produced) => signals.extend(produced),
                Err(_) => {
                    error!(
                        strategy = slot.strategy.name(),
                        "strategy panicked and was disabled"
                    );
                    slot.disabled = true;
                }
            }
        }
        signals
    }

    fn review(&mut self, signals: Vec<Signal>, decided_at: chrono::DateTime<chrono::Utc>) {
        for signal in signals {
            self.links.metrics.incr_signals();
            let decision = risk::evaluate(&self.store, &self.risk, signal, decided_at);
            if decision.approved {
                self.links.metrics.incr_decisions_approved();
            } else {
                self.links.metrics.incr_decisions_rejected();
            }
            let _ = self.links.decisions_tx.send(decision);
        }
    }
}
