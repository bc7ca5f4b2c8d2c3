//! `coordinator` crate entry.
//!
//! The session coordinator owns the per-trading-day lifecycle: it
//! reloads trailing history, plans which streams are delivered versus
//! generated, merges the input queues chronologically, advances session
//! time under the open/close invariant and feeds the downstream workers
//! through the notification bus.
//!
//! Module split:
//! - `clock`: session time and the two pacing regimes.
//! - `plan`: streamed / generated / ignored decision per stream.
//! - `merge`: pending-slot chronological merge and backtest prefetch.
//! - `history`: trailing-window reload, historical indicators, quality.

pub mod clock;
pub mod history;
pub mod merge;
pub mod plan;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use crossbeam::channel::Sender;
use tracing::{error, info, warn};

use session::calendar::TradingCalendar;
use session::config::{RunMode, SessionConfig};
use session::data::{SessionBounds, SessionData};
use session::error::EngineError;
use session::metrics::PipelineMetrics;
use session::notify::{BarNotice, EdgeTally, NoticeKind};
use session::source::{HistoricalSource, LiveSource, StreamItem};
use session::subscription::{PaceMode, StreamSubscription};

use crate::clock::SessionClock;
use crate::merge::{InputStream, Prefetcher};
use crate::plan::StreamPlan;

const READY_POLL: StdDuration = StdDuration::from_millis(50);
const LIVE_IDLE: StdDuration = StdDuration::from_millis(10);
const DRAIN_POLL: StdDuration = StdDuration::from_millis(2);
const DRAIN_DEADLINE: StdDuration = StdDuration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Streaming,
    EndingSession,
    Terminated,
}

/// Wiring between the coordinator and the rest of the pipeline.
pub struct CoordinatorLinks {
    pub processor_tx: Sender<BarNotice>,
    pub quality_tx: Sender<BarNotice>,
    pub processor_ready: Arc<StreamSubscription>,
    /// Acknowledgement counters for the three notice edges; session
    /// teardown waits on them.
    pub processor_edge: Arc<EdgeTally>,
    pub analysis_edge: Arc<EdgeTally>,
    pub quality_edge: Arc<EdgeTally>,
    pub metrics: Arc<PipelineMetrics>,
    pub stop: Arc<AtomicBool>,
}

pub struct Coordinator {
    config: SessionConfig,
    store: Arc<SessionData>,
    calendar: Arc<dyn TradingCalendar>,
    history: Arc<dyn HistoricalSource>,
    live: Option<Arc<dyn LiveSource>>,
    links: CoordinatorLinks,
    prefetcher: Prefetcher,
    state: SessionState,
    awaiting_processor: bool,
}

struct SessionRuntime {
    bounds: SessionBounds,
    clock: SessionClock,
    streams: Vec<InputStream>,
}

impl Coordinator {
    pub fn new(
        config: SessionConfig,
        store: Arc<SessionData>,
        calendar: Arc<dyn TradingCalendar>,
        history: Arc<dyn HistoricalSource>,
        live: Option<Arc<dyn LiveSource>>,
        links: CoordinatorLinks,
    ) -> Self {
        Self {
            config,
            store,
            calendar,
            history,
            live,
            links,
            prefetcher: Prefetcher::new(),
            state: SessionState::Initializing,
            awaiting_processor: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drives the per-trading-day loop until the configured date range
    /// ends, an external stop arrives, or a fatal invariant violation
    /// aborts the run.
    pub fn run(&mut self) -> Result<(), EngineError> {
        self.config.validate()?;

        let mut date = self.calendar.first_trading_date(self.config.start_date);
        while date <= self.config.end_date {
            if self.links.stop.load(Ordering::Relaxed) {
                break;
            }

            self.state = SessionState::Initializing;
            let mut runtime = self.initialize_session(date)?;

            self.state = SessionState::Streaming;
            match self.stream_session(&mut runtime) {
                Ok(()) => {}
                Err(EngineError::Stopped) => {
                    self.end_session();
                    break;
                }
                Err(fatal) => {
                    error!(error = %fatal, "aborting session on scheduling violation");
                    self.store.deactivate();
                    self.state = SessionState::Terminated;
                    return Err(fatal);
                }
            }

            self.end_session();
            date = self.calendar.next_trading_date(date);
        }

        self.state = SessionState::Terminated;
        info!("coordinator run terminated");
        Ok(())
    }

    /// Session initialization, once per trading day: trailing history,
    /// historical indicators and quality, stream plan, input queues.
    fn initialize_session(&mut self, date: NaiveDate) -> Result<SessionRuntime, EngineError> {
        let session = self.calendar.trading_session(date);
        let bounds = SessionBounds {
            date,
            open: session.open,
            close: session.close,
        };

        history::reload_session_history(
            &self.store,
            &*self.history,
            &*self.calendar,
            &self.config,
            date,
        )?;

        let plan = plan::build_stream_plan(&self.config, self.live.as_deref());
        let streams = self.load_streams(&plan, bounds)?;
        self.store.activate(bounds);

        info!(
            date = %date,
            streams = streams.len(),
            "session initialized"
        );

        Ok(SessionRuntime {
            bounds,
            clock: SessionClock::new(bounds, self.config.acceleration),
            streams,
        })
    }

    fn load_streams(
        &mut self,
        plan: &StreamPlan,
        bounds: SessionBounds,
    ) -> Result<Vec<InputStream>, EngineError> {
        let mut streams = Vec::new();
        match self.config.mode {
            RunMode::Backtest => {
                let prefetch_until = self.prefetch_horizon(bounds);
                for entry in plan.streamed() {
                    let items = self.prefetcher.load_day(
                        &*self.history,
                        &entry.symbol,
                        entry.kind,
                        entry.interval,
                        bounds.open,
                        bounds.close,
                        prefetch_until,
                    )?;
                    streams.push(InputStream::loaded(
                        entry.symbol.clone(),
                        entry.kind,
                        entry.interval,
                        items,
                    ));
                }
            }
            RunMode::Live => {
                let live = self.live.as_ref().ok_or_else(|| {
                    EngineError::Config("live mode configured without a live source".to_string())
                })?;
                for entry in plan.streamed() {
                    let rx = live.subscribe(&entry.symbol, entry.kind, entry.interval)?;
                    streams.push(InputStream::live(
                        entry.symbol.clone(),
                        entry.kind,
                        entry.interval,
                        rx,
                    ));
                }
            }
        }
        Ok(streams)
    }

    /// Close of the last prefetched trading day.
    fn prefetch_horizon(&self, bounds: SessionBounds) -> DateTime<Utc> {
        let mut day = bounds.date;
        for _ in 1..self.config.prefetch_days {
            day = self.calendar.next_trading_date(day);
        }
        self.calendar.trading_session(day).close
    }

    /// Streaming phase: consume the globally oldest pending item each
    /// cycle, advance session time to its effective time, and notify
    /// downstream. Ends when data is exhausted or the next item lies
    /// past market close.
    fn stream_session(&mut self, runtime: &mut SessionRuntime) -> Result<(), EngineError> {
        let mode = runtime.clock.pace_mode();

        loop {
            if self.links.stop.load(Ordering::Relaxed) {
                return Err(EngineError::Stopped);
            }
            for stream in runtime.streams.iter_mut() {
                stream.refill();
            }

            let Some(index) = merge::oldest_pending(&runtime.streams) else {
                if merge::all_finished(&runtime.streams) {
                    runtime.clock.advance_to_close();
                    break;
                }
                // Live stream with nothing pending yet.
                std::thread::sleep(LIVE_IDLE);
                continue;
            };

            let Some(effective) = runtime.streams[index]
                .peek()
                .map(StreamItem::effective_time)
            else {
                continue;
            };
            if effective > runtime.bounds.close {
                runtime.clock.advance_to_close();
                break;
            }

            if mode == PaceMode::ClockDriven {
                runtime.clock.throttle_until(effective, &self.links.stop);
                if self.links.stop.load(Ordering::Relaxed) {
                    return Err(EngineError::Stopped);
                }
            }
            runtime.clock.advance_to(effective)?;

            let Some(item) = runtime.streams[index].take() else {
                continue;
            };
            self.deliver(item, mode)?;
        }

        Ok(())
    }

    fn deliver(&mut self, item: StreamItem, mode: PaceMode) -> Result<(), EngineError> {
        match item {
            StreamItem::Bar(bar) => {
                let notice = BarNotice {
                    symbol: bar.symbol.clone(),
                    interval: Some(bar.interval),
                    timestamp: bar.timestamp,
                    kind: NoticeKind::Bars,
                };
                self.store.append_bar(bar);
                self.links.metrics.incr_bars_streamed();

                // Only the generation edge is paced; quality is
                // fire-and-forget.
                self.pace_processor(mode)?;
                if self.links.processor_tx.send(notice.clone()).is_ok() {
                    self.links.processor_edge.record_sent();
                    self.awaiting_processor = true;
                }
                if self.links.quality_tx.send(notice).is_ok() {
                    self.links.quality_edge.record_sent();
                }
            }
            StreamItem::Quote(quote) => {
                let notice = BarNotice {
                    symbol: quote.symbol.clone(),
                    interval: None,
                    timestamp: quote.timestamp,
                    kind: NoticeKind::Quotes,
                };
                self.store.append_quote(quote);
                self.links.metrics.incr_quotes_streamed();
                if self.links.quality_tx.send(notice).is_ok() {
                    self.links.quality_edge.record_sent();
                }
            }
        }
        Ok(())
    }

    fn pace_processor(&mut self, mode: PaceMode) -> Result<(), EngineError> {
        if !self.awaiting_processor {
            return Ok(());
        }
        match self
            .links
            .processor_ready
            .wait_until_ready(mode, READY_POLL, &self.links.stop)
        {
            Ok(()) => {
                self.awaiting_processor = false;
                Ok(())
            }
            Err(EngineError::Overrun { stage }) => {
                warn!(stage = %stage, "consumer missed its deadline");
                self.links.metrics.incr_overruns();
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    fn end_session(&mut self) {
        self.state = SessionState::EndingSession;
        self.drain_downstream();
        self.store.clear_session_bars();
        self.store.deactivate();
        self.links.metrics.incr_sessions_completed();
        info!("session ended");
    }

    /// Positive handshake before session data clears: every notice sent
    /// this session must be acknowledged as handled, in both pacing
    /// regimes. The processor edge goes first; its acknowledgements
    /// finalize the analysis edge's sent count. A worker that has died
    /// mid-run can no longer acknowledge, so each edge carries a
    /// deadline.
    fn drain_downstream(&self) {
        for edge in [
            &self.links.processor_edge,
            &self.links.analysis_edge,
            &self.links.quality_edge,
        ] {
            let deadline = Instant::now() + DRAIN_DEADLINE;
            while !edge.is_drained() {
                if self.links.stop.load(Ordering::Relaxed) {
                    return;
                }
                if Instant::now() >= deadline {
                    warn!("downstream notices still unhandled at session end");
                    break;
                }
                std::thread::sleep(DRAIN_POLL);
            }
        }
    }
}
