//! `runtime` crate entry.
//!
//! Assembles the four pipeline workers on dedicated threads, wires the
//! channels and readiness subscriptions between them, and hands the
//! caller a `Pipeline` handle carrying the decision stream, the shared
//! store and the counters. Shutdown is cooperative: the stop flag
//! interrupts blocking waits, and channel disconnects cascade from the
//! coordinator outward.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver};
use tracing::info;

use analysis::signal::Decision;
use analysis::strategy::Strategy;
use analysis::{AnalysisEngine, AnalysisLinks};
use coordinator::{Coordinator, CoordinatorLinks};
use processor::{Processor, ProcessorLinks};
use quality::{QualityLinks, QualityManager};
use session::calendar::TradingCalendar;
use session::config::SessionConfig;
use session::data::SessionData;
use session::error::EngineError;
use session::metrics::PipelineMetrics;
use session::notify::{notice_channel, quality_channel, EdgeTally};
use session::source::{HistoricalSource, LiveSource};
use session::subscription::{PaceMode, StreamSubscription};

/// A running pipeline and the handles to observe and stop it.
pub struct Pipeline {
    pub store: Arc<SessionData>,
    pub metrics: Arc<PipelineMetrics>,
    pub decisions_rx: Receiver<Decision>,
    stop: Arc<AtomicBool>,
    coordinator: Option<JoinHandle<Result<(), EngineError>>>,
    workers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Requests a cooperative stop. Workers observe the flag at their
    /// next blocking boundary.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Waits for the whole pipeline to wind down. The coordinator is
    /// joined first; its exit drops the notice producers and the other
    /// workers drain out behind it.
    pub fn join(mut self) -> Result<(), EngineError> {
        let result = match self.coordinator.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(EngineError::Source("coordinator panicked".to_string()))),
            None => Ok(()),
        };
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        info!("pipeline joined");
        result
    }
}

/// Spawns the coordinator, processor, quality manager and analysis
/// engine, fully wired. The quality worker is skipped when scoring is
/// disabled in the config.
pub fn spawn_pipeline(
    config: SessionConfig,
    calendar: Arc<dyn TradingCalendar>,
    history: Arc<dyn HistoricalSource>,
    live: Option<Arc<dyn LiveSource>>,
    strategies: Vec<Box<dyn Strategy>>,
) -> Result<Pipeline, EngineError> {
    config.validate()?;

    let store = Arc::new(SessionData::new());
    let metrics = Arc::new(PipelineMetrics::new());
    let stop = Arc::new(AtomicBool::new(false));
    let mode = if config.acceleration == 0.0 {
        PaceMode::DataDriven
    } else {
        PaceMode::ClockDriven
    };

    let (processor_tx, processor_rx) = notice_channel();
    let (quality_tx, quality_rx) = notice_channel();
    let (analysis_tx, analysis_rx) = notice_channel();
    let (updates_tx, updates_rx) = quality_channel();
    let (decisions_tx, decisions_rx) = channel::unbounded();
    let processor_ready = Arc::new(StreamSubscription::new("processor"));
    let analysis_ready = Arc::new(StreamSubscription::new("analysis"));
    let processor_edge = Arc::new(EdgeTally::new());
    let analysis_edge = Arc::new(EdgeTally::new());
    let quality_edge = Arc::new(EdgeTally::new());

    let mut workers = Vec::new();

    let mut engine = AnalysisEngine::new(
        Arc::clone(&store),
        config.risk,
        strategies,
        AnalysisLinks {
            notices_rx: analysis_rx,
            quality_rx: updates_rx,
            decisions_tx,
            ready: Arc::clone(&analysis_ready),
            tally: Arc::clone(&analysis_edge),
            metrics: Arc::clone(&metrics),
            stop: Arc::clone(&stop),
        },
    );
    workers.push(
        thread::Builder::new()
            .name("analysis".to_string())
            .spawn(move || engine.run())?,
    );

    let mut processor = Processor::new(
        &config,
        Arc::clone(&store),
        mode,
        ProcessorLinks {
            notices_rx: processor_rx,
            analysis_tx,
            ready: Arc::clone(&processor_ready),
            analysis_ready,
            tally: Arc::clone(&processor_edge),
            analysis_edge: Arc::clone(&analysis_edge),
            metrics: Arc::clone(&metrics),
            stop: Arc::clone(&stop),
        },
    );
    workers.push(
        thread::Builder::new()
            .name("processor".to_string())
            .spawn(move || processor.run())?,
    );

    if config.quality_enabled {
        let mut manager = QualityManager::new(
            &config,
            Arc::clone(&store),
            Arc::clone(&history),
            QualityLinks {
                notices_rx: quality_rx,
                updates_tx,
                tally: Arc::clone(&quality_edge),
                metrics: Arc::clone(&metrics),
                stop: Arc::clone(&stop),
            },
        );
        workers.push(
            thread::Builder::new()
                .name("quality".to_string())
                .spawn(move || manager.run())?,
        );
    } else {
        // Close the edge so sends fail immediately and nothing is left
        // awaiting acknowledgement at session end.
        drop(quality_rx);
        drop(updates_tx);
    }

    let mut coordinator = Coordinator::new(
        config,
        Arc::clone(&store),
        calendar,
        history,
        live,
        CoordinatorLinks {
            processor_tx,
            quality_tx,
            processor_ready,
            processor_edge,
            analysis_edge,
            quality_edge,
            metrics: Arc::clone(&metrics),
            stop: Arc::clone(&stop),
        },
    );
    let coordinator_handle = thread::Builder::new()
        .name("coordinator".to_string())
        .spawn(move || coordinator.run())?;

    info!(workers = workers.len() + 1, "pipeline spawned");
    Ok(Pipeline {
        store,
        metrics,
        decisions_rx,
        stop,
        coordinator: Some(coordinator_handle),
        workers,
    })
}
