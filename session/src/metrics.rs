//! Pipeline counters shared by all workers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters, updated with relaxed atomics by every stage.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    bars_streamed: AtomicU64,
    quotes_streamed: AtomicU64,
    bars_derived: AtomicU64,
    overruns: AtomicU64,
    gaps_detected: AtomicU64,
    gaps_filled: AtomicU64,
    gaps_abandoned: AtomicU64,
    signals: AtomicU64,
    decisions_approved: AtomicU64,
    decisions_rejected: AtomicU64,
    sessions_completed: AtomicU64,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub bars_streamed: u64,
    pub quotes_streamed: u64,
    pub bars_derived: u64,
    pub overruns: u64,
    pub gaps_detected: u64,
    pub gaps_filled: u64,
    pub gaps_abandoned: u64,
    pub signals: u64,
    pub decisions_approved: u64,
    pub decisions_rejected: u64,
    pub sessions_completed: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_bars_streamed(&self) {
        self.bars_streamed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_quotes_streamed(&self) {
        self.quotes_streamed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_bars_derived(&self) {
        self.bars_derived.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_overruns(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_gaps_detected(&self) {
        self.gaps_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_gaps_filled(&self) {
        self.gaps_filled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_gaps_abandoned(&self) {
        self.gaps_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_signals(&self) {
        self.signals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_decisions_approved(&self) {
        self.decisions_approved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_decisions_rejected(&self) {
        self.decisions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_sessions_completed(&self) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bars_streamed: self.bars_streamed.load(Ordering::Relaxed),
            quotes_streamed: self.quotes_streamed.load(Ordering::Relaxed),
            bars_derived: self.bars_derived.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            gaps_detected: self.gaps_detected.load(Ordering::Relaxed),
            gaps_filled: self.gaps_filled.load(Ordering::Relaxed),
            gaps_abandoned: self.gaps_abandoned.load(Ordering::Relaxed),
            signals: self.signals.load(Ordering::Relaxed),
            decisions_approved: self.decisions_approved.load(Ordering::Relaxed),
            decisions_rejected: self.decisions_rejected.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
        }
    }
}
