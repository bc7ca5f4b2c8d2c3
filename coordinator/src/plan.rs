//! Per-symbol stream planning.
//!
//! Decided once at session initialization and stored, instead of being
//! re-derived during streaming: every requested (symbol, kind, interval)
//! is marked streamed, generated or ignored for the current mode.

use session::bar::{Interval, StreamKind};
use session::config::{RunMode, SessionConfig};
use session::source::LiveSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRole {
    /// Delivered by the coordinator from source queues.
    Streamed,
    /// Computed downstream by the data processor.
    Generated,
    /// Unavailable in the current mode.
    Ignored,
}

#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub symbol: String,
    pub kind: StreamKind,
    pub interval: Option<Interval>,
    pub role: StreamRole,
}

#[derive(Debug, Clone, Default)]
pub struct StreamPlan {
    entries: Vec<PlanEntry>,
}

impl StreamPlan {
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn streamed(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.role == StreamRole::Streamed)
    }

    pub fn role(
        &self,
        symbol: &str,
        kind: StreamKind,
        interval: Option<Interval>,
    ) -> Option<StreamRole> {
        self.entries
            .iter()
            .find(|entry| {
                entry.symbol == symbol && entry.kind == kind && entry.interval == interval
            })
            .map(|entry| entry.role)
    }

    /// Bar intervals the processor must generate for a symbol, smallest
    /// first.
    pub fn generated_bar_intervals(&self, symbol: &str) -> Vec<Interval> {
        let mut intervals: Vec<Interval> = self
            .entries
            .iter()
            .filter(|entry| {
                entry.symbol == symbol
                    && entry.kind == StreamKind::Bars
                    && entry.role == StreamRole::Generated
            })
            .filter_map(|entry| entry.interval)
            .collect();
        intervals.sort();
        intervals
    }

    /// The streamed base bar interval of a symbol, if any.
    pub fn base_bar_interval(&self, symbol: &str) -> Option<Interval> {
        self.entries
            .iter()
            .filter(|entry| {
                entry.symbol == symbol
                    && entry.kind == StreamKind::Bars
                    && entry.role == StreamRole::Streamed
            })
            .filter_map(|entry| entry.interval)
            .min()
    }
}

pub fn build_stream_plan(config: &SessionConfig, live: Option<&dyn LiveSource>) -> StreamPlan {
    let mut entries = Vec::new();

    for symbol in &config.symbols {
        let base = symbol.base_interval();
        match config.mode {
            RunMode::Backtest => {
                // Only the finest configured interval is streamed; every
                // coarser one is generated from it. Sub-bar ticks are
                // never streamed in backtest.
                for interval in &symbol.intervals {
                    entries.push(PlanEntry {
                        symbol: symbol.symbol.clone(),
                        kind: StreamKind::Bars,
                        interval: Some(*interval),
                        role: if *interval == base {
                            StreamRole::Streamed
                        } else {
                            StreamRole::Generated
                        },
                    });
                }
                if symbol.quotes {
                    entries.push(PlanEntry {
                        symbol: symbol.symbol.clone(),
                        kind: StreamKind::Quotes,
                        interval: None,
                        role: StreamRole::Streamed,
                    });
                }
                entries.push(PlanEntry {
                    symbol: symbol.symbol.clone(),
                    kind: StreamKind::Ticks,
                    interval: None,
                    role: StreamRole::Ignored,
                });
            }
            RunMode::Live => {
                // Stream whatever the source can provide live, generate
                // the rest.
                for interval in &symbol.intervals {
                    let streamable = live
                        .map(|src| src.can_stream(&symbol.symbol, StreamKind::Bars, Some(*interval)))
                        .unwrap_or(false);
                    entries.push(PlanEntry {
                        symbol: symbol.symbol.clone(),
                        kind: StreamKind::Bars,
                        interval: Some(*interval),
                        role: if streamable {
                            StreamRole::Streamed
                        } else {
                            StreamRole::Generated
                        },
                    });
                }
                if symbol.quotes {
                    let streamable = live
                        .map(|src| src.can_stream(&symbol.symbol, StreamKind::Quotes, None))
                        .unwrap_or(false);
                    entries.push(PlanEntry {
                        symbol: symbol.symbol.clone(),
                        kind: StreamKind::Quotes,
                        interval: None,
                        role: if streamable {
                            StreamRole::Streamed
                        } else {
                            StreamRole::Ignored
                        },
                    });
                }
                let ticks_streamable = live
                    .map(|src| src.can_stream(&symbol.symbol, StreamKind::Ticks, None))
                    .unwrap_or(false);
                entries.push(PlanEntry {
                    symbol: symbol.symbol.clone(),
                    kind: StreamKind::Ticks,
                    interval: None,
                    role: if ticks_streamable {
                        StreamRole::Streamed
                    } else {
                        StreamRole::Ignored
                    },
                });
            }
        }
    }

    StreamPlan { entries }
}
