//! `session` crate entry.
//!
//! Leaf crate of the session-execution workspace: the shared data store,
//! the one-shot synchronization primitive, the notification bus and the
//! interfaces to external collaborators. This file only assembles modules
//! and re-exports; implementations live in the submodules.
//!
//! Module split:
//! - `bar`: `Bar` / `Quote` / `Interval` data structures.
//! - `data`: `SessionData` store and `IndexedSeries`.
//! - `subscription`: one-shot ready/wait primitive and pacing modes.
//! - `notify`: lightweight inter-stage notices.
//! - `config`: session configuration and validation.
//! - `calendar`: trading calendar interface.
//! - `source`: historical and live data source interfaces.
//! - `metrics`: shared pipeline counters.

pub mod bar;
pub mod calendar;
pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod notify;
pub mod source;
pub mod subscription;

pub use bar::{Bar, Interval, Quote, SharedBar, SharedQuote, StreamKind};
pub use calendar::{TradingCalendar, TradingSession, WeekdayCalendar};
pub use config::{
    GapFillConfig, IndicatorConfig, IndicatorKind, RiskConfig, RunMode, SessionConfig,
    SymbolConfig,
};
pub use data::{IndexedSeries, SessionBounds, SessionData};
pub use error::EngineError;
pub use logging::init_logging;
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use notify::{notice_channel, quality_channel, BarNotice, EdgeTally, NoticeKind, QualityUpdate};
pub use source::{
    CsvHistory, HistoricalSource, LiveSource, MemoryHistory, ReplayLiveSource, StreamItem,
};
pub use subscription::{PaceMode, StreamSubscription};
