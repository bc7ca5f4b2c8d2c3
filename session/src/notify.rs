//! Inter-stage notification bus.
//!
//! Queues carry only lightweight `(symbol, interval, timestamp, kind)`
//! notices; consumers dereference `SessionData` for the payload. Loss
//! prevention comes from the one-shot subscriptions, so the channels
//! themselves are unbounded.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, Sender};

use crate::bar::Interval;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Bars,
    Quotes,
}

/// What a producer tells a downstream worker: where new data landed.
/// Quote notices carry no interval.
#[derive(Debug, Clone)]
pub struct BarNotice {
    pub symbol: String,
    pub interval: Option<Interval>,
    pub timestamp: DateTime<Utc>,
    pub kind: NoticeKind,
}

pub fn notice_channel() -> (Sender<BarNotice>, Receiver<BarNotice>) {
    channel::unbounded()
}

/// A recomputed quality score, pushed to the analysis engine without
/// pacing.
#[derive(Debug, Clone)]
pub struct QualityUpdate {
    pub symbol: String,
    pub interval: Interval,
    pub score: f64,
}

pub fn quality_channel() -> (Sender<QualityUpdate>, Receiver<QualityUpdate>) {
    channel::unbounded()
}

/// Sent/handled counters for one notification edge.
///
/// The consumer acknowledges each notice after fully handling it, so
/// the producer can tell when everything it sent has landed. Session
/// teardown gates on this in both pacing regimes; the counters are
/// cumulative across sessions.
#[derive(Debug, Default)]
pub struct EdgeTally {
    sent: AtomicU64,
    handled: AtomicU64,
}

impl EdgeTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_handled(&self) {
        self.handled.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_drained(&self) -> bool {
        self.handled.load(Ordering::SeqCst) >= self.sent.load(Ordering::SeqCst)
    }
}
