//! Trade intents and risk-checked decisions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use session::bar::Interval;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

/// A trade intent produced by a strategy, before risk review.
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub symbol: String,
    pub interval: Interval,
    pub action: Action,
    pub quantity: f64,
    /// Reference price at signal time, usually the triggering close.
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    /// Strategy conviction in `[0, 1]`.
    pub confidence: f64,
    pub strategy: String,
    pub reason: String,
    /// Free-form strategy annotations carried through to the decision
    /// output.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// The outcome of risk review for one signal.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub signal: Signal,
    pub approved: bool,
    /// Rejection reason; absent on approval.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Quality score the risk review saw for the signal's sequence.
    pub quality_score: f64,
    /// Session time at which the decision was made.
    pub decided_at: DateTime<Utc>,
}
