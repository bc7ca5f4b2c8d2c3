//! Strategy interface and the built-in strategies.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;

use session::bar::{Interval, SharedBar};
use session::data::SessionData;
use session::notify::QualityUpdate;

use crate::signal::{Action, Signal};

/// A decision-making unit driven by store events.
///
/// Hooks default to no-ops so a strategy implements only the events it
/// cares about. Hooks receive the shared store for window lookups and
/// indicator access; signals returned are risk-reviewed by the engine.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    /// A new bar was appended for `bar.symbol` at `bar.interval`.
    fn on_bar(&mut self, _store: &SessionData, _bar: &SharedBar) -> Vec<Signal> {
        Vec::new()
    }

    /// The full sequence the new bar belongs to, after the append.
    fn on_bars(&mut self, _store: &SessionData, _bars: &[SharedBar]) -> Vec<Signal> {
        Vec::new()
    }

    /// A quality score changed.
    fn on_quality_update(&mut self, _store: &SessionData, _update: &QualityUpdate) -> Vec<Signal> {
        Vec::new()
    }
}

/// Classic two-window moving average crossover on one sequence.
pub struct SmaCrossStrategy {
    symbol: String,
    interval: Interval,
    fast: usize,
    slow: usize,
    quantity: f64,
    /// Sign of fast minus slow on the previous bar.
    last_side: Option<bool>,
}

impl SmaCrossStrategy {
    pub fn new(symbol: impl Into<String>, interval: Interval, fast: usize, slow: usize, quantity: f64) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            fast: fast.max(1),
            slow: slow.max(2),
            quantity,
            last_side: None,
        }
    }

    fn sma(bars: &[SharedBar], period: usize) -> Option<f64> {
        if bars.len() < period {
            return None;
        }
        let window = &bars[bars.len() - period..];
        Some(window.iter().map(|bar| bar.close).sum::<f64>() / period as f64)
    }
}

impl Strategy for SmaCrossStrategy {
    fn name(&self) -> &str {
        "sma-cross"
    }

    fn on_bars(&mut self, _store: &SessionData, bars: &[SharedBar]) -> Vec<Signal> {
        let Some(last) = bars.last() else {
            return Vec::new();
        };
        if last.symbol != self.symbol || last.interval != self.interval {
            return Vec::new();
        }
        let (Some(fast), Some(slow)) = (Self::sma(bars, self.fast), Self::sma(bars, self.slow))
        else {
            return Vec::new();
        };

        let side = fast > slow;
        let crossed = self.last_side.is_some_and(|previous| previous != side);
        self.last_side = Some(side);
        if !crossed {
            return Vec::new();
        }

        let (action, reason) = if side {
            (Action::Buy, "fast average crossed above slow")
        } else {
            (Action::Sell, "fast average crossed below slow")
        };
        // Wider spread between the averages reads as stronger conviction.
        let confidence = ((fast - slow).abs() / slow.abs().max(f64::MIN_POSITIVE)).min(0.05) / 0.05;
        let mut metadata = BTreeMap::new();
        metadata.insert("fast_sma".to_string(), format!("{fast:.4}"));
        metadata.insert("slow_sma".to_string(), format!("{slow:.4}"));
        vec![Signal {
            symbol: self.symbol.clone(),
            interval: self.interval,
            action,
            quantity: self.quantity,
            price: last.close,
            timestamp: last.close_time(),
            confidence,
            strategy: self.name().to_string(),
            reason: reason.to_string(),
            metadata,
        }]
    }
}

/// Emits a Hold when a sequence's quality falls through a floor, once
/// per degradation episode.
pub struct QualityGateStrategy {
    floor: f64,
    degraded: HashMap<(String, Interval), bool>,
}

impl QualityGateStrategy {
    pub fn new(floor: f64) -> Self {
        Self {
            floor,
            degraded: HashMap::new(),
        }
    }
}

impl Strategy for QualityGateStrategy {
    fn name(&self) -> &str {
        "quality-gate"
    }

    fn on_quality_update(&mut self, store: &SessionData, update: &QualityUpdate) -> Vec<Signal> {
        let key = (update.symbol.clone(), update.interval);
        let was_degraded = self.degraded.get(&key).copied().unwrap_or(false);
        let is_degraded = update.score < self.floor;
        self.degraded.insert(key, is_degraded);

        if is_degraded && !was_degraded {
            let price = store
                .last_bar(&update.symbol, update.interval)
                .map(|bar| bar.close)
                .unwrap_or(0.0);
            return vec![Signal {
                symbol: update.symbol.clone(),
                interval: update.interval,
                action: Action::Hold,
                quantity: 0.0,
                price,
                timestamp: Utc::now(),
                confidence: 1.0,
                strategy: self.name().to_string(),
                reason: format!("quality fell to {:.1}", update.score),
                metadata: BTreeMap::new(),
            }];
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use session::bar::Bar;

    fn bars(closes: &[f64]) -> Vec<SharedBar> {
        closes
            .iter()
            .enumerate()
            .map(|(index, close)| {
                Arc::new(Bar {
                    symbol: "AAA".to_string(),
                    interval: Interval::M1,
                    timestamp: Utc
                        .with_ymd_and_hms(2024, 1, 8, 9, 30 + index as u32, 0)
                        .single()
                        .expect("valid timestamp"),
                    open: *close,
                    high: *close,
                    low: *close,
                    close: *close,
                    volume: 100.0,
                })
            })
            .collect()
    }

    #[test]
    fn crossover_emits_a_buy_then_a_sell() {
        let store = SessionData::new();
        let mut strategy = SmaCrossStrategy::new("AAA", Interval::M1, 2, 4, 100.0);

        // Downtrend establishes fast below slow, then a reversal crosses up.
        let closes = [20.0, 18.0, 16.0, 14.0, 13.0, 19.0, 25.0, 12.0, 5.0];
        let mut actions = Vec::new();
        for end in 1..=closes.len() {
            let window = bars(&closes[..end]);
            for signal in strategy.on_bars(&store, &window) {
                actions.push(signal.action);
            }
        }
        assert_eq!(actions, vec![Action::Buy, Action::Sell]);
    }

    #[test]
    fn foreign_sequences_are_ignored() {
        let store = SessionData::new();
        let mut strategy = SmaCrossStrategy::new("BBB", Interval::M1, 2, 4, 100.0);
        assert!(strategy
            .on_bars(&store, &bars(&[10.0, 11.0, 12.0, 13.0, 14.0]))
            .is_empty());
    }

    #[test]
    fn quality_gate_holds_once_per_episode() {
        let store = SessionData::new();
        let mut strategy = QualityGateStrategy::new(60.0);
        let update = |score| QualityUpdate {
            symbol: "AAA".to_string(),
            interval: Interval::M1,
            score,
        };

        assert!(strategy.on_quality_update(&store, &update(90.0)).is_empty());
        let signals = strategy.on_quality_update(&store, &update(50.0));
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].action, Action::Hold);
        assert_eq!(signals[0].quantity, 0.0);
        // Still degraded: no repeat signal.
        assert!(strategy.on_quality_update(&store, &update(45.0)).is_empty());
        // Recovery then a fresh degradation fires again.
        assert!(strategy.on_quality_update(&store, &update(80.0)).is_empty());
        assert_eq!(strategy.on_quality_update(&store, &update(30.0)).len(), 1);
    }
}
