//! Session configuration.
//!
//! Consumed once at session initialization; there is no hot reload.
//! Validation failures are `EngineError::Config` and prevent the first
//! session from starting instead of failing mid-stream.

use std::collections::HashSet;
use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::bar::Interval;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Backtest,
    Live,
}

/// Per-symbol requested streams.
#[derive(Debug, Clone, Deserialize)]
pub struct SymbolConfig {
    pub symbol: String,
    /// Requested bar intervals; the finest one becomes the base interval,
    /// the rest are generated from it.
    pub intervals: Vec<Interval>,
    #[serde(default)]
    pub quotes: bool,
}

impl SymbolConfig {
    /// The smallest requested interval. Validation guarantees the list is
    /// non-empty.
    pub fn base_interval(&self) -> Interval {
        self.intervals
            .iter()
            .copied()
            .min()
            .unwrap_or(Interval::M1)
    }

    /// Requested intervals coarser than the base, smallest first.
    pub fn derived_intervals(&self) -> Vec<Interval> {
        let base = self.base_interval();
        let mut derived: Vec<Interval> = self
            .intervals
            .iter()
            .copied()
            .filter(|interval| *interval != base)
            .collect();
        derived.sort();
        derived
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    SmaClose,
    AvgVolume,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndicatorConfig {
    pub name: String,
    pub kind: IndicatorKind,
    pub period: usize,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct GapFillConfig {
    /// Attempts before a gap is abandoned as permanently degraded.
    pub max_retries: u32,
    /// Seconds between fill sweeps in live mode.
    pub cadence_secs: u64,
}

impl Default for GapFillConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            cadence_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RiskConfig {
    /// Signals on data below this quality percentage are rejected.
    pub min_quality: f64,
    /// Largest acceptable signal quantity.
    pub max_position: f64,
    /// Signals below this confidence are rejected.
    pub min_confidence: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            min_quality: 60.0,
            max_position: 10_000.0,
            min_confidence: 0.3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub mode: RunMode,
    pub symbols: Vec<SymbolConfig>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Trailing-window history reloaded at each session initialization,
    /// in trading days.
    pub lookback_days: u32,
    /// Days of streamed data prefetched ahead of time in backtest mode.
    #[serde(default = "default_prefetch_days")]
    pub prefetch_days: u32,
    /// 0.0 selects data-driven pacing; anything above is a wall-clock
    /// scale factor (live runs at 1.0).
    pub acceleration: f64,
    #[serde(default = "default_quality_enabled")]
    pub quality_enabled: bool,
    #[serde(default)]
    pub gap_fill: GapFillConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub historical_indicators: Vec<IndicatorConfig>,
    #[serde(default)]
    pub realtime_indicators: Vec<IndicatorConfig>,
}

fn default_prefetch_days() -> u32 {
    1
}

fn default_quality_enabled() -> bool {
    true
}

impl SessionConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn symbol(&self, symbol: &str) -> Option<&SymbolConfig> {
        self.symbols.iter().find(|s| s.symbol == symbol)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.symbols.is_empty() {
            return Err(EngineError::Config("no symbols configured".to_string()));
        }

        let mut seen = HashSet::new();
        for symbol in &self.symbols {
            if symbol.symbol.trim().is_empty() {
                return Err(EngineError::Config("empty symbol name".to_string()));
            }
            if !seen.insert(symbol.symbol.clone()) {
                return Err(EngineError::Config(format!(
                    "conflicting stream requests for symbol {}",
                    symbol.symbol
                )));
            }
            if symbol.intervals.is_empty() {
                return Err(EngineError::Config(format!(
                    "symbol {} requests no intervals",
                    symbol.symbol
                )));
            }
            let mut intervals = HashSet::new();
            for interval in &symbol.intervals {
                if !intervals.insert(*interval) {
                    return Err(EngineError::Config(format!(
                        "symbol {} requests interval {} twice",
                        symbol.symbol,
                        interval.as_str()
                    )));
                }
            }
            let base = symbol.base_interval();
            for interval in &symbol.intervals {
                if interval.seconds() % base.seconds() != 0 {
                    return Err(EngineError::Config(format!(
                        "symbol {}: interval {} is not a multiple of base {}",
                        symbol.symbol,
                        interval.as_str(),
                        base.as_str()
                    )));
                }
            }
        }

        if self.start_date > self.end_date {
            return Err(EngineError::Config(format!(
                "start date {} is after end date {}",
                self.start_date, self.end_date
            )));
        }
        if self.lookback_days == 0 {
            return Err(EngineError::Config(
                "lookback_days must be at least 1".to_string(),
            ));
        }
        if self.prefetch_days == 0 {
            return Err(EngineError::Config(
                "prefetch_days must be at least 1".to_string(),
            ));
        }
        if !self.acceleration.is_finite() || self.acceleration < 0.0 {
            return Err(EngineError::Config(format!(
                "acceleration must be finite and non-negative, got {}",
                self.acceleration
            )));
        }
        if self.mode == RunMode::Live && self.acceleration == 0.0 {
            return Err(EngineError::Config(
                "live mode requires clock-driven pacing (acceleration > 0)".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.risk.min_quality) {
            return Err(EngineError::Config(format!(
                "risk.min_quality out of range: {}",
                self.risk.min_quality
            )));
        }
        if !(0.0..=1.0).contains(&self.risk.min_confidence) {
            return Err(EngineError::Config(format!(
                "risk.min_confidence out of range: {}",
                self.risk.min_confidence
            )));
        }
        if self.risk.max_position <= 0.0 {
            return Err(EngineError::Config(
                "risk.max_position must be positive".to_string(),
            ));
        }
        if self.gap_fill.max_retries == 0 {
            return Err(EngineError::Config(
                "gap_fill.max_retries must be at least 1".to_string(),
            ));
        }
        if self.gap_fill.cadence_secs == 0 {
            return Err(EngineError::Config(
                "gap_fill.cadence_secs must be positive".to_string(),
            ));
        }
        for indicator in self
            .historical_indicators
            .iter()
            .chain(self.realtime_indicators.iter())
        {
            if indicator.period == 0 {
                return Err(EngineError::Config(format!(
                    "indicator {} has zero period",
                    indicator.name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{RunMode, SessionConfig, SymbolConfig};
    use crate::bar::Interval;

    fn config() -> SessionConfig {
        SessionConfig {
            mode: RunMode::Backtest,
            symbols: vec![SymbolConfig {
                symbol: "AAPL".to_string(),
                intervals: vec![Interval::M1, Interval::M5],
                quotes: false,
            }],
            start_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            lookback_days: 5,
            prefetch_days: 1,
            acceleration: 0.0,
            quality_enabled: true,
            gap_fill: Default::default(),
            risk: Default::default(),
            historical_indicators: Vec::new(),
            realtime_indicators: Vec::new(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn duplicate_symbol_is_a_conflict() {
        let mut cfg = config();
        cfg.symbols.push(cfg.symbols[0].clone());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_lookback_is_rejected() {
        let mut cfg = config();
        cfg.lookback_days = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_interval_list_is_rejected() {
        let mut cfg = config();
        cfg.symbols[0].intervals.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn live_mode_requires_clock_pacing() {
        let mut cfg = config();
        cfg.mode = RunMode::Live;
        cfg.acceleration = 0.0;
        assert!(cfg.validate().is_err());
        cfg.acceleration = 1.0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn base_and_derived_intervals_split_on_finest() {
        let cfg = config();
        assert_eq!(cfg.symbols[0].base_interval(), Interval::M1);
        assert_eq!(cfg.symbols[0].derived_intervals(), vec![Interval::M5]);
    }

    #[test]
    fn yaml_deserializes_with_defaults() {
        let raw = r#"
mode: backtest
symbols:
  - symbol: AAPL
    intervals: ["1m", "5m"]
start_date: 2024-01-02
end_date: 2024-01-03
lookback_days: 3
acceleration: 0.0
"#;
        let cfg: SessionConfig = serde_yaml::from_str(raw).expect("yaml parses");
        assert!(cfg.validate().is_ok());
        assert!(cfg.quality_enabled);
        assert_eq!(cfg.prefetch_days, 1);
        assert_eq!(cfg.gap_fill.max_retries, 3);
    }
}
