use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Bar granularities supported by the pipeline, ordered finest to coarsest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1s")]
    S1,
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "1d")]
    D1,
}

impl Interval {
    pub fn seconds(self) -> i64 {
        match self {
            Self::S1 => 1,
            Self::M1 => 60,
            Self::M5 => 300,
            Self::M15 => 900,
            Self::M30 => 1800,
            Self::H1 => 3600,
            Self::D1 => 86_400,
        }
    }

    pub fn duration(self) -> Duration {
        Duration::seconds(self.seconds())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::S1 => "1s",
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::D1 => "1d",
        }
    }

    pub fn parse(value: &str) -> Result<Self, EngineError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "1s" => Ok(Self::S1),
            "1m" => Ok(Self::M1),
            "5m" => Ok(Self::M5),
            "15m" => Ok(Self::M15),
            "30m" => Ok(Self::M30),
            "1h" => Ok(Self::H1),
            "1d" => Ok(Self::D1),
            _ => Err(EngineError::Config(format!("invalid interval: {value}"))),
        }
    }
}

/// A single OHLCV bar. Immutable once created; stored and passed around
/// as `SharedBar`, never copied between pipeline stages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bar {
    pub symbol: String,
    pub interval: Interval,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// The instant this bar becomes knowable: its window close.
    pub fn close_time(&self) -> DateTime<Utc> {
        self.timestamp + self.interval.duration()
    }
}

pub type SharedBar = Arc<Bar>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub bid: f64,
    pub ask: f64,
    pub bid_size: f64,
    pub ask_size: f64,
}

pub type SharedQuote = Arc<Quote>;

/// Kinds of market data a symbol can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Bars,
    Quotes,
    Ticks,
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{Bar, Interval};

    #[test]
    fn interval_parse_round_trips() {
        for interval in [
            Interval::S1,
            Interval::M1,
            Interval::M5,
            Interval::M15,
            Interval::M30,
            Interval::H1,
            Interval::D1,
        ] {
            assert_eq!(
                Interval::parse(interval.as_str()).expect("known interval"),
                interval
            );
        }
        assert!(Interval::parse("7m").is_err());
    }

    #[test]
    fn intervals_order_by_length() {
        assert!(Interval::M1 < Interval::M5);
        assert!(Interval::H1 < Interval::D1);
    }

    #[test]
    fn bar_close_time_adds_interval() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
        let bar = Bar {
            symbol: "AAPL".to_string(),
            interval: Interval::M1,
            timestamp: ts,
            open: 100.0,
            high: 101.0,
            low: 99.5,
            close: 100.4,
            volume: 1000.0,
        };
        assert_eq!(bar.close_time(), ts + chrono::Duration::seconds(60));
    }
}
