use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};

/// Failure taxonomy for the session pipeline.
///
/// `TimePastClose` is fatal in backtest mode and aborts the session.
/// `Overrun` is warning grade: a consumer missed its deadline in
/// clock-driven pacing. `Stopped` marks a cooperative shutdown observed
/// at a blocking boundary.
#[derive(Debug)]
pub enum EngineError {
    Config(String),
    TimePastClose {
        current: DateTime<Utc>,
        close: DateTime<Utc>,
    },
    Overrun {
        stage: String,
    },
    Source(String),
    Stopped,
    Io(std::io::Error),
    Csv(csv::Error),
    Yaml(serde_yaml::Error),
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "invalid session config: {msg}"),
            Self::TimePastClose { current, close } => write!(
                f,
                "session time {current} advanced past market close {close}"
            ),
            Self::Overrun { stage } => {
                write!(f, "consumer overrun on stage {stage}")
            }
            Self::Source(msg) => write!(f, "data source error: {msg}"),
            Self::Stopped => write!(f, "pipeline stop requested"),
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Csv(e) => write!(f, "csv error: {e}"),
            Self::Yaml(e) => write!(f, "yaml error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<csv::Error> for EngineError {
    fn from(value: csv::Error) -> Self {
        Self::Csv(value)
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Yaml(value)
    }
}
