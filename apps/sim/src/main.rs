//! Backtest entry point: replays historical sessions through the full
//! pipeline and prints risk decisions as JSON lines.

use std::sync::Arc;

use chrono::Duration;
use tracing::info;

use analysis::strategy::{QualityGateStrategy, SmaCrossStrategy, Strategy};
use session::bar::{Bar, Quote};
use session::calendar::{TradingCalendar, WeekdayCalendar};
use session::config::SessionConfig;
use session::error::EngineError;
use session::source::{CsvHistory, HistoricalSource, MemoryHistory};

fn main() {
    session::init_logging();
    if let Err(error) = run() {
        eprintln!("sim failed: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), EngineError> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "sim.yaml".to_string());
    let config = SessionConfig::from_yaml_file(&config_path)?;

    // CSV files when a data directory is given, a generated tape
    // otherwise.
    let history: Arc<dyn HistoricalSource> = match std::env::var("SESSION_DATA_DIR") {
        Ok(dir) => {
            info!(dir = %dir, "reading bars from csv");
            Arc::new(CsvHistory::new(dir))
        }
        Err(_) => {
            info!("no data directory set, generating a synthetic tape");
            Arc::new(synthetic_history(&config))
        }
    };

    let mut strategies: Vec<Box<dyn Strategy>> = config
        .symbols
        .iter()
        .map(|symbol| {
            Box::new(SmaCrossStrategy::new(
                &symbol.symbol,
                symbol.base_interval(),
                5,
                20,
                100.0,
            )) as Box<dyn Strategy>
        })
        .collect();
    strategies.push(Box::new(QualityGateStrategy::new(config.risk.min_quality)));

    let pipeline = runtime::spawn_pipeline(
        config,
        Arc::new(WeekdayCalendar::us_default()),
        history,
        None,
        strategies,
    )?;
    let decisions = pipeline.decisions_rx.clone();
    let metrics = Arc::clone(&pipeline.metrics);

    let printer = std::thread::spawn(move || {
        for decision in decisions.iter() {
            match serde_json::to_string(&decision) {
                Ok(line) => println!("{line}"),
                Err(error) => eprintln!("decision serialization failed: {error}"),
            }
        }
    });

    pipeline.join()?;
    let _ = printer.join();

    let snapshot = metrics.snapshot();
    info!(
        sessions = snapshot.sessions_completed,
        bars_streamed = snapshot.bars_streamed,
        bars_derived = snapshot.bars_derived,
        signals = snapshot.signals,
        approved = snapshot.decisions_approved,
        rejected = snapshot.decisions_rejected,
        gaps = snapshot.gaps_detected,
        "simulation finished"
    );
    Ok(())
}

/// A deterministic price tape covering the configured date range plus
/// enough trailing days for the lookback window.
fn synthetic_history(config: &SessionConfig) -> MemoryHistory {
    let history = MemoryHistory::new();
    let calendar = WeekdayCalendar::us_default();
    let mut date = config.start_date - Duration::days(14);
    let mut tick = 0u64;

    while date <= config.end_date {
        if calendar.is_trading_date(date) {
            let session = calendar.trading_session(date);
            for symbol in &config.symbols {
                let base = symbol.base_interval();
                let step = Duration::seconds(base.seconds() as i64);
                let mut timestamp = session.open;
                while timestamp + step <= session.close {
                    let phase = tick as f64 * 0.05;
                    let close = 100.0 + 5.0 * phase.sin();
                    let open = 100.0 + 5.0 * (phase - 0.05).sin();
                    history.push_bar(Bar {
                        symbol: symbol.symbol.clone(),
                        interval: base,
                        timestamp,
                        open,
                        high: open.max(close) + 0.1,
                        low: open.min(close) - 0.1,
                        close,
                        volume: 1_000.0 + 200.0 * (phase * 3.0).cos().abs(),
                    });
                    if symbol.quotes {
                        history.push_quote(Quote {
                            symbol: symbol.symbol.clone(),
                            timestamp: timestamp + step / 2,
                            bid: close - 0.05,
                            ask: close + 0.05,
                            bid_size: 500.0,
                            ask_size: 500.0,
                        });
                    }
                    timestamp += step;
                    tick += 1;
                }
            }
        }
        date = match date.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    history
}
