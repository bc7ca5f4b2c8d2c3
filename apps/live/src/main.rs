//! Live entry point: runs the pipeline at wall-clock pace against a
//! replayed feed and prints risk decisions as JSON lines.

use std::sync::Arc;

use tracing::info;

use analysis::strategy::{QualityGateStrategy, SmaCrossStrategy, Strategy};
use session::calendar::{TradingCalendar, WeekdayCalendar};
use session::config::{RunMode, SessionConfig};
use session::error::EngineError;
use session::source::{CsvHistory, HistoricalSource, MemoryHistory, ReplayLiveSource};

fn main() {
    session::init_logging();
    if let Err(error) = run() {
        eprintln!("live failed: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), EngineError> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "live.yaml".to_string());
    let mut config = SessionConfig::from_yaml_file(&config_path)?;
    config.mode = RunMode::Live;
    // Live sessions always run at wall-clock pace.
    config.acceleration = 1.0;

    let history: Arc<dyn HistoricalSource> = match std::env::var("SESSION_DATA_DIR") {
        Ok(dir) => Arc::new(CsvHistory::new(dir)),
        Err(_) => Arc::new(MemoryHistory::new()),
    };

    let calendar = Arc::new(WeekdayCalendar::us_default());
    let live = Arc::new(stage_replay(&config, &*calendar, &*history)?);

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

    let pipeline = runtime::spawn_pipeline(config, calendar, history, Some(live), strategies)?;
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
        quotes_streamed = snapshot.quotes_streamed,
        gaps_filled = snapshot.gaps_filled,
        "live run finished"
    );
    Ok(())
}

/// Feeds the first session's slice of the historical tape into a replay
/// source, standing in for a broker connection.
fn stage_replay(
    config: &SessionConfig,
    calendar: &dyn TradingCalendar,
    history: &dyn HistoricalSource,
) -> Result<ReplayLiveSource, EngineError> {
    let session = calendar.trading_session(calendar.first_trading_date(config.start_date));
    let live = ReplayLiveSource::new();
    for symbol in &config.symbols {
        let bars = history.get_bars(
            &symbol.symbol,
            symbol.base_interval(),
            session.open,
            session.close,
        )?;
        for bar in bars {
            live.stage_bar(bar);
        }
        if symbol.quotes {
            for quote in history.get_quotes(&symbol.symbol, session.open, session.close)? {
                live.stage_quote(quote);
            }
        }
    }
    Ok(live)
}
