use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration as StdDuration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use coordinator::{Coordinator, CoordinatorLinks, SessionState};
use session::bar::{Bar, Interval, Quote};
use session::calendar::WeekdayCalendar;
use session::config::{RunMode, SessionConfig, SymbolConfig};
use session::data::SessionData;
use session::metrics::PipelineMetrics;
use session::notify::{notice_channel, BarNotice, EdgeTally};
use session::source::MemoryHistory;
use session::subscription::StreamSubscription;

fn ts(date: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.from_utc_datetime(
        &date
            .and_hms_opt(hour, minute, 0)
            .expect("valid time of day"),
    )
}

fn bar(symbol: &str, interval: Interval, timestamp: DateTime<Utc>, close: f64) -> Bar {
    Bar {
        symbol: symbol.to_string(),
        interval,
        timestamp,
        open: close,
        high: close,
        low: close,
        close,
        volume: 100.0,
    }
}

fn backtest_config(symbols: Vec<SymbolConfig>, start: NaiveDate, end: NaiveDate) -> SessionConfig {
    SessionConfig {
        mode: RunMode::Backtest,
        symbols,
        start_date: start,
        end_date: end,
        lookback_days: 1,
        prefetch_days: 1,
        acceleration: 0.0,
        quality_enabled: true,
        gap_fill: Default::default(),
        risk: Default::default(),
        historical_indicators: Vec::new(),
        realtime_indicators: Vec::new(),
    }
}

/// Consumes generation notices like the processor would, recording the
/// order items arrived in, acknowledging each one and signalling
/// readiness.
struct FakeProcessor {
    handle: thread::JoinHandle<()>,
    seen: Arc<Mutex<Vec<DateTime<Utc>>>>,
}

fn spawn_fake_processor(
    rx: crossbeam::channel::Receiver<BarNotice>,
    ready: Arc<StreamSubscription>,
    tally: Arc<EdgeTally>,
) -> FakeProcessor {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&seen);
    let handle = thread::spawn(move || {
        while let Ok(notice) = rx.recv() {
            recorded
                .lock()
                .expect("fake processor lock poisoned")
                .push(notice.timestamp);
            tally.record_handled();
            ready.signal_ready();
        }
    });
    FakeProcessor { handle, seen }
}

/// Consumes the fire-and-forget quality notices, acknowledging each.
struct FakeQuality {
    handle: thread::JoinHandle<()>,
    seen: Arc<Mutex<Vec<BarNotice>>>,
}

fn spawn_fake_quality(
    rx: crossbeam::channel::Receiver<BarNotice>,
    tally: Arc<EdgeTally>,
) -> FakeQuality {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&seen);
    let handle = thread::spawn(move || {
        while let Ok(notice) = rx.recv() {
            recorded
                .lock()
                .expect("fake quality lock poisoned")
                .push(notice);
            tally.record_handled();
        }
    });
    FakeQuality { handle, seen }
}

#[test]
fn backtest_run_streams_every_session_and_ends_clean() {
    let monday = NaiveDate::from_ymd_opt(2024, 1, 8).expect("valid date");
    let tuesday = NaiveDate::from_ymd_opt(2024, 1, 9).expect("valid date");
    let friday = NaiveDate::from_ymd_opt(2024, 1, 5).expect("valid date");

    let history = MemoryHistory::new();
    // Trailing-window history for the first session.
    history.push_bar(bar("AAA", Interval::M1, ts(friday, 9, 30), 10.0));
    history.push_bar(bar("AAA", Interval::M1, ts(friday, 9, 31), 10.5));
    // Session data.
    for (minute, close) in [(30, 11.0), (31, 11.5), (32, 12.0)] {
        history.push_bar(bar("AAA", Interval::M1, ts(monday, 9, minute), close));
    }
    for (minute, close) in [(30, 12.5), (31, 13.0)] {
        history.push_bar(bar("AAA", Interval::M1, ts(tuesday, 9, minute), close));
    }

    let config = backtest_config(
        vec![SymbolConfig {
            symbol: "AAA".to_string(),
            intervals: vec![Interval::M1, Interval::M5],
            quotes: false,
        }],
        monday,
        tuesday,
    );

    let store = Arc::new(SessionData::new());
    let metrics = Arc::new(PipelineMetrics::new());
    let stop = Arc::new(AtomicBool::new(false));
    let ready = Arc::new(StreamSubscription::new("processor"));
    let processor_edge = Arc::new(EdgeTally::new());
    let quality_edge = Arc::new(EdgeTally::new());
    let (processor_tx, processor_rx) = notice_channel();
    let (quality_tx, quality_rx) = notice_channel();

    let fake = spawn_fake_processor(processor_rx, Arc::clone(&ready), Arc::clone(&processor_edge));
    let quality = spawn_fake_quality(quality_rx, Arc::clone(&quality_edge));

    let mut coordinator = Coordinator::new(
        config,
        Arc::clone(&store),
        Arc::new(WeekdayCalendar::us_default()),
        Arc::new(history),
        None,
        CoordinatorLinks {
            processor_tx,
            quality_tx,
            processor_ready: ready,
            processor_edge,
            analysis_edge: Arc::new(EdgeTally::new()),
            quality_edge,
            metrics: Arc::clone(&metrics),
            stop,
        },
    );

    coordinator.run().expect("backtest run succeeds");
    assert_eq!(coordinator.state(), SessionState::Terminated);
    drop(coordinator);
    fake.handle.join().expect("fake processor joins");
    quality.handle.join().expect("fake quality joins");

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.sessions_completed, 2);
    assert_eq!(snapshot.bars_streamed, 5);
    assert_eq!(snapshot.overruns, 0);

    // Every streamed bar produced exactly one generation notice, in
    // chronological order.
    let seen = fake.seen.lock().expect("fake processor lock poisoned");
    assert_eq!(seen.len(), 5);
    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));

    // The quality edge saw the same bars, fire-and-forget.
    assert_eq!(quality.seen.lock().expect("fake quality lock poisoned").len(), 5);

    // Session bars were cleared at end of day; only the trailing-window
    // history of the final session remains.
    assert!(!store.is_active());
    assert_eq!(store.get_bar_count("AAA", Interval::M1), 3);
    let last = store.last_bar("AAA", Interval::M1).expect("history bar");
    assert!(last.timestamp < ts(tuesday, 9, 30));
}

#[test]
fn quotes_are_merged_by_effective_time() {
    let monday = NaiveDate::from_ymd_opt(2024, 1, 8).expect("valid date");

    let history = MemoryHistory::new();
    history.push_bar(bar("AAA", Interval::M1, ts(monday, 9, 30), 11.0));
    // Knowable at 09:30:30, before the 09:30 bar closes at 09:31.
    history.push_quote(Quote {
        symbol: "AAA".to_string(),
        timestamp: Utc.from_utc_datetime(
            &monday
                .and_hms_opt(9, 30, 30)
                .expect("valid time of day"),
        ),
        bid: 10.9,
        ask: 11.1,
        bid_size: 100.0,
        ask_size: 100.0,
    });

    let config = backtest_config(
        vec![SymbolConfig {
            symbol: "AAA".to_string(),
            intervals: vec![Interval::M1],
            quotes: true,
        }],
        monday,
        monday,
    );

    let store = Arc::new(SessionData::new());
    let metrics = Arc::new(PipelineMetrics::new());
    let ready = Arc::new(StreamSubscription::new("processor"));
    let processor_edge = Arc::new(EdgeTally::new());
    let quality_edge = Arc::new(EdgeTally::new());
    let (processor_tx, processor_rx) = notice_channel();
    let (quality_tx, quality_rx) = notice_channel();

    let fake = spawn_fake_processor(processor_rx, Arc::clone(&ready), Arc::clone(&processor_edge));
    let quality = spawn_fake_quality(quality_rx, Arc::clone(&quality_edge));

    let mut coordinator = Coordinator::new(
        config,
        Arc::clone(&store),
        Arc::new(WeekdayCalendar::us_default()),
        Arc::new(history),
        None,
        CoordinatorLinks {
            processor_tx,
            quality_tx,
            processor_ready: ready,
            processor_edge,
            analysis_edge: Arc::new(EdgeTally::new()),
            quality_edge,
            metrics: Arc::clone(&metrics),
            stop: Arc::new(AtomicBool::new(false)),
        },
    );

    coordinator.run().expect("backtest run succeeds");
    drop(coordinator);
    fake.handle.join().expect("fake processor joins");
    quality.handle.join().expect("fake quality joins");

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.bars_streamed, 1);
    assert_eq!(snapshot.quotes_streamed, 1);

    // Quote notices carry no interval.
    let seen = quality.seen.lock().expect("fake quality lock poisoned");
    let quote_notice = seen
        .iter()
        .find(|notice| notice.kind == session::notify::NoticeKind::Quotes)
        .expect("quote notice delivered");
    assert_eq!(quote_notice.interval, None);
}

#[test]
fn stop_flag_interrupts_a_blocked_run() {
    let monday = NaiveDate::from_ymd_opt(2024, 1, 8).expect("valid date");

    let history = MemoryHistory::new();
    history.push_bar(bar("AAA", Interval::M1, ts(monday, 9, 30), 11.0));
    history.push_bar(bar("AAA", Interval::M1, ts(monday, 9, 31), 11.5));

    let config = backtest_config(
        vec![SymbolConfig {
            symbol: "AAA".to_string(),
            intervals: vec![Interval::M1],
            quotes: false,
        }],
        monday,
        monday,
    );

    let store = Arc::new(SessionData::new());
    let stop = Arc::new(AtomicBool::new(false));
    let ready = Arc::new(StreamSubscription::new("processor"));
    let (processor_tx, _processor_rx) = notice_channel();
    let (quality_tx, _quality_rx) = notice_channel();

    let flag = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&flag);
    let trip = Arc::clone(&stop);
    // No consumer ever signals readiness, so the data-driven run blocks
    // after the first bar until the stop flag trips.
    let trigger = thread::spawn(move || {
        thread::sleep(StdDuration::from_millis(200));
        trip.store(true, Ordering::Relaxed);
        observed.store(1, Ordering::Relaxed);
    });

    let mut coordinator = Coordinator::new(
        config,
        store,
        Arc::new(WeekdayCalendar::us_default()),
        Arc::new(history),
        None,
        CoordinatorLinks {
            processor_tx,
            quality_tx,
            processor_ready: ready,
            processor_edge: Arc::new(EdgeTally::new()),
            analysis_edge: Arc::new(EdgeTally::new()),
            quality_edge: Arc::new(EdgeTally::new()),
            metrics: Arc::new(PipelineMetrics::new()),
            stop,
        },
    );

    coordinator.run().expect("stop is a clean exit");
    trigger.join().expect("trigger thread joins");
    assert_eq!(flag.load(Ordering::Relaxed), 1);
    assert_eq!(coordinator.state(), SessionState::Terminated);
}
