//! Trailing-window history reload, historical indicators and historical
//! quality.
//!
//! Runs once per trading day during session initialization. Indicators
//! are computed from trailing data only (no lookahead) and stored as
//! day-indexed series with O(1) time lookup. Historical quality is
//! always assigned here, never by the background quality manager.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use tracing::info;

use session::bar::SharedBar;
use session::calendar::TradingCalendar;
use session::config::{IndicatorConfig, IndicatorKind, SessionConfig};
use session::data::{IndexedSeries, SessionData};
use session::error::EngineError;
use session::source::HistoricalSource;

/// Last trading day strictly before `date`.
fn prev_trading_date(calendar: &dyn TradingCalendar, date: NaiveDate) -> NaiveDate {
    let mut day = date.pred_opt().unwrap_or(date);
    while !calendar.is_trading_date(day) {
        day = day.pred_opt().unwrap_or(day);
    }
    day
}

/// Trading days of the trailing window, oldest first.
fn window_days(
    calendar: &dyn TradingCalendar,
    date: NaiveDate,
    lookback_days: u32,
) -> Vec<NaiveDate> {
    let mut days = Vec::with_capacity(lookback_days as usize);
    let mut day = date;
    for _ in 0..lookback_days {
        day = prev_trading_date(calendar, day);
        days.push(day);
    }
    days.reverse();
    days
}

/// Clears the store and reloads the trailing window for every symbol,
/// then recomputes historical indicators and quality over it.
pub fn reload_session_history(
    store: &SessionData,
    source: &dyn HistoricalSource,
    calendar: &dyn TradingCalendar,
    config: &SessionConfig,
    date: NaiveDate,
) -> Result<(), EngineError> {
    store.clear_all();

    let days = window_days(calendar, date, config.lookback_days);
    let Some(first_day) = days.first().copied() else {
        return Ok(());
    };
    let window_start = calendar.trading_session(first_day).open;
    let window_end = calendar.trading_session(date).open;

    for symbol in &config.symbols {
        let base = symbol.base_interval();
        let bars = source.get_bars(&symbol.symbol, base, window_start, window_end)?;
        let loaded = bars.len();
        for bar in bars {
            store.append_bar(std::sync::Arc::new(bar));
        }
        info!(
            symbol = %symbol.symbol,
            interval = base.as_str(),
            bars = loaded,
            "trailing history reloaded"
        );

        store.with_bars(&symbol.symbol, base, |bars| {
            for indicator in &config.historical_indicators {
                let series = compute_daily_indicator(indicator, bars, &days);
                store.set_historical_indicator(
                    &format!("{}.{}", symbol.symbol, indicator.name),
                    series,
                );
            }
        });

        // An empty trailing window leaves no score; unknown reads as
        // clean at risk review.
        let quality = if !config.quality_enabled {
            Some(100.0)
        } else if loaded > 0 {
            Some(historical_quality(calendar, &days, base.seconds(), loaded))
        } else {
            None
        };
        if let Some(quality) = quality {
            store.set_quality(&symbol.symbol, base, quality);
            for derived in symbol.derived_intervals() {
                store.set_quality(&symbol.symbol, derived, quality);
            }
        }
    }

    Ok(())
}

fn historical_quality(
    calendar: &dyn TradingCalendar,
    days: &[NaiveDate],
    base_seconds: i64,
    actual: usize,
) -> f64 {
    let expected: i64 = days
        .iter()
        .map(|day| {
            let session = calendar.trading_session(*day);
            (session.close - session.open).num_seconds() / base_seconds
        })
        .sum();
    if expected <= 0 {
        return 100.0;
    }
    (actual as f64 / expected as f64 * 100.0).clamp(0.0, 100.0)
}

/// Computes one day-indexed indicator series over the trailing bars.
///
/// Each trading day's value uses only bars up to and including that day;
/// non-trading calendar days between window days carry the latest value
/// forward so the time-to-index lookup stays a single division.
fn compute_daily_indicator(
    config: &IndicatorConfig,
    bars: &[SharedBar],
    days: &[NaiveDate],
) -> IndexedSeries {
    let start = days
        .first()
        .map(|day| day_start(*day))
        .unwrap_or_else(Utc::now);
    if days.is_empty() || bars.is_empty() {
        return IndexedSeries::new(start, Duration::days(1), Vec::new());
    }

    // One aggregate per trading day, in window order.
    let mut day_values = Vec::with_capacity(days.len());
    for day in days {
        let day_bars: Vec<&SharedBar> = bars
            .iter()
            .filter(|bar| bar.timestamp.date_naive() == *day)
            .collect();
        let value = match config.kind {
            IndicatorKind::SmaClose => day_bars.last().map(|bar| bar.close),
            IndicatorKind::AvgVolume => {
                if day_bars.is_empty() {
                    None
                } else {
                    Some(day_bars.iter().map(|bar| bar.volume).sum::<f64>())
                }
            }
        };
        day_values.push(value);
    }

    // Rolling mean over the trailing `period` trading days.
    let mut rolled = Vec::with_capacity(day_values.len());
    for index in 0..day_values.len() {
        let from = index.saturating_sub(config.period.saturating_sub(1));
        let window: Vec<f64> = day_values[from..=index]
            .iter()
            .filter_map(|value| *value)
            .collect();
        if window.is_empty() {
            rolled.push(rolled.last().copied().unwrap_or(0.0));
        } else {
            rolled.push(window.iter().sum::<f64>() / window.len() as f64);
        }
    }

    // Expand onto the calendar-day grid, carrying values across
    // weekends and holidays.
    let last_day = days[days.len() - 1];
    let total_days = (last_day - days[0]).num_days() as usize + 1;
    let mut values = Vec::with_capacity(total_days);
    let mut cursor = 0usize;
    for offset in 0..total_days {
        let day = days[0] + Duration::days(offset as i64);
        if cursor + 1 < days.len() && day >= days[cursor + 1] {
            cursor += 1;
        }
        values.push(rolled[cursor]);
    }

    IndexedSeries::new(start, Duration::days(1), values)
}

fn day_start(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).expect("midnight exists"))
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use session::bar::{Bar, Interval};
    use session::calendar::{TradingCalendar, WeekdayCalendar};
    use session::config::{IndicatorConfig, IndicatorKind, RunMode, SessionConfig, SymbolConfig};
    use session::data::SessionData;
    use session::source::MemoryHistory;

    use super::{reload_session_history, window_days};

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn config(lookback: u32) -> SessionConfig {
        SessionConfig {
            mode: RunMode::Backtest,
            symbols: vec![SymbolConfig {
                symbol: "AAPL".to_string(),
                intervals: vec![Interval::M1, Interval::M5],
                quotes: false,
            }],
            start_date: date(8),
            end_date: date(8),
            lookback_days: lookback,
            prefetch_days: 1,
            acceleration: 0.0,
            quality_enabled: true,
            gap_fill: Default::default(),
            risk: Default::default(),
            historical_indicators: vec![IndicatorConfig {
                name: "close_sma".to_string(),
                kind: IndicatorKind::SmaClose,
                period: 2,
            }],
            realtime_indicators: Vec::new(),
        }
    }

    fn seed_day(history: &MemoryHistory, day: u32, bars: u32, close: f64) {
        for minute in 0..bars {
            history.push_bar(Bar {
                symbol: "AAPL".to_string(),
                interval: Interval::M1,
                timestamp: Utc
                    .with_ymd_and_hms(2024, 1, day, 9, 30 + minute, 0)
                    .unwrap(),
                open: close - 0.1,
                high: close + 0.2,
                low: close - 0.3,
                close,
                volume: 500.0,
            });
        }
    }

    #[test]
    fn window_days_skip_weekends() {
        let calendar = WeekdayCalendar::us_default();
        // 2024-01-08 is a Monday; two lookback days are Thu 4th and Fri 5th.
        let days = window_days(&calendar, date(8), 2);
        assert_eq!(days, vec![date(4), date(5)]);
    }

    #[test]
    fn reload_loads_trailing_bars_and_indicators() {
        let calendar = WeekdayCalendar::us_default();
        let history = MemoryHistory::new();
        seed_day(&history, 4, 3, 100.0);
        seed_day(&history, 5, 3, 102.0);

        let store = SessionData::new();
        reload_session_history(&store, &history, &calendar, &config(2), date(8))
            .expect("reload succeeds");

        assert_eq!(store.get_bar_count("AAPL", Interval::M1), 6);
        // Friday's slot averages Thursday and Friday closes.
        let friday = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        assert_eq!(
            store.get_historical_indicator("AAPL.close_sma", friday),
            Some(101.0)
        );
        // Quality over the window reflects the sparse coverage.
        let quality = store
            .get_quality("AAPL", Interval::M1)
            .expect("historical quality assigned");
        assert!(quality > 0.0 && quality < 100.0);
        // Derived intervals inherit the historical score.
        assert_eq!(store.get_quality("AAPL", Interval::M5), Some(quality));
    }

    #[test]
    fn empty_trailing_window_leaves_quality_unset() {
        let calendar = WeekdayCalendar::us_default();
        let history = MemoryHistory::new();

        let store = SessionData::new();
        reload_session_history(&store, &history, &calendar, &config(2), date(8))
            .expect("reload succeeds");

        assert_eq!(store.get_quality("AAPL", Interval::M1), None);
        assert_eq!(store.get_quality("AAPL", Interval::M5), None);
    }

    #[test]
    fn disabled_quality_pins_history_to_full_score() {
        let calendar = WeekdayCalendar::us_default();
        let history = MemoryHistory::new();
        seed_day(&history, 5, 1, 100.0);

        let store = SessionData::new();
        let mut cfg = config(1);
        cfg.quality_enabled = false;
        reload_session_history(&store, &history, &calendar, &cfg, date(8))
            .expect("reload succeeds");

        assert_eq!(store.get_quality("AAPL", Interval::M1), Some(100.0));
        assert_eq!(store.get_quality("AAPL", Interval::M5), Some(100.0));
    }
}
