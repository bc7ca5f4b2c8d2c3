//! Trading calendar interface.
//!
//! Session bounds are always queried, never hardcoded by the pipeline;
//! repeated same-day queries are served from a one-entry cache.

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradingSession {
    pub date: NaiveDate,
    pub open: DateTime<Utc>,
    pub close: DateTime<Utc>,
    pub is_holiday: bool,
}

pub trait TradingCalendar: Send + Sync {
    fn trading_session(&self, date: NaiveDate) -> TradingSession;

    fn is_trading_date(&self, date: NaiveDate) -> bool {
        !self.trading_session(date).is_holiday
    }

    /// First trading day at or after the reference date (inclusive).
    fn first_trading_date(&self, reference: NaiveDate) -> NaiveDate {
        let mut date = reference;
        while !self.is_trading_date(date) {
            date = date.succ_opt().unwrap_or(date);
        }
        date
    }

    fn next_trading_date(&self, date: NaiveDate) -> NaiveDate {
        let following = date.succ_opt().unwrap_or(date);
        self.first_trading_date(following)
    }
}

/// Calendar with fixed daily hours, closed on weekends and a configured
/// holiday set.
#[derive(Debug)]
pub struct WeekdayCalendar {
    open_time: NaiveTime,
    close_time: NaiveTime,
    holidays: HashSet<NaiveDate>,
    cache: Mutex<Option<TradingSession>>,
}

impl WeekdayCalendar {
    pub fn new(open_time: NaiveTime, close_time: NaiveTime) -> Self {
        Self {
            open_time,
            close_time,
            holidays: HashSet::new(),
            cache: Mutex::new(None),
        }
    }

    /// US-equity-like default hours, 09:30 to 16:00 UTC.
    pub fn us_default() -> Self {
        Self::new(
            NaiveTime::from_hms_opt(9, 30, 0).expect("valid open time"),
            NaiveTime::from_hms_opt(16, 0, 0).expect("valid close time"),
        )
    }

    pub fn with_holidays(mut self, holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.holidays.extend(holidays);
        self
    }
}

impl TradingCalendar for WeekdayCalendar {
    fn trading_session(&self, date: NaiveDate) -> TradingSession {
        {
            let cached = self.cache.lock().expect("calendar cache lock poisoned");
            if let Some(session) = *cached {
                if session.date == date {
                    return session;
                }
            }
        }

        let weekend = matches!(date.weekday(), Weekday::Sat | Weekday::Sun);
        let session = TradingSession {
            date,
            open: Utc.from_utc_datetime(&date.and_time(self.open_time)),
            close: Utc.from_utc_datetime(&date.and_time(self.close_time)),
            is_holiday: weekend || self.holidays.contains(&date),
        };

        let mut cached = self.cache.lock().expect("calendar cache lock poisoned");
        *cached = Some(session);
        session
    }
}
