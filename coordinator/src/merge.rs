//! Chronological merge across input streams.
//!
//! Each active stream keeps exactly one pending (peeked, not yet
//! consumed) item; every cycle the coordinator consumes the globally
//! oldest pending item by effective time. Bars order by their window
//! close, quotes by their exact timestamp.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use crossbeam::channel::{Receiver, TryRecvError};

use session::bar::{Interval, StreamKind};
use session::error::EngineError;
use session::source::{HistoricalSource, StreamItem};

#[derive(Debug)]
enum StreamQueue {
    Loaded(VecDeque<StreamItem>),
    Live(Receiver<StreamItem>),
}

/// One merged input stream with its pending slot.
#[derive(Debug)]
pub struct InputStream {
    pub symbol: String,
    pub kind: StreamKind,
    pub interval: Option<Interval>,
    queue: StreamQueue,
    pending: Option<StreamItem>,
    exhausted: bool,
}

impl InputStream {
    pub fn loaded(
        symbol: impl Into<String>,
        kind: StreamKind,
        interval: Option<Interval>,
        items: VecDeque<StreamItem>,
    ) -> Self {
        let mut stream = Self {
            symbol: symbol.into(),
            kind,
            interval,
            queue: StreamQueue::Loaded(items),
            pending: None,
            exhausted: false,
        };
        stream.refill();
        stream
    }

    pub fn live(
        symbol: impl Into<String>,
        kind: StreamKind,
        interval: Option<Interval>,
        rx: Receiver<StreamItem>,
    ) -> Self {
        let mut stream = Self {
            symbol: symbol.into(),
            kind,
            interval,
            queue: StreamQueue::Live(rx),
            pending: None,
            exhausted: false,
        };
        stream.refill();
        stream
    }

    /// Fills the pending slot from the underlying queue if it is empty.
    /// Live streams are polled without blocking; an item that has not
    /// arrived yet simply leaves the slot empty for this cycle.
    pub fn refill(&mut self) {
        if self.pending.is_some() || self.exhausted {
            return;
        }
        match &mut self.queue {
            StreamQueue::Loaded(items) => {
                self.pending = items.pop_front();
                if self.pending.is_none() {
                    self.exhausted = true;
                }
            }
            StreamQueue::Live(rx) => match rx.try_recv() {
                Ok(item) => self.pending = Some(item),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => self.exhausted = true,
            },
        }
    }

    pub fn peek(&self) -> Option<&StreamItem> {
        self.pending.as_ref()
    }

    /// Consumes the pending item and immediately re-peeks the queue.
    pub fn take(&mut self) -> Option<StreamItem> {
        let item = self.pending.take();
        self.refill();
        item
    }

    /// True once the queue is drained and no pending item remains.
    pub fn is_finished(&self) -> bool {
        self.exhausted && self.pending.is_none()
    }
}

/// Index of the stream holding the globally oldest pending item.
pub fn oldest_pending(streams: &[InputStream]) -> Option<usize> {
    streams
        .iter()
        .enumerate()
        .filter_map(|(index, stream)| {
            stream
                .peek()
                .map(|item| (index, item.effective_time()))
        })
        .min_by_key(|(_, effective)| *effective)
        .map(|(index, _)| index)
}

pub fn all_finished(streams: &[InputStream]) -> bool {
    streams.iter().all(InputStream::is_finished)
}

/// Ahead-of-time loader for backtest input queues.
///
/// Fetches `prefetch` windows in one source round trip and hands out one
/// session day at a time, retaining the surplus for the following days.
#[derive(Debug, Default)]
pub struct Prefetcher {
    buffers: HashMap<(String, StreamKind), VecDeque<StreamItem>>,
    loaded_until: HashMap<(String, StreamKind), DateTime<Utc>>,
}

impl Prefetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Items for one session day: `[day_open, day_close)` by timestamp.
    /// When the retained buffer cannot cover the day, the source is asked
    /// for everything up to `prefetch_until` in one call.
    pub fn load_day(
        &mut self,
        source: &dyn HistoricalSource,
        symbol: &str,
        kind: StreamKind,
        interval: Option<Interval>,
        day_open: DateTime<Utc>,
        day_close: DateTime<Utc>,
        prefetch_until: DateTime<Utc>,
    ) -> Result<VecDeque<StreamItem>, EngineError> {
        let key = (symbol.to_string(), kind);
        let covered = self.loaded_until.get(&key).copied().unwrap_or(day_open);

        if covered < day_close {
            let fetch_from = covered.max(day_open);
            let fetch_until = prefetch_until.max(day_close);
            let fetched = match kind {
                StreamKind::Bars => {
                    let interval = interval.ok_or_else(|| {
                        EngineError::Config(format!(
                            "bar stream for {symbol} has no interval"
                        ))
                    })?;
                    source
                        .get_bars(symbol, interval, fetch_from, fetch_until)?
                        .into_iter()
                        .map(|bar| StreamItem::Bar(std::sync::Arc::new(bar)))
                        .collect::<Vec<_>>()
                }
                StreamKind::Quotes => source
                    .get_quotes(symbol, fetch_from, fetch_until)?
                    .into_iter()
                    .map(|quote| StreamItem::Quote(std::sync::Arc::new(quote)))
                    .collect(),
                StreamKind::Ticks => Vec::new(),
            };
            let buffer = self.buffers.entry(key.clone()).or_default();
            buffer.extend(fetched);
            self.loaded_until.insert(key.clone(), fetch_until);
        }

        let buffer = self.buffers.entry(key).or_default();
        let mut day_items = VecDeque::new();
        while let Some(item) = buffer.front() {
            if item.timestamp() >= day_close {
                break;
            }
            let item = buffer.pop_front().expect("front just observed");
            if item.timestamp() >= day_open {
                day_items.push_back(item);
            }
        }
        Ok(day_items)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use session::bar::{Bar, Interval, Quote, StreamKind};
    use session::source::{MemoryHistory, StreamItem};

    use super::{all_finished, oldest_pending, InputStream, Prefetcher};

    fn bar(minute: u32) -> StreamItem {
        StreamItem::Bar(Arc::new(Bar {
            symbol: "AAPL".to_string(),
            interval: Interval::M1,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 9, 30 + minute, 0).unwrap(),
            open: 100.0,
            high: 100.5,
            low: 99.5,
            close: 100.2,
            volume: 1000.0,
        }))
    }

    fn quote(second: u32) -> StreamItem {
        StreamItem::Quote(Arc::new(Quote {
            symbol: "AAPL".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, second).unwrap(),
            bid: 100.0,
            ask: 100.1,
            bid_size: 10.0,
            ask_size: 10.0,
        }))
    }

    #[test]
    fn merge_orders_by_effective_time() {
        // The 09:30 one-minute bar is only knowable at 09:31, so the
        // 09:30:30 quote must come out first.
        let mut streams = vec![
            InputStream::loaded(
                "AAPL",
                StreamKind::Bars,
                Some(Interval::M1),
                VecDeque::from(vec![bar(0), bar(1)]),
            ),
            InputStream::loaded(
                "AAPL",
                StreamKind::Quotes,
                None,
                VecDeque::from(vec![quote(30)]),
            ),
        ];

        let first = oldest_pending(&streams).expect("pending item");
        assert_eq!(streams[first].kind, StreamKind::Quotes);
        streams[first].take();

        let second = oldest_pending(&streams).expect("pending item");
        assert_eq!(streams[second].kind, StreamKind::Bars);
        streams[second].take();
        streams[second].take();

        assert!(oldest_pending(&streams).is_none());
        assert!(all_finished(&streams));
    }

    #[test]
    fn take_refills_the_pending_slot() {
        let mut stream = InputStream::loaded(
            "AAPL",
            StreamKind::Bars,
            Some(Interval::M1),
            VecDeque::from(vec![bar(0), bar(1)]),
        );
        assert!(stream.peek().is_some());
        stream.take().expect("first item");
        assert!(stream.peek().is_some(), "slot re-peeked after take");
        stream.take().expect("second item");
        assert!(stream.is_finished());
    }

    #[test]
    fn prefetcher_hands_out_one_day_and_retains_surplus() {
        let history = MemoryHistory::new();
        // Two session days of one bar each.
        for (day, minute) in [(2, 0), (3, 0)] {
            history.push_bar(Bar {
                symbol: "AAPL".to_string(),
                interval: Interval::M1,
                timestamp: Utc.with_ymd_and_hms(2024, 1, day, 9, 30 + minute, 0).unwrap(),
                open: 100.0,
                high: 100.5,
                low: 99.5,
                close: 100.2,
                volume: 1000.0,
            });
        }

        let mut prefetcher = Prefetcher::new();
        let day2_open = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
        let day2_close = Utc.with_ymd_and_hms(2024, 1, 2, 16, 0, 0).unwrap();
        let day3_open = Utc.with_ymd_and_hms(2024, 1, 3, 9, 30, 0).unwrap();
        let day3_close = Utc.with_ymd_and_hms(2024, 1, 3, 16, 0, 0).unwrap();

        let day2 = prefetcher
            .load_day(
                &history,
                "AAPL",
                StreamKind::Bars,
                Some(Interval::M1),
                day2_open,
                day2_close,
                day3_close,
            )
            .expect("prefetch day 2");
        assert_eq!(day2.len(), 1);

        // Day 3 is served from the retained buffer without widening the
        // loaded range.
        let day3 = prefetcher
            .load_day(
                &history,
                "AAPL",
                StreamKind::Bars,
                Some(Interval::M1),
                day3_open,
                day3_close,
                day3_close,
            )
            .expect("prefetch day 3");
        assert_eq!(day3.len(), 1);
    }
}
