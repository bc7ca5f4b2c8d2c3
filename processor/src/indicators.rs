//! Rolling per-interval indicators recomputed as bars arrive.

use session::bar::Interval;
use session::config::{IndicatorConfig, IndicatorKind};
use session::data::SessionData;

/// Recomputes every configured indicator for one (symbol, interval)
/// sequence and publishes the values into the store. Indicators stay
/// unset until the sequence covers a full period.
pub fn refresh(store: &SessionData, configs: &[IndicatorConfig], symbol: &str, interval: Interval) {
    for config in configs {
        let value = store.with_bars(symbol, interval, |bars| {
            if bars.len() < config.period || config.period == 0 {
                return None;
            }
            let window = &bars[bars.len() - config.period..];
            let sum: f64 = match config.kind {
                IndicatorKind::SmaClose => window.iter().map(|bar| bar.close).sum(),
                IndicatorKind::AvgVolume => window.iter().map(|bar| bar.volume).sum(),
            };
            Some(sum / config.period as f64)
        });
        if let Some(value) = value {
            store.set_realtime_indicator(symbol, interval, &config.name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use session::bar::Bar;

    fn push_bar(store: &SessionData, minute: u32, close: f64, volume: f64) {
        store.append_bar(Arc::new(Bar {
            symbol: "AAA".to_string(),
            interval: Interval::M1,
            timestamp: Utc
                .with_ymd_and_hms(2024, 1, 8, 9, minute, 0)
                .single()
                .expect("valid timestamp"),
            open: close,
            high: close,
            low: close,
            close,
            volume,
        }));
    }

    fn sma(period: usize) -> Vec<IndicatorConfig> {
        vec![IndicatorConfig {
            name: "sma".to_string(),
            kind: IndicatorKind::SmaClose,
            period,
        }]
    }

    #[test]
    fn sma_stays_unset_during_warmup() {
        let store = SessionData::new();
        push_bar(&store, 30, 10.0, 100.0);
        push_bar(&store, 31, 11.0, 100.0);
        refresh(&store, &sma(3), "AAA", Interval::M1);
        assert_eq!(store.get_realtime_indicator("AAA", Interval::M1, "sma"), None);
    }

    #[test]
    fn sma_tracks_the_trailing_window() {
        let store = SessionData::new();
        let configs = sma(3);
        for (minute, close) in [(30, 10.0), (31, 11.0), (32, 12.0), (33, 16.0)] {
            push_bar(&store, minute, close, 100.0);
            refresh(&store, &configs, "AAA", Interval::M1);
        }
        // Last three closes: 11, 12, 16.
        assert_eq!(
            store.get_realtime_indicator("AAA", Interval::M1, "sma"),
            Some(13.0)
        );
    }

    #[test]
    fn avg_volume_uses_the_volume_field() {
        let store = SessionData::new();
        let configs = vec![IndicatorConfig {
            name: "vol".to_string(),
            kind: IndicatorKind::AvgVolume,
            period: 2,
        }];
        push_bar(&store, 30, 10.0, 100.0);
        push_bar(&store, 31, 10.0, 300.0);
        refresh(&store, &configs, "AAA", Interval::M1);
        assert_eq!(
            store.get_realtime_indicator("AAA", Interval::M1, "vol"),
            Some(200.0)
        );
    }
}
