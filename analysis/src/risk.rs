//! Pre-trade risk review.

use chrono::{DateTime, Utc};

use session::config::RiskConfig;
use session::data::SessionData;

use crate::signal::{Decision, Signal};

/// Applies the risk checks to one signal, in fixed order: data quality,
/// then position size, then confidence. The first failing check decides.
pub fn evaluate(
    store: &SessionData,
    config: &RiskConfig,
    signal: Signal,
    decided_at: DateTime<Utc>,
) -> Decision {
    let quality = store
        .get_quality(&signal.symbol, signal.interval)
        .unwrap_or(100.0);

    let reason = if quality < config.min_quality {
        Some(format!(
            "data quality {quality:.1} below minimum {:.1}",
            config.min_quality
        ))
    } else if signal.quantity > config.max_position {
        Some(format!(
            "quantity {} exceeds position limit {}",
            signal.quantity, config.max_position
        ))
    } else if signal.confidence < config.min_confidence {
        Some(format!(
            "confidence {:.2} below threshold {:.2}",
            signal.confidence, config.min_confidence
        ))
    } else {
        None
    };

    Decision {
        approved: reason.is_none(),
        reason,
        quality_score: quality,
        signal,
        decided_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    use session::bar::Interval;

    use crate::signal::Action;

    fn signal(quantity: f64, confidence: f64) -> Signal {
        Signal {
            symbol: "AAA".to_string(),
            interval: Interval::M1,
            action: Action::Buy,
            quantity,
            price: 10.0,
            timestamp: at(),
            confidence,
            strategy: "test".to_string(),
            reason: "test".to_string(),
            metadata: Default::default(),
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 8, 9, 35, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn clean_signal_is_approved() {
        let store = SessionData::new();
        let decision = evaluate(&store, &RiskConfig::default(), signal(100.0, 0.8), at());
        assert!(decision.approved);
        assert!(decision.reason.is_none());
    }

    #[test]
    fn low_quality_rejects_before_any_other_check() {
        let store = SessionData::new();
        store.set_quality("AAA", Interval::M1, 40.0);
        // Quantity and confidence would also fail; quality must win.
        let decision = evaluate(
            &store,
            &RiskConfig::default(),
            signal(1_000_000.0, 0.0),
            at(),
        );
        assert!(!decision.approved);
        assert!(decision.reason.as_deref().unwrap().contains("quality"));
    }

    #[test]
    fn oversized_position_is_rejected() {
        let store = SessionData::new();
        let decision = evaluate(&store, &RiskConfig::default(), signal(1_000_000.0, 0.8), at());
        assert!(!decision.approved);
        assert!(decision.reason.as_deref().unwrap().contains("position limit"));
    }

    #[test]
    fn weak_confidence_is_rejected() {
        let store = SessionData::new();
        let decision = evaluate(&store, &RiskConfig::default(), signal(100.0, 0.1), at());
        assert!(!decision.approved);
        assert!(decision.reason.as_deref().unwrap().contains("confidence"));
    }

    #[test]
    fn unknown_quality_does_not_block_approval() {
        let store = SessionData::new();
        let decision = evaluate(&store, &RiskConfig::default(), signal(100.0, 0.8), at());
        assert!(decision.approved);
        assert_eq!(decision.quality_score, 100.0);
    }

    #[test]
    fn decision_records_the_reviewed_quality_score() {
        let store = SessionData::new();
        store.set_quality("AAA", Interval::M1, 85.0);
        let decision = evaluate(&store, &RiskConfig::default(), signal(100.0, 0.8), at());
        assert!(decision.approved);
        assert_eq!(decision.quality_score, 85.0);
    }
}
