//! One-shot ready/wait synchronization between a producer and one
//! downstream consumer stage.
//!
//! Contract: one signal, one consumption, explicit reset. The ready flag
//! is cleared when consumed, so every cycle needs a fresh signal. Only
//! the coordinator-to-processor and processor-to-analysis edges carry a
//! subscription; all other notifications are fire-and-forget.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::error::EngineError;

/// Pacing regime of the running session.
///
/// Data-driven (acceleration = 0) blocks producers until consumers are
/// ready, guaranteeing zero loss. Clock-driven (acceleration > 0,
/// live = 1.0) never blocks; a consumer that misses its deadline raises
/// an overrun instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaceMode {
    DataDriven,
    ClockDriven,
}

#[derive(Debug, Default)]
struct SubscriptionState {
    ready: bool,
    generation: u64,
}

/// One-shot readiness flag with a generation counter.
#[derive(Debug)]
pub struct StreamSubscription {
    label: String,
    state: Mutex<SubscriptionState>,
    cond: Condvar,
}

impl StreamSubscription {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Mutex::new(SubscriptionState::default()),
            cond: Condvar::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Marks the consumer ready for the next unit of work.
    pub fn signal_ready(&self) {
        let mut guard = self.state.lock().expect("subscription lock poisoned");
        guard.ready = true;
        guard.generation = guard.generation.wrapping_add(1);
        self.cond.notify_all();
    }

    /// Consumes the ready flag without blocking.
    pub fn try_consume(&self) -> bool {
        let mut guard = self.state.lock().expect("subscription lock poisoned");
        if guard.ready {
            guard.ready = false;
            true
        } else {
            false
        }
    }

    /// Waits for readiness according to the pacing regime.
    ///
    /// Data-driven: blocks until signaled, waking on `poll` slices to
    /// observe the stop flag; returns `Err(Stopped)` if stop is set
    /// first. Clock-driven: a single non-blocking check; an unset flag
    /// is an `Overrun`.
    pub fn wait_until_ready(
        &self,
        mode: PaceMode,
        poll: Duration,
        stop: &AtomicBool,
    ) -> Result<(), EngineError> {
        match mode {
            PaceMode::ClockDriven => {
                if self.try_consume() {
                    Ok(())
                } else {
                    Err(EngineError::Overrun {
                        stage: self.label.clone(),
                    })
                }
            }
            PaceMode::DataDriven => {
                let mut guard = self.state.lock().expect("subscription lock poisoned");
                loop {
                    if guard.ready {
                        guard.ready = false;
                        return Ok(());
                    }
                    if stop.load(Ordering::Relaxed) {
                        return Err(EngineError::Stopped);
                    }
                    let (next, _timeout) = self
                        .cond
                        .wait_timeout(guard, poll)
                        .expect("subscription lock poisoned");
                    guard = next;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::{PaceMode, StreamSubscription};
    use crate::error::EngineError;

    #[test]
    fn signal_is_consumed_exactly_once() {
        let sub = StreamSubscription::new("coordinator->processor");
        assert!(!sub.try_consume());
        sub.signal_ready();
        assert!(sub.try_consume());
        assert!(!sub.try_consume(), "flag resets after consumption");
    }

    #[test]
    fn clock_driven_wait_raises_overrun_when_not_ready() {
        let sub = StreamSubscription::new("processor->analysis");
        let stop = AtomicBool::new(false);
        let result = sub.wait_until_ready(PaceMode::ClockDriven, Duration::from_millis(10), &stop);
        assert!(matches!(result, Err(EngineError::Overrun { .. })));

        sub.signal_ready();
        assert!(sub
            .wait_until_ready(PaceMode::ClockDriven, Duration::from_millis(10), &stop)
            .is_ok());
    }

    #[test]
    fn data_driven_wait_blocks_until_signaled() {
        let sub = Arc::new(StreamSubscription::new("coordinator->processor"));
        let stop = Arc::new(AtomicBool::new(false));

        let signaler = Arc::clone(&sub);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            signaler.signal_ready();
        });

        let result = sub.wait_until_ready(
            PaceMode::DataDriven,
            Duration::from_millis(5),
            &stop,
        );
        assert!(result.is_ok());
        handle.join().expect("signaler thread");
    }

    #[test]
    fn data_driven_wait_observes_stop() {
        let sub = StreamSubscription::new("coordinator->processor");
        let stop = AtomicBool::new(false);
        stop.store(true, Ordering::Relaxed);
        let result = sub.wait_until_ready(PaceMode::DataDriven, Duration::from_millis(5), &stop);
        assert!(matches!(result, Err(EngineError::Stopped)));
    }
}
