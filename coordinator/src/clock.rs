//! Session clock with two timing regimes.
//!
//! Data-driven (acceleration = 0): time is purely data paced and the
//! clock never sleeps. Clock-driven (acceleration > 0, live = 1.0): the
//! coordinator throttles itself against the wall clock scaled by the
//! acceleration factor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Utc};

use session::data::SessionBounds;
use session::error::EngineError;
use session::subscription::PaceMode;

#[derive(Debug)]
pub struct SessionClock {
    open: DateTime<Utc>,
    close: DateTime<Utc>,
    current: DateTime<Utc>,
    acceleration: f64,
    anchor_wall: Instant,
    anchor_sim: DateTime<Utc>,
}

impl SessionClock {
    pub fn new(bounds: SessionBounds, acceleration: f64) -> Self {
        Self {
            open: bounds.open,
            close: bounds.close,
            current: bounds.open,
            acceleration,
            anchor_wall: Instant::now(),
            anchor_sim: bounds.open,
        }
    }

    pub fn pace_mode(&self) -> PaceMode {
        if self.acceleration == 0.0 {
            PaceMode::DataDriven
        } else {
            PaceMode::ClockDriven
        }
    }

    pub fn current(&self) -> DateTime<Utc> {
        self.current
    }

    pub fn close(&self) -> DateTime<Utc> {
        self.close
    }

    /// Advances session time to `target`. Times before market open are
    /// clamped to the open; a target past market close is a scheduling
    /// invariant violation and comes back as `TimePastClose`.
    pub fn advance_to(&mut self, target: DateTime<Utc>) -> Result<(), EngineError> {
        let target = target.max(self.open);
        if target > self.close {
            return Err(EngineError::TimePastClose {
                current: target,
                close: self.close,
            });
        }
        if target > self.current {
            self.current = target;
        }
        Ok(())
    }

    /// Jumps straight to market close; used when input data is exhausted
    /// or the next pending item lies beyond the session.
    pub fn advance_to_close(&mut self) {
        self.current = self.close;
    }

    /// Sleeps until the wall clock catches up with `target` simulated
    /// time, in small slices so a stop request is observed promptly.
    /// No-op in data-driven mode.
    pub fn throttle_until(&self, target: DateTime<Utc>, stop: &AtomicBool) {
        if self.acceleration <= 0.0 {
            return;
        }
        let sim_elapsed = (target - self.anchor_sim)
            .to_std()
            .unwrap_or(StdDuration::ZERO);
        let scaled = sim_elapsed.as_secs_f64() / self.acceleration;
        let deadline = self.anchor_wall + StdDuration::from_secs_f64(scaled);

        loop {
            if stop.load(Ordering::Relaxed) {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            let remaining = deadline - now;
            std::thread::sleep(remaining.min(StdDuration::from_millis(5)));
        }
    }
}
