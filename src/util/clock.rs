//! Captured timer primitives
//!
//! The engine's own deadlines, deferrals, and inter-batch yields must not be
//! affected by whatever notion of time the code under test installs for
//! itself. The timer primitives are therefore captured once into
//! process-wide state, before any user code runs, and all internal
//! scheduling goes through the captured copy.

#![allow(dead_code)]

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use tokio::time::Sleep;

static CLOCK: OnceLock<Clock> = OnceLock::new();

/// Get the process-wide clock, capturing it on first use.
pub fn clock() -> &'static Clock {
    CLOCK.get_or_init(Clock::capture)
}

/// Timer primitives captured at engine startup
pub struct Clock {
    started: Instant,
    now: fn() -> Instant,
    sleep: fn(Duration) -> Sleep,
}

impl Clock {
    fn capture() -> Self {
        Self {
            started: Instant::now(),
            now: Instant::now,
            sleep: tokio::time::sleep,
        }
    }

    /// Current monotonic time from the captured source
    pub fn now(&self) -> Instant {
        (self.now)()
    }

    /// Time since the clock was captured
    pub fn uptime(&self) -> Duration {
        self.now() - self.started
    }

    /// Sleep through the captured timer. A zero duration returns immediately
    /// without touching the timer wheel.
    pub async fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        (self.sleep)(duration).await;
    }

    /// Yield back to the scheduler between batches.
    pub async fn rest(&self) {
        tokio::task::yield_now().await;
    }
}

/// Simple timer for measuring elapsed time against the captured clock
#[derive(Debug)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Create and start a new timer
    pub fn start() -> Self {
        Self {
            start: clock().now(),
        }
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        clock().now() - self.start
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }
}
