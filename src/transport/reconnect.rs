//! Reconnect pacing for the connection-based transports.
//!
//! A failure that follows a healthy period is retried at once; every further
//! failure waits the configured fixed delay. There is no exponential growth.

use std::time::Duration;

/// Counts consecutive connection failures and hands out the wait before the
/// next attempt.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    delay: Duration,
    failures: u32,
}

impl Backoff {
    // ---

    pub(crate) fn new(delay: Duration) -> Self {
        Self { delay, failures: 0 }
    }

    /// Record one failure and return how long to wait before retrying.
    pub(crate) fn next_delay(&mut self) -> Duration {
        // ---
        let wait = if self.failures == 0 {
            Duration::ZERO
        } else {
            self.delay
        };
        self.failures = self.failures.saturating_add(1);
        wait
    }

    /// Forget past failures; the next one is retried immediately again.
    pub(crate) fn reset(&mut self) {
        self.failures = 0;
    }

    pub(crate) fn failures(&self) -> u32 {
        self.failures
    }
}
