//! Backoff timings for the reconnection controller.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Handshake attempts per connect before giving up on that round.
    pub handshake_attempts: u32,

    /// Wait `handshake_step * n` after the n-th failed attempt.
    pub handshake_step: Duration,

    /// Upper bound of the random delay before reconnecting after the
    /// transport closed under us.
    pub closure_jitter: Duration,

    /// Wait `min(retry_step * n, retry_cap)` after the n-th exhausted round.
    pub retry_step: Duration,
    pub retry_cap: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            handshake_attempts: 3,
            handshake_step: Duration::from_secs(2),
            closure_jitter: Duration::from_secs(5),
            retry_step: Duration::from_secs(2),
            retry_cap: Duration::from_secs(60),
        }
    }
}

impl ReconnectPolicy {
    /// Delay after failed handshake attempt `attempt` (1-based): linear.
    pub fn handshake_delay(&self, attempt: u32) -> Duration {
        self.handshake_step.saturating_mul(attempt)
    }

    /// Delay after exhausted round `retry` (1-based): linear, capped.
    pub fn retry_delay(&self, retry: u32) -> Duration {
        self.retry_step.saturating_mul(retry).min(self.retry_cap)
    }

    /// Random delay in `[0, closure_jitter]` so clients dropped together do
    /// not all reconnect in the same instant.
    pub fn closure_delay(&self) -> Duration {
        let max = self.closure_jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}
