use std::time::Duration;

/// Configures HTTP timeout and retry behavior.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientOptions {
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum number of retries after the initial attempt.
    pub max_retries: usize,
    /// Base retry backoff in milliseconds (linear strategy).
    pub retry_backoff_ms: u64,
    /// Return [`crate::Fetched::Degraded`] instead of failing when retries
    /// of a `GET` are exhausted.
    pub degraded_fallback: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_retries: 3,
            retry_backoff_ms: 1_000,
            degraded_fallback: false,
        }
    }
}

/// Configures push-channel reconnection and the polling fallback.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FeedOptions {
    /// Reconnects allowed before a feed is declared failed.
    pub max_reconnect_attempts: u32,
    /// Base reconnect backoff in milliseconds (exponential strategy).
    pub reconnect_backoff_ms: u64,
    /// How long the first connection may take to open before polling takes over.
    pub open_grace_ms: u64,
}

impl FeedOptions {
    pub(crate) fn open_grace(&self) -> Duration {
        Duration::from_millis(self.open_grace_ms)
    }

    /// Delay before reconnect number `attempt` (counted from zero).
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let multiplier = 1u64 << attempt.min(16);
        Duration::from_millis(self.reconnect_backoff_ms.saturating_mul(multiplier))
    }
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            reconnect_backoff_ms: 3_000,
            open_grace_ms: 5_000,
        }
    }
}
