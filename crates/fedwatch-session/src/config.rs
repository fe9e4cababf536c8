use std::time::Duration;

pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Matches the server's ring of retained output lines.
pub const DEFAULT_LOG_CAPACITY: usize = 500;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub snapshot_interval: Duration,
    pub status_interval: Duration,
    pub request_timeout: Duration,
    pub log_capacity: usize,
    pub reconnect: BackoffPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            status_interval: DEFAULT_STATUS_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            log_capacity: DEFAULT_LOG_CAPACITY,
            reconnect: BackoffPolicy::default(),
        }
    }
}

/// Reconnect schedule for the log stream: exponential from `initial`, capped
/// at `max`, giving up after `max_attempts` consecutive failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            max_attempts: 8,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (0-based), or `None` once the
    /// attempts are exhausted.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        Some(self.initial.saturating_mul(factor).min(self.max))
    }
}
