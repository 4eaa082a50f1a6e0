//! Configuration for the sync core.

use std::time::Duration;

/// Tunables for retry scheduling and temporary-id handling.
///
/// The host app owns config-file parsing; this struct is plain data with
/// production defaults.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Attempts before an operation becomes `MaxRetryExceeded`.
    pub max_retry: u32,
    /// First rung of the exponential backoff ladder.
    pub base_retry_delay: Duration,
    /// Backoff ceiling.
    pub max_retry_delay: Duration,
    /// How often the retry driver polls for due operations.
    pub retry_check_interval: Duration,
    /// Prefix marking client-generated ids that the server has not seen.
    pub temporary_id_prefix: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retry: 5,
            base_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(60),
            retry_check_interval: Duration::from_secs(30),
            temporary_id_prefix: "local_".to_string(),
        }
    }
}

impl SyncConfig {
    /// Retry delay for the nth attempt: `min(base * 2^n, max)`.
    pub fn retry_delay(&self, retry_count: u32) -> Duration {
        let exp = retry_count.min(31);
        let delay = self
            .base_retry_delay
            .saturating_mul(1u32.checked_shl(exp).unwrap_or(u32::MAX));
        delay.min(self.max_retry_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = SyncConfig::default();
        assert_eq!(c.max_retry, 5);
        assert_eq!(c.base_retry_delay, Duration::from_secs(1));
        assert_eq!(c.max_retry_delay, Duration::from_secs(60));
        assert_eq!(c.retry_check_interval, Duration::from_secs(30));
        assert_eq!(c.temporary_id_prefix, "local_");
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let c = SyncConfig::default();
        assert_eq!(c.retry_delay(0), Duration::from_secs(1));
        assert_eq!(c.retry_delay(1), Duration::from_secs(2));
        assert_eq!(c.retry_delay(5), Duration::from_secs(32));
        assert_eq!(c.retry_delay(6), Duration::from_secs(60));
        assert_eq!(c.retry_delay(30), Duration::from_secs(60));
    }
}
