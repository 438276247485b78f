/// Preset retry configurations
use crate::retry::RetryConfig;
use std::time::Duration;

/// Message broker reconnects after the initial connection succeeded
///
/// - Retries forever; losing the broker must not kill the process
/// - 500ms initial delay, doubling up to 30s
/// - ±30% jitter so a fleet of relays does not reconnect in lockstep
pub fn broker_reconnect_config() -> RetryConfig {
    RetryConfig {
        max_retries: None,
        initial_backoff: Duration::from_millis(500),
        max_backoff: Duration::from_secs(30),
        backoff_multiplier: 2.0,
        jitter: true,
    }
}
