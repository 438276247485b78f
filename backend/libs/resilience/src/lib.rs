/// Resilience patterns for long-running consumers
///
/// - **Backoff**: exponential delay schedule with jitter, bounded or
///   unbounded, for hand-written reconnect loops
/// - **Presets**: tuned settings for broker reconnects
///
/// # Example: reconnect loop
///
/// ```rust,no_run
/// use resilience::{presets, Backoff};
///
/// #[tokio::main]
/// async fn main() {
///     let mut backoff = Backoff::new(presets::broker_reconnect_config());
///
///     while let Some(delay) = backoff.next_delay() {
///         tokio::time::sleep(delay).await;
///         // try to connect, `backoff.reset()` and break on success
///     }
/// }
/// ```
pub mod presets;
pub mod retry;

pub use presets::broker_reconnect_config;
pub use retry::{Backoff, RetryConfig};
