/// Resilience patterns for the koi realtime client
///
/// This library provides the retry and timeout building blocks shared by the
/// notification hub, the event socket and the REST client:
/// - **Retry**: Exponential backoff capped at a maximum delay, with optional jitter
/// - **Attempt Counter**: Reconnect attempt bookkeeping that resets on success
/// - **Timeout**: Enforces time limits on handshakes and REST calls
/// - **Preset Configurations**: Pre-tuned settings for the hub, the event socket and REST
///
/// # Example: Reconnect delay for the third attempt
///
/// ```rust
/// use resilience::presets;
/// use std::time::Duration;
///
/// let config = presets::hub_config();
/// let retry = config.retry.expect("hub retries");
/// assert_eq!(retry.delay_for(2), Duration::from_millis(4000));
/// ```
///
/// # Example: REST call with timeout
///
/// ```rust,no_run
/// use resilience::{presets, timeout::with_timeout_result};
///
/// #[tokio::main]
/// async fn main() {
///     let config = presets::rest_config();
///
///     let result = with_timeout_result(
///         config.timeout.duration,
///         async {
///             // Your HTTP request
///             Ok::<_, String>(())
///         }
///     ).await;
/// }
/// ```

pub mod presets;
pub mod retry;
pub mod timeout;

// Re-export main types for convenience
pub use presets::{event_socket_config, hub_config, rest_config, ServiceConfig};
pub use retry::{with_backoff, AttemptCounter, RetryConfig, RetryError};
pub use timeout::{with_timeout, with_timeout_result, TimeoutConfig, TimeoutError};
