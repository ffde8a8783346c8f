/// Retry policy with capped exponential backoff
///
/// The delay before retry `n` (zero based) is `min(initial_backoff * multiplier^n, max_backoff)`.
/// The same formula drives the hub's built-in automatic reconnect and the
/// connection manager's fallback reconnect timer.
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Add random jitter to backoff (±30%)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Delay to wait before retry number `attempt` (0 for the first retry).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(self.max_backoff.as_millis() as f64)
        } else {
            self.max_backoff.as_millis() as f64
        };

        apply_jitter(Duration::from_millis(capped as u64), self.jitter)
    }

    /// Whether another retry is permitted after `attempts` retries already happened.
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_retries
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("Gave up after {attempts} attempts")]
    Exhausted { attempts: u32, last_error: Option<E> },
}

impl<E> RetryError<E> {
    pub fn into_last_error(self) -> Option<E> {
        match self {
            RetryError::Exhausted { last_error, .. } => last_error,
        }
    }
}

/// Run `f` up to `max_retries` times, sleeping `delay_for(n)` before attempt `n`.
///
/// Used after something already failed (a dropped connection), so even the
/// first attempt waits. `on_attempt(attempt, delay)` is called before each
/// sleep with a one-based attempt number.
pub async fn with_backoff<F, Fut, T, E, N>(
    config: &RetryConfig,
    mut f: F,
    mut on_attempt: N,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    N: FnMut(u32, Duration),
{
    let mut last_error = None;

    for attempt in 0..config.max_retries {
        let delay = config.delay_for(attempt);
        on_attempt(attempt + 1, delay);
        tokio::time::sleep(delay).await;

        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                warn!(
                    "Retry attempt {}/{} failed: {}",
                    attempt + 1,
                    config.max_retries,
                    e
                );
                last_error = Some(e);
            }
        }
    }

    warn!("Max retries ({}) reached", config.max_retries);
    Err(RetryError::Exhausted {
        attempts: config.max_retries,
        last_error,
    })
}

fn apply_jitter(base: Duration, jitter: bool) -> Duration {
    if jitter {
        let mut rng = rand::thread_rng();
        let jitter_factor = 1.0 + rng.gen_range(-0.3..0.3); // ±30%
        Duration::from_millis((base.as_millis() as f64 * jitter_factor) as u64)
    } else {
        base
    }
}

/// Reconnect attempt counter.
///
/// Incremented once per scheduled retry, reset to zero on every successful connect.
#[derive(Debug, Default)]
pub struct AttemptCounter {
    attempts: AtomicU32,
}

impl AttemptCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Record one more attempt and return the new count.
    pub fn increment(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn reset(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }
}
