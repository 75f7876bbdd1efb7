//! Exponential-backoff retry for reaching a ComfyUI server.
//!
//! [`retry_with_backoff`] keeps calling an attempt with increasing delays
//! until it succeeds or the [`CancellationToken`] fires.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Give up after this many attempts; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

/// Calculate the next backoff delay, clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Run `attempt` until it succeeds.
///
/// Returns `Ok(value)` on success, `Err(last_error)` once
/// `max_attempts` is exhausted, and `Err(TransportError::Interrupted)`
/// if `cancel` fires first.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &ReconnectConfig,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut delay = config.initial_delay;
    let mut count = 0u32;

    loop {
        count += 1;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Reconnect cancelled");
                return Err(TransportError::Interrupted);
            }
            result = attempt() => result,
        };

        match result {
            Ok(value) => {
                if count > 1 {
                    tracing::info!(attempt = count, "Reconnected to ComfyUI");
                }
                return Ok(value);
            }
            Err(e) => {
                if config.max_attempts.is_some_and(|max| count >= max) {
                    tracing::warn!(attempt = count, error = %e, "Giving up on ComfyUI");
                    return Err(e);
                }
                tracing::warn!(
                    attempt = count,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Connection attempt failed, retrying",
                );
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Interrupted),
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, config);
    }
}
