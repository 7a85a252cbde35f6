//! Retry utility with exponential backoff

use std::time::Duration;
use tracing::warn;

/// Retry an async operation with exponential backoff.
///
/// Returns `Ok` on first success. Delays double from `initial_delay` up
/// to `max_delay`. The final attempt's error is returned as-is; earlier
/// failures are logged and retried.
pub async fn retry_with_backoff<F, Fut, T, E>(
    operation: &str,
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = max_attempts.max(1);
    let mut delay = initial_delay;

    for attempt in 1..attempts {
        match f().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                warn!("{} failed (attempt {}/{}): {}", operation, attempt, attempts, e);
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(max_delay);
            }
        }
    }

    // Last attempt; its failure belongs to the caller.
    f().await
}
