use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, warn};

pub mod policies;

pub use policies::{Backoff, ExponentialBackoff};

/// Runs a fallible async operation with a backoff retry.
///
/// Retries `operation` up to `max_retries` times with delays computed by the
/// provided [`Backoff`].  Logs a warning on each failure and an error when
/// all retries are exhausted.
pub async fn retry_with_backoff<R, E, F, Fut>(
    name: &str,
    max_retries: u16,
    backoff: &impl Backoff,
    mut operation: F,
) -> Result<R, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<R, E>>,
    E: std::fmt::Debug,
{
    let mut delay = backoff.base_delay_ms();

    for attempt in 0..=max_retries {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_retries => {
                warn!(
                    "Attempt {} failed with {:?} while running {}. Retrying in {:?}",
                    attempt + 1,
                    err,
                    name,
                    Duration::from_millis(delay)
                );
                sleep(Duration::from_millis(delay)).await;
                delay = backoff.next_delay_ms(delay);
            }
            Err(err) => {
                error!("All {} attempts exhausted running {}", max_retries + 1, name);
                return Err(err);
            }
        }
    }
    unreachable!("retry: loop always returns")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let backoff = ExponentialBackoff::new(1, 2, 1);
        let res: Result<u32, &str> = retry_with_backoff("test-op", 5, &backoff, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err("transient")
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(res, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_retries() {
        let backoff = ExponentialBackoff::new(1, 2, 1);
        let res: Result<(), &str> =
            retry_with_backoff("test-op", 2, &backoff, || async { Err("nope") }).await;
        assert_eq!(res, Err("nope"));
    }
}
