use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Bounded retry with linear backoff: the delay after failed attempt `n`
/// (zero-based) is `base + step * n`.
///
/// # Examples
///
/// ```
/// use metrika_common::retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::standard();
/// assert_eq!(policy.attempts, 3);
/// assert_eq!(policy.delay(0), Duration::from_secs(1));
/// assert_eq!(policy.delay(1), Duration::from_secs(3));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base: Duration,
    pub step: Duration,
}

impl RetryPolicy {
    /// Three attempts, sleeping 1s then 3s between them.
    pub const fn standard() -> Self {
        Self {
            attempts: 3,
            base: Duration::from_secs(1),
            step: Duration::from_secs(2),
        }
    }

    /// Same attempt count with no sleeping, for tests.
    pub const fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            base: Duration::ZERO,
            step: Duration::ZERO,
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.base + self.step * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// Runs `op` until it succeeds, `should_retry` rejects the error, or the
/// policy's attempts are used up. The last error is returned.
pub async fn retry_if<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= policy.attempts || !should_retry(&e) {
                    return Err(e);
                }
                let delay = policy.delay(attempt - 1);
                tracing::warn!(
                    op = what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// [`retry_if`] that retries every error.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, what: &str, op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_if(policy, what, op, |_| true).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<u32, String> = retry(&RetryPolicy::immediate(3), "test", move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(format!("fail {n}"))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result, Ok(3));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_last_attempt() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), String> = retry(&RetryPolicy::immediate(3), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("down".to_string())
        })
        .await;
        assert_eq!(result, Err("down".to_string()));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_fails_fast() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), String> = retry_if(
            &RetryPolicy::immediate(3),
            "test",
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("syntax error".to_string())
            },
            |e| e.contains("connection"),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn standard_backoff_is_linear() {
        let policy = RetryPolicy::standard();
        let delays: Vec<u64> = (0..3).map(|n| policy.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 3, 5]);
    }
}
