use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Bounded retry with exponential backoff and a little jitter so
/// concurrent callers do not hammer a recovering endpoint in lockstep.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u64,
    pub backoff: Duration,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u64, backoff_ms: u64) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            backoff: Duration::from_millis(backoff_ms),
            backoff_multiplier: 2.0,
        }
    }

    pub async fn call<T, E, Fut, F>(&self, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.call_when(op, |_| true).await
    }

    /// Like `call` but only errors the predicate accepts are retried,
    /// anything else returns immediately.
    pub async fn call_when<T, E, Fut, F, P>(&self, mut op: F, retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 1;
        let mut delay = self.backoff;
        loop {
            match op().await {
                Ok(val) => return Ok(val),
                Err(err) => {
                    if attempt >= self.max_attempts || !retryable(&err) {
                        return Err(err);
                    }
                    log::warn!(
                        "Attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt,
                        self.max_attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(jittered(delay)).await;
                    delay = delay.mul_f64(self.backoff_multiplier);
                    attempt += 1;
                }
            }
        }
    }
}

fn jittered(base: Duration) -> Duration {
    let jitter_ms = rand::thread_rng().gen_range(0..base.as_millis() as u64 / 4 + 2);
    base + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let calls = AtomicU64::new(0);
        let policy = RetryPolicy::new(5, 1);
        let res: Result<u64, String> = policy
            .call(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(format!("transient {}", n))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(res.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = AtomicU64::new(0);
        let policy = RetryPolicy::new(2, 1);
        let res: Result<(), String> = policy
            .call(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("down".to_string()) }
            })
            .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let calls = AtomicU64::new(0);
        let policy = RetryPolicy::new(5, 1);
        let res: Result<(), String> = policy
            .call_when(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("rejected".to_string()) }
                },
                |err| !err.contains("rejected"),
            )
            .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
