use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::debug;

use crate::config::RetrySection;

/// Single retry/backoff policy consumed by the login orchestrator and the
/// feature operations. Attempt budgets and schedules live in config, not
/// scattered through call sites.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    schedule: Vec<Duration>,
    jitter_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub result: T,
    pub attempts: usize,
}

impl RetryPolicy {
    pub fn new(config: RetrySection) -> Self {
        let mut schedule = config
            .backoff_schedule_ms
            .into_iter()
            .map(Duration::from_millis)
            .collect::<Vec<_>>();
        if schedule.is_empty() {
            schedule.push(Duration::from_millis(500));
            schedule.push(Duration::from_millis(2000));
        }
        Self {
            max_attempts: config.max_attempts.max(1),
            schedule,
            jitter_ms: config.jitter_ms,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            Duration::ZERO
        } else {
            self.schedule
                .get(attempt - 1)
                .cloned()
                .unwrap_or_else(|| *self.schedule.last().unwrap())
        }
    }

    /// Runs `operation` until it succeeds or the attempt budget is spent. The
    /// closure receives the zero-based attempt index so callers can harden
    /// later attempts (e.g. forcing a page-state reset).
    pub async fn run<F, Fut, T, E>(&self, label: &str, operation: F) -> Result<RetryOutcome<T>, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.run_filtered(label, |_| true, operation).await
    }

    /// Like `run`, but only errors accepted by `is_retryable` consume further
    /// attempts; anything else surfaces immediately.
    pub async fn run_filtered<F, Fut, T, E, P>(
        &self,
        label: &str,
        is_retryable: P,
        mut operation: F,
    ) -> Result<RetryOutcome<T>, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0usize;
        loop {
            match operation(attempt).await {
                Ok(result) => {
                    return Ok(RetryOutcome {
                        result,
                        attempts: attempt + 1,
                    });
                }
                Err(error) => {
                    if !is_retryable(&error) {
                        return Err(error);
                    }
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(error);
                    }
                    let mut delay = self.delay_for_attempt(attempt);
                    if self.jitter_ms > 0 {
                        let jitter = rand::thread_rng().gen_range(0..=self.jitter_ms);
                        delay += Duration::from_millis(jitter);
                    }
                    debug!(
                        label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying after failure"
                    );
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy::new(RetrySection {
            max_attempts,
            backoff_schedule_ms: vec![0],
            jitter_ms: 0,
        })
    }

    #[tokio::test]
    async fn succeeds_after_transient_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_run = Arc::clone(&calls);
        let outcome = policy(3)
            .run("test", move |_| {
                let calls = Arc::clone(&calls_for_run);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err("transient")
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.result, "ok");
    }

    #[tokio::test]
    async fn aborts_after_max_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_run = Arc::clone(&calls);
        let result: Result<RetryOutcome<()>, &str> = policy(2)
            .run("test", move |_| {
                let calls = Arc::clone(&calls_for_run);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("always")
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retryable_errors_surface_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_run = Arc::clone(&calls);
        let result: Result<RetryOutcome<()>, &str> = policy(5)
            .run_filtered(
                "test",
                |err: &&str| *err != "fatal",
                move |_| {
                    let calls = Arc::clone(&calls_for_run);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err("fatal")
                    }
                },
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempt_index_is_passed_through() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_for_run = Arc::clone(&seen);
        let _ = policy(3)
            .run("test", move |attempt| {
                let seen = Arc::clone(&seen_for_run);
                async move {
                    seen.lock().unwrap().push(attempt);
                    Err::<(), _>("always")
                }
            })
            .await;
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }
}
