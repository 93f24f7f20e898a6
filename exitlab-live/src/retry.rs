//! Timeout-scoped broker calls with bounded exponential backoff.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time;
use tracing::warn;

use crate::broker::BrokerError;
use crate::config::LiveConfig;

/// A broker operation that did not succeed within its retry budget.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{op} failed after {trials} attempt(s): {source}")]
pub struct RetryExhausted {
    pub op: &'static str,
    pub trials: u32,
    #[source]
    pub source: BrokerError,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    timeout: Duration,
    max_trials: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl RetryPolicy {
    pub fn new(
        timeout: Duration,
        max_trials: u32,
        backoff_base: Duration,
        backoff_max: Duration,
    ) -> Self {
        Self {
            timeout,
            max_trials: max_trials.max(1),
            backoff_base,
            backoff_max,
        }
    }

    pub fn from_config(config: &LiveConfig) -> Self {
        Self::new(
            config.broker_timeout(),
            config.broker_max_trials(),
            config.backoff_base(),
            config.backoff_max(),
        )
    }

    /// Same timeout, no retries.
    pub fn single_attempt(&self) -> Self {
        Self {
            max_trials: 1,
            ..*self
        }
    }

    pub fn max_trials(&self) -> u32 {
        self.max_trials
    }

    /// Delay before attempt `trial + 1`: base × 2^(trial-1), capped.
    pub fn backoff(&self, trial: u32) -> Duration {
        let exp = trial.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.backoff_max)
    }

    /// Run `call` until it succeeds, fails permanently, or the budget runs out.
    ///
    /// Each attempt is bounded by the policy timeout; a timed-out future is
    /// dropped before the next attempt starts.
    pub async fn run<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, RetryExhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BrokerError>>,
    {
        let mut trials = 0;
        loop {
            trials += 1;
            let error = match time::timeout(self.timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => BrokerError::Timeout(self.timeout),
            };

            if !error.is_transient() || trials >= self.max_trials {
                return Err(RetryExhausted {
                    op,
                    trials,
                    source: error,
                });
            }

            let delay = self.backoff(trials);
            warn!(op, trials, ?delay, %error, "broker call failed, retrying");
            time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_trials: u32) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(15),
            max_trials,
            Duration::from_millis(500),
            Duration::from_secs(4),
        )
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy(10);
        assert_eq!(p.backoff(1), Duration::from_millis(500));
        assert_eq!(p.backoff(2), Duration::from_secs(1));
        assert_eq!(p.backoff(3), Duration::from_secs(2));
        assert_eq!(p.backoff(5), Duration::from_secs(4));
        assert_eq!(p.backoff(40), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_does_not_retry() {
        let calls = AtomicU32::new(0);
        let err = policy(5)
            .single_attempt()
            .run("open_position", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(BrokerError::Unavailable("busy".into())) }
            })
            .await
            .unwrap_err();
        assert_eq!(err.trials, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let result = policy(3)
            .run("open_positions", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(BrokerError::Unavailable("reset".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_is_bounded() {
        let calls = AtomicU32::new(0);
        let err = policy(3)
            .run("modify_stop", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(BrokerError::Unavailable("down".into())) }
            })
            .await
            .unwrap_err();
        assert_eq!(err.trials, 3);
        assert_eq!(err.op, "modify_stop");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let err = policy(5)
            .run("close_fraction", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(BrokerError::UnknownTicket(7)) }
            })
            .await
            .unwrap_err();
        assert_eq!(err.trials, 1);
        assert_eq!(err.source, BrokerError::UnknownTicket(7));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_call_times_out() {
        let err = policy(2)
            .run("open_positions", || futures::future::pending::<Result<(), BrokerError>>())
            .await
            .unwrap_err();
        assert_eq!(err.trials, 2);
        assert_eq!(err.source, BrokerError::Timeout(Duration::from_secs(15)));
    }
}
