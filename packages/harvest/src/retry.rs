//! Adaptive retry policy shared by every remote call site.
//!
//! The decision of whether, when and with what limit to retry is a pure
//! function over [`RetryState`] and [`Failure`]; [`AdaptiveRetryPolicy::run`]
//! only executes those decisions. Load-related failures (timeouts, server
//! errors) shrink the requested limit and back off exponentially. Network
//! failures back off by a fixed amount with the limit untouched. Client
//! errors are never retried.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{CallResult, Failure, HarvestError, Result};
use crate::traits::sleeper::{sleep_or_cancel, Sleeper, TokioSleeper};
use crate::types::config::RetryConfig;

/// Where a call site is in its retry cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPhase {
    Ready,
    Waiting,
    Succeeded,
    Exhausted,
}

/// Per-call counters. Owned by one call site, never shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts made so far, 1-based once the first call was issued
    pub attempt: u32,
    pub max_attempts: u32,
    pub current_limit: usize,
    /// Wait before the next attempt
    pub wait: Duration,
    pub phase: RetryPhase,
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Retry { wait: Duration, limit: usize },
    /// Attempts used up; the unit of work yields no result
    GiveUp,
    /// Retrying cannot help
    Propagate,
}

/// Terminal result of a retried call that was not rejected.
#[derive(Debug, Clone)]
pub enum RetryOutcome<T> {
    Succeeded {
        value: T,
        /// Limit the successful attempt used
        limit: usize,
        attempts: u32,
    },
    Exhausted {
        attempts: u32,
        last_failure: Failure,
    },
}

impl<T> RetryOutcome<T> {
    pub fn value(self) -> Option<T> {
        match self {
            RetryOutcome::Succeeded { value, .. } => Some(value),
            RetryOutcome::Exhausted { .. } => None,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts, .. } | RetryOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }
}

#[derive(Clone)]
pub struct AdaptiveRetryPolicy {
    config: RetryConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl AdaptiveRetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Use a custom sleeper (tests record instead of waiting).
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Fresh state before the first attempt.
    pub fn start(&self, initial_limit: usize) -> RetryState {
        RetryState {
            attempt: 0,
            max_attempts: self.config.max_attempts.max(1),
            current_limit: initial_limit,
            wait: Duration::ZERO,
            phase: RetryPhase::Ready,
        }
    }

    /// Decide over a failure of attempt `state.attempt`.
    pub fn decide(&self, state: &RetryState, failure: &Failure) -> Decision {
        if matches!(failure, Failure::ClientError(_)) {
            return Decision::Propagate;
        }
        if state.attempt >= state.max_attempts {
            return Decision::GiveUp;
        }

        if failure.is_load_related() {
            Decision::Retry {
                wait: backoff(self.config.base_wait, state.attempt),
                limit: self.shrink(state.current_limit),
            }
        } else {
            Decision::Retry {
                wait: self.config.network_wait,
                limit: state.current_limit,
            }
        }
    }

    /// Divide the limit, floored at the minimum; never grows it.
    fn shrink(&self, limit: usize) -> usize {
        let shrunk = limit / self.config.shrink_factor.max(1);
        shrunk.max(self.config.min_limit).min(limit)
    }

    /// Run `op` until it succeeds, gives up, or is rejected.
    ///
    /// `op` receives the limit to request. Returns
    /// `Err(HarvestError::Rejected)` on a client error and
    /// `Err(HarvestError::Interrupted)` once `cancel` fires, which is checked
    /// before each attempt, during the call and during every backoff.
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        initial_limit: usize,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<RetryOutcome<T>>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = CallResult<T>>,
    {
        let mut state = self.start(initial_limit);

        loop {
            if cancel.is_cancelled() {
                return Err(HarvestError::Interrupted);
            }

            state.attempt += 1;
            state.phase = RetryPhase::Ready;

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(HarvestError::Interrupted),
                res = op(state.current_limit) => res,
            };

            let failure = match result {
                Ok(value) => {
                    state.phase = RetryPhase::Succeeded;
                    if state.attempt > 1 {
                        tracing::info!(
                            label,
                            attempt = state.attempt,
                            limit = state.current_limit,
                            "Recovered after retry"
                        );
                    }
                    return Ok(RetryOutcome::Succeeded {
                        value,
                        limit: state.current_limit,
                        attempts: state.attempt,
                    });
                }
                Err(failure) => failure,
            };

            match self.decide(&state, &failure) {
                Decision::Propagate => {
                    tracing::warn!(label, error = %failure, "Request rejected, not retrying");
                    return Err(HarvestError::Rejected(failure));
                }
                Decision::GiveUp => {
                    state.phase = RetryPhase::Exhausted;
                    tracing::warn!(
                        label,
                        attempts = state.attempt,
                        error = %failure,
                        "Giving up after exhausting retries"
                    );
                    return Ok(RetryOutcome::Exhausted {
                        attempts: state.attempt,
                        last_failure: failure,
                    });
                }
                Decision::Retry { wait, limit } => {
                    tracing::warn!(
                        label,
                        attempt = state.attempt,
                        max_attempts = state.max_attempts,
                        kind = failure.kind(),
                        limit,
                        wait_secs = wait.as_secs_f64(),
                        "Call failed, retrying"
                    );
                    state.phase = RetryPhase::Waiting;
                    state.wait = wait;
                    state.current_limit = limit;
                    sleep_or_cancel(self.sleeper.as_ref(), wait, cancel).await?;
                }
            }
        }
    }
}

/// `base * 2^(attempt-1)`, saturating.
pub fn backoff(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSleeper;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(config: RetryConfig) -> (AdaptiveRetryPolicy, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::new());
        let policy = AdaptiveRetryPolicy::new(config).with_sleeper(sleeper.clone());
        (policy, sleeper)
    }

    #[test]
    fn test_backoff_series() {
        let base = Duration::from_secs(5);
        assert_eq!(backoff(base, 1), Duration::from_secs(5));
        assert_eq!(backoff(base, 2), Duration::from_secs(10));
        assert_eq!(backoff(base, 4), Duration::from_secs(40));
    }

    #[test]
    fn test_decide_shrinks_to_floor() {
        let (policy, _) = policy(RetryConfig::primary());
        let mut state = policy.start(5);
        state.attempt = 1;

        let decision = policy.decide(&state, &Failure::Timeout("t".into()));
        assert_eq!(
            decision,
            Decision::Retry {
                wait: Duration::from_secs(5),
                limit: 3
            }
        );

        // Already below the floor: never grows
        state.current_limit = 2;
        let decision = policy.decide(&state, &Failure::ServerError("s".into()));
        assert!(matches!(decision, Decision::Retry { limit: 2, .. }));
    }

    #[test]
    fn test_decide_gives_up_at_max() {
        let (policy, _) = policy(RetryConfig::detail());
        let mut state = policy.start(100);
        state.attempt = 3;
        assert_eq!(
            policy.decide(&state, &Failure::Timeout("t".into())),
            Decision::GiveUp
        );
        assert_eq!(
            policy.decide(&state, &Failure::ClientError("c".into())),
            Decision::Propagate
        );
    }

    #[tokio::test]
    async fn test_shrink_converges_with_exponential_waits() {
        let (policy, sleeper) = policy(RetryConfig::primary());
        let threshold = 10;
        let initial = 100;
        let calls = AtomicU32::new(0);

        let outcome = policy
            .run("branch:all", initial, &CancellationToken::new(), |limit| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if limit < threshold {
                        Ok(limit)
                    } else {
                        Err(Failure::Timeout(format!("limit {}", limit)))
                    }
                }
            })
            .await
            .unwrap();

        // 100 -> 50 -> 25 -> 12 -> 6
        let bound = ((initial as f64) / (threshold as f64)).log2().ceil() as u32 + 1;
        match outcome {
            RetryOutcome::Succeeded {
                value,
                limit,
                attempts,
            } => {
                assert_eq!(value, 6);
                assert_eq!(limit, 6);
                assert!(attempts <= bound, "{} attempts > bound {}", attempts, bound);
                assert_eq!(attempts, calls.load(Ordering::SeqCst));

                let k = attempts - 1;
                let expected = Duration::from_secs(5) * (2u32.pow(k) - 1);
                assert_eq!(sleeper.total(), expected);
                assert_eq!(sleeper.sleeps().len(), k as usize);
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let (policy, sleeper) = policy(RetryConfig::primary());
        let calls = AtomicU32::new(0);

        let result: Result<RetryOutcome<()>> = policy
            .run("branch:all", 10, &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Failure::ClientError("400 bad query".into())) }
            })
            .await;

        assert!(matches!(
            result,
            Err(HarvestError::Rejected(Failure::ClientError(_)))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_network_errors_keep_limit_and_fixed_wait() {
        let config = RetryConfig::primary().with_network_wait(Duration::from_secs(7));
        let (policy, sleeper) = policy(config);
        let limits = std::sync::Mutex::new(Vec::new());

        let outcome: RetryOutcome<()> = policy
            .run("detail:locations", 40, &CancellationToken::new(), |limit| {
                limits.lock().unwrap().push(limit);
                async { Err(Failure::NetworkError("reset".into())) }
            })
            .await
            .unwrap();

        assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 5, .. }));
        assert_eq!(*limits.lock().unwrap(), vec![40; 5]);
        assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(7); 4]);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let (policy, _) = policy(RetryConfig::primary());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<RetryOutcome<()>> = policy
            .run("branch:all", 10, &cancel, |_| async { Ok(()) })
            .await;

        assert!(matches!(result, Err(HarvestError::Interrupted)));
    }
}
