//! Retry policy and the decorator that applies it to a step.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use domain::PaymentDetails;

use crate::error::SagaError;
use crate::failure::{FailureKind, StepFailure, StepKind, StepResult};
use crate::steps::TransferStep;

/// How a failing step is retried.
///
/// The default calibration is 1s initial interval, coefficient 2.0, 100s
/// cap, unlimited attempts, with the business failures (invalid account,
/// insufficient funds, rejected request) never retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    initial_interval: Duration,
    backoff_coefficient: f64,
    maximum_interval: Duration,
    /// 0 means unlimited.
    maximum_attempts: u32,
    non_retryable: BTreeSet<FailureKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(100),
            maximum_attempts: 0,
            non_retryable: BTreeSet::from([
                FailureKind::InvalidAccount,
                FailureKind::InsufficientFunds,
                FailureKind::Rejected,
            ]),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    pub fn maximum_interval(mut self, interval: Duration) -> Self {
        self.maximum_interval = interval;
        self
    }

    /// Sets the attempt budget, first attempt included. 0 means unlimited.
    pub fn maximum_attempts(mut self, attempts: u32) -> Self {
        self.maximum_attempts = attempts;
        self
    }

    /// Marks an additional failure kind as non-retryable.
    ///
    /// The business failures are always non-retryable; this can only widen
    /// the set.
    pub fn with_non_retryable(mut self, kind: FailureKind) -> Self {
        self.non_retryable.insert(kind);
        self
    }

    pub fn attempt_budget(&self) -> Option<u32> {
        (self.maximum_attempts > 0).then_some(self.maximum_attempts)
    }

    pub fn non_retryable_kinds(&self) -> impl Iterator<Item = FailureKind> + '_ {
        self.non_retryable.iter().copied()
    }

    pub fn validate(&self) -> Result<(), SagaError> {
        if self.initial_interval.is_zero() {
            return Err(SagaError::InvalidRetryPolicy(
                "initial interval must be greater than zero".to_string(),
            ));
        }
        if !(self.backoff_coefficient >= 1.0) {
            return Err(SagaError::InvalidRetryPolicy(format!(
                "backoff coefficient must be at least 1.0, got {}",
                self.backoff_coefficient
            )));
        }
        if self.maximum_interval < self.initial_interval {
            return Err(SagaError::InvalidRetryPolicy(
                "maximum interval must not be shorter than the initial interval".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_retryable(&self, kind: FailureKind) -> bool {
        !self.non_retryable.contains(&kind)
    }

    /// Decides whether another attempt follows a failure of `kind` after
    /// `attempts_made` attempts.
    pub fn should_retry(&self, kind: FailureKind, attempts_made: u32) -> bool {
        self.is_retryable(kind)
            && (self.maximum_attempts == 0 || attempts_made < self.maximum_attempts)
    }

    /// Delay before the `retry`-th retry (1-based).
    pub fn interval_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        // Anything Duration cannot hold is past the cap.
        Duration::try_from_secs_f64(secs)
            .map_or(self.maximum_interval, |interval| interval.min(self.maximum_interval))
    }

    /// The sequence of delays between attempts, starting from the first retry.
    ///
    /// Finite only when the attempt budget is.
    #[cfg(test)]
    pub fn intervals(&self) -> impl Iterator<Item = Duration> + '_ {
        let retries = match self.maximum_attempts {
            0 => u32::MAX,
            n => n - 1,
        };
        (1..=retries).map(|retry| self.interval_for_retry(retry))
    }
}

/// Options attached to every step execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityOptions {
    /// Upper bound on a single attempt. Exceeding it counts as a retryable
    /// `Timeout` failure.
    pub start_to_close_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            start_to_close_timeout: Duration::from_secs(60),
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Terminal result of a step after retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub step: StepKind,
    pub result: StepResult,
    pub attempts: u32,
}

/// Wraps a step with a retry policy and per-attempt timeout.
///
/// Each `Retrying` run keeps its own attempt counter; nothing is shared
/// between executions.
pub struct Retrying<S> {
    step: S,
    options: ActivityOptions,
}

impl<S: TransferStep> Retrying<S> {
    /// Fails with [`SagaError::InvalidRetryPolicy`] unless the policy validates.
    pub fn new(step: S, options: ActivityOptions) -> Result<Self, SagaError> {
        options.retry_policy.validate()?;
        Ok(Self { step, options })
    }

    /// Runs the step until it succeeds, fails with a non-retryable kind, or
    /// exhausts its attempt budget.
    pub async fn run(&self, details: &PaymentDetails) -> StepReport {
        let step = self.step.kind();
        let policy = &self.options.retry_policy;
        let timeout = self.options.start_to_close_timeout;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            metrics::counter!("step_attempts_total", "step" => step.as_str()).increment(1);

            let result = match tokio::time::timeout(timeout, self.step.execute(details)).await {
                Ok(result) => result,
                Err(_) => Err(StepFailure::timeout(timeout)),
            };

            let failure = match result {
                Ok(transaction_id) => {
                    tracing::debug!(%step, attempt, %transaction_id, "step succeeded");
                    return StepReport {
                        step,
                        result: Ok(transaction_id),
                        attempts: attempt,
                    };
                }
                Err(failure) => failure,
            };

            if !policy.should_retry(failure.kind, attempt) {
                if policy.is_retryable(failure.kind) {
                    tracing::warn!(%step, attempt, error = %failure, "retry budget exhausted");
                } else {
                    tracing::info!(%step, attempt, error = %failure, "non-retryable failure");
                }
                return StepReport {
                    step,
                    result: Err(failure),
                    attempts: attempt,
                };
            }

            let delay = policy.interval_for_retry(attempt);
            tracing::warn!(
                %step,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "step attempt failed, retrying"
            );
            metrics::counter!("step_retries_total", "step" => step.as_str()).increment(1);
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl<S: TransferStep> TransferStep for Retrying<S> {
    fn kind(&self) -> StepKind {
        self.step.kind()
    }

    async fn execute(&self, details: &PaymentDetails) -> StepResult {
        self.run(details).await.result
    }
}
