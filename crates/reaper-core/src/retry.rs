use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::backoff::BackoffPolicy;
use crate::classify::ErrorClassifier;
use crate::models::{AttemptOutcome, EnrichmentResult, ExecutionAttempt, ExtractionResult};

/// A single-attempt result the retry loop can inspect.
pub trait AttemptResult {
    /// Error message of a failed attempt, `None` on success.
    fn failure(&self) -> Option<&str>;

    fn set_attempts(&mut self, attempts: Vec<ExecutionAttempt>);
}

impl AttemptResult for ExtractionResult {
    fn failure(&self) -> Option<&str> {
        if self.status.is_success() {
            None
        } else {
            Some(self.error.as_deref().unwrap_or(self.status.as_str()))
        }
    }

    fn set_attempts(&mut self, attempts: Vec<ExecutionAttempt>) {
        self.attempts = attempts;
    }
}

impl AttemptResult for EnrichmentResult {
    fn failure(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn set_attempts(&mut self, attempts: Vec<ExecutionAttempt>) {
        self.attempts = attempts;
    }
}

/// Runs attempts `0..=max_retries`, sleeping per `policy` between them.
///
/// Stops at the first success, at the first failure the classifier calls
/// terminal, or on cancellation. Returns the last attempt's result with the
/// attempt history attached.
pub struct RetryLoop<'a, C: ErrorClassifier> {
    operation: &'static str,
    policy: BackoffPolicy,
    classifier: &'a C,
    max_retries: u32,
    cancel: &'a CancellationToken,
}

impl<'a, C: ErrorClassifier> RetryLoop<'a, C> {
    pub fn new(
        operation: &'static str,
        policy: BackoffPolicy,
        classifier: &'a C,
        max_retries: u32,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            operation,
            policy,
            classifier,
            max_retries,
            cancel,
        }
    }

    pub async fn run<T, F, Fut>(&self, mut attempt_fn: F) -> T
    where
        T: AttemptResult,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = T>,
    {
        let mut history = Vec::new();
        let (mut result, mut outcome) = self
            .attempt(0, Duration::ZERO, &mut attempt_fn, &mut history)
            .await;

        let mut attempt = 0;
        while outcome == AttemptOutcome::RetryableFailure && attempt < self.max_retries {
            attempt += 1;
            let wait = self.policy.delay_for_attempt(attempt);
            tracing::info!(
                operation = self.operation,
                attempt,
                wait_secs = wait.as_secs(),
                "Retrying"
            );

            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                () = self.cancel.cancelled() => {
                    tracing::info!(operation = self.operation, attempt, "Retry loop cancelled");
                    break;
                }
            }

            (result, outcome) = self
                .attempt(attempt, wait, &mut attempt_fn, &mut history)
                .await;
        }

        if outcome == AttemptOutcome::TerminalFailure {
            tracing::info!(
                operation = self.operation,
                error = result.failure().unwrap_or_default(),
                "Not retrying due to error type"
            );
        }

        result.set_attempts(history);
        result
    }

    async fn attempt<T, F, Fut>(
        &self,
        attempt: u32,
        waited: Duration,
        attempt_fn: &mut F,
        history: &mut Vec<ExecutionAttempt>,
    ) -> (T, AttemptOutcome)
    where
        T: AttemptResult,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = T>,
    {
        let started = Instant::now();
        let result = attempt_fn(attempt).await;
        let outcome = match result.failure() {
            None => AttemptOutcome::Success,
            Some(error) if self.classifier.classify(error).should_retry() => {
                AttemptOutcome::RetryableFailure
            }
            Some(_) => AttemptOutcome::TerminalFailure,
        };

        history.push(ExecutionAttempt {
            attempt,
            waited,
            outcome,
            elapsed: started.elapsed(),
        });
        (result, outcome)
    }
}
