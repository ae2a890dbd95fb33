//! Retry executor with exponential backoff
//!
//! **Algorithm:**
//! 1. Attempt operation
//! 2. If successful, return result
//! 3. If failed and attempts remain: report, sleep for the current delay, retry
//! 4. If failed and no attempts remain: report, return the last error
//!
//! **Backoff Strategy:**
//! - First delay: `base_delay`
//! - Each later delay: previous delay × `backoff_multiplier`
//! - Every delay capped at `max_delay`
//!
//! The executor only paces *between* attempts. Bounding a single attempt's duration is the
//! caller's job (wrap the operation in `tokio::time::timeout`).

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::events::{DmkEvent, EventBus};

/// Retry pacing configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (0 is treated as 1)
    pub max_attempts: u32,
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor applied after every failed attempt
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay that follows `delay` after one more failure
    pub fn next_delay(&self, delay: Duration) -> Duration {
        let max_secs = self.max_delay.as_secs_f64();
        let next = delay.as_secs_f64() * self.backoff_multiplier;
        if !next.is_finite() || next < 0.0 {
            return self.max_delay;
        }
        Duration::from_secs_f64(next.min(max_secs))
    }

    /// Delay slept after the `failure`-th failed attempt (1-based)
    pub fn delay_after_failure(&self, failure: u32) -> Duration {
        let mut delay = self.base_delay.min(self.max_delay);
        for _ in 1..failure {
            delay = self.next_delay(delay);
        }
        delay
    }

    fn effective_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// How a single attempt ended
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// Operation returned a value
    Succeeded,
    /// Operation failed, another attempt follows after `delay`
    Retrying { error: String, delay: Duration },
    /// Operation failed on the last permitted attempt
    GaveUp { error: String },
    /// Operation failed with an error the caller marked as not retryable
    Rejected { error: String },
}

impl AttemptOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Succeeded => "succeeded",
            AttemptOutcome::Retrying { .. } => "retrying",
            AttemptOutcome::GaveUp { .. } => "gave_up",
            AttemptOutcome::Rejected { .. } => "rejected",
        }
    }
}

/// Report delivered to a [`RetryObserver`] after every attempt
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub operation: String,
    /// 1-based attempt number
    pub attempt: u32,
    pub max_attempts: u32,
    /// Time since the first attempt started
    pub elapsed: Duration,
    pub outcome: AttemptOutcome,
}

/// Sink for per-attempt reports
pub trait RetryObserver: Send + Sync {
    fn on_attempt(&self, report: &AttemptReport);
}

/// Logs attempts through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRetryObserver;

impl RetryObserver for TracingRetryObserver {
    fn on_attempt(&self, report: &AttemptReport) {
        let elapsed_ms = report.elapsed.as_millis();
        match &report.outcome {
            AttemptOutcome::Succeeded => {
                if report.attempt > 1 {
                    tracing::debug!(
                        operation = %report.operation,
                        attempt = report.attempt,
                        elapsed_ms,
                        "Operation succeeded after retry"
                    );
                }
            }
            AttemptOutcome::Retrying { error, delay } => {
                tracing::warn!(
                    operation = %report.operation,
                    attempt = report.attempt,
                    max_attempts = report.max_attempts,
                    backoff_ms = delay.as_millis(),
                    error = %error,
                    "Operation failed, will retry after backoff"
                );
            }
            AttemptOutcome::GaveUp { error } => {
                tracing::error!(
                    operation = %report.operation,
                    attempt = report.attempt,
                    elapsed_ms,
                    error = %error,
                    "Operation failed: retry attempts exhausted"
                );
            }
            AttemptOutcome::Rejected { error } => {
                tracing::debug!(
                    operation = %report.operation,
                    attempt = report.attempt,
                    error = %error,
                    "Operation failed with non-retryable error"
                );
            }
        }
    }
}

/// Publishes attempts on the event bus as [`DmkEvent::RetryAttempt`]
#[derive(Debug, Clone)]
pub struct EventBusRetryObserver {
    bus: EventBus,
}

impl EventBusRetryObserver {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

impl RetryObserver for EventBusRetryObserver {
    fn on_attempt(&self, report: &AttemptReport) {
        let delay_ms = match &report.outcome {
            AttemptOutcome::Retrying { delay, .. } => Some(delay.as_millis() as u64),
            _ => None,
        };
        self.bus.emit_lossy(DmkEvent::RetryAttempt {
            operation: report.operation.clone(),
            attempt: report.attempt,
            max_attempts: report.max_attempts,
            outcome: report.outcome.label().to_string(),
            delay_ms,
            timestamp: chrono::Utc::now(),
        });
    }
}

/// Fans a report out to several observers
pub struct CompositeRetryObserver {
    observers: Vec<Arc<dyn RetryObserver>>,
}

impl CompositeRetryObserver {
    pub fn new(observers: Vec<Arc<dyn RetryObserver>>) -> Self {
        Self { observers }
    }
}

impl RetryObserver for CompositeRetryObserver {
    fn on_attempt(&self, report: &AttemptReport) {
        for observer in &self.observers {
            observer.on_attempt(report);
        }
    }
}

/// Failure returned by [`RetryExecutor`]
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every permitted attempt failed; carries the last failure
    Exhausted { attempts: u32, last_error: E },
    /// The failure was marked not retryable
    Rejected { attempt: u32, error: E },
    /// The cancellation token fired before the next attempt
    Cancelled { attempts: u32 },
}

impl<E> RetryError<E> {
    /// The underlying failure, if any
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Exhausted { last_error, .. } => Some(last_error),
            RetryError::Rejected { error, .. } => Some(error),
            RetryError::Cancelled { .. } => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted { attempts, last_error } => {
                write!(f, "All {} attempts exhausted. Last error: {}", attempts, last_error)
            }
            RetryError::Rejected { attempt, error } => {
                write!(f, "Attempt {} failed (not retryable): {}", attempt, error)
            }
            RetryError::Cancelled { attempts } => {
                write!(f, "Cancelled after {} attempt(s)", attempts)
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

/// Runs a fallible async operation under a [`RetryPolicy`]
#[derive(Clone)]
pub struct RetryExecutor {
    name: String,
    policy: RetryPolicy,
    observer: Arc<dyn RetryObserver>,
    cancel: CancellationToken,
}

impl RetryExecutor {
    /// Create an executor that logs through `tracing` and is never cancelled
    pub fn new(name: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            observer: Arc::new(TracingRetryObserver),
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the attempt observer
    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Abort remaining attempts when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Retry every failure
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.execute_when(operation, |_| true).await
    }

    /// Retry only failures for which `is_retryable` returns true
    pub async fn execute_when<F, Fut, T, E, P>(
        &self,
        mut operation: F,
        is_retryable: P,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: fmt::Display,
        P: Fn(&E) -> bool,
    {
        let start_time = Instant::now();
        let max_attempts = self.policy.effective_attempts();
        let mut delay = self.policy.base_delay.min(self.policy.max_delay);
        let mut attempt = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(RetryError::Cancelled { attempts: attempt });
            }

            attempt += 1;

            match operation().await {
                Ok(value) => {
                    self.report(attempt, max_attempts, start_time, AttemptOutcome::Succeeded);
                    return Ok(value);
                }
                Err(err) => {
                    if !is_retryable(&err) {
                        self.report(
                            attempt,
                            max_attempts,
                            start_time,
                            AttemptOutcome::Rejected { error: err.to_string() },
                        );
                        return Err(RetryError::Rejected { attempt, error: err });
                    }

                    if attempt >= max_attempts {
                        self.report(
                            attempt,
                            max_attempts,
                            start_time,
                            AttemptOutcome::GaveUp { error: err.to_string() },
                        );
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            last_error: err,
                        });
                    }

                    self.report(
                        attempt,
                        max_attempts,
                        start_time,
                        AttemptOutcome::Retrying {
                            error: err.to_string(),
                            delay,
                        },
                    );

                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            tracing::debug!(
                                operation = %self.name,
                                attempt,
                                "Retry cancelled during backoff"
                            );
                            return Err(RetryError::Cancelled { attempts: attempt });
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }

                    delay = self.policy.next_delay(delay);
                }
            }
        }
    }

    fn report(&self, attempt: u32, max_attempts: u32, start_time: Instant, outcome: AttemptOutcome) {
        self.observer.on_attempt(&AttemptReport {
            operation: self.name.clone(),
            attempt,
            max_attempts,
            elapsed: start_time.elapsed(),
            outcome,
        });
    }
}
