//! Resilience primitives (retry policy + circuit breaker).
//!
//! Both primitives are generic over any `FnMut() -> Future<Output = Result<T, E>>` and know
//! nothing about what the operation does. [`ResilientExecutor`] composes them: every retry
//! attempt goes through the breaker, and an open breaker ends the retry loop immediately.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{
    BreakerError, CircuitBreaker, CircuitConfig, CircuitSnapshot, CircuitState,
};
pub use retry::{
    AttemptOutcome, AttemptReport, CompositeRetryObserver, EventBusRetryObserver, RetryError,
    RetryExecutor, RetryObserver, RetryPolicy, TracingRetryObserver,
};

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Failure returned by [`ResilientExecutor::execute_when`]
#[derive(Debug)]
pub enum ResilienceError<E> {
    /// Circuit breaker is open; try again later
    TemporarilyUnavailable { retry_after: Duration },
    /// Every attempt failed
    RetryExhausted { attempts: u32, last_error: E },
    /// The operation failed with an error that is not retried
    Failed(E),
    /// Remaining attempts were cancelled
    Cancelled { attempts: u32 },
}

impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResilienceError::TemporarilyUnavailable { retry_after } => {
                write!(f, "Temporarily unavailable, retry after {:?}", retry_after)
            }
            ResilienceError::RetryExhausted { attempts, last_error } => {
                write!(f, "All {} retry attempts exhausted. Last error: {}", attempts, last_error)
            }
            ResilienceError::Failed(e) => write!(f, "{}", e),
            ResilienceError::Cancelled { attempts } => {
                write!(f, "Cancelled after {} attempt(s)", attempts)
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for ResilienceError<E> {}

impl<E> From<RetryError<BreakerError<E>>> for ResilienceError<E> {
    fn from(err: RetryError<BreakerError<E>>) -> Self {
        match err {
            RetryError::Cancelled { attempts } => ResilienceError::Cancelled { attempts },
            RetryError::Exhausted { attempts, last_error } => match last_error {
                BreakerError::TemporarilyUnavailable { retry_after } => {
                    ResilienceError::TemporarilyUnavailable { retry_after }
                }
                BreakerError::Inner(e) => ResilienceError::RetryExhausted {
                    attempts,
                    last_error: e,
                },
            },
            RetryError::Rejected { error, .. } => match error {
                BreakerError::TemporarilyUnavailable { retry_after } => {
                    ResilienceError::TemporarilyUnavailable { retry_after }
                }
                BreakerError::Inner(e) => ResilienceError::Failed(e),
            },
        }
    }
}

/// Retry executor whose attempts pass through a shared circuit breaker
#[derive(Clone)]
pub struct ResilientExecutor {
    retry: RetryExecutor,
    breaker: Arc<CircuitBreaker>,
}

impl ResilientExecutor {
    pub fn new(retry: RetryExecutor, breaker: Arc<CircuitBreaker>) -> Self {
        Self { retry, breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn retry(&self) -> &RetryExecutor {
        &self.retry
    }

    /// Retry every inner failure
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.execute_when(operation, |_| true).await
    }

    /// Retry inner failures accepted by `is_retryable`; an open circuit is never retried
    pub async fn execute_when<F, Fut, T, E, P>(
        &self,
        operation: F,
        is_retryable: P,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: fmt::Display,
        P: Fn(&E) -> bool,
    {
        let breaker: &CircuitBreaker = self.breaker.as_ref();
        // The breaker decides admission before the operation is called
        let operation = Mutex::new(operation);
        let operation = &operation;
        self.retry
            .execute_when(
                move || async move {
                    breaker
                        .execute(|| {
                            let mut op = operation.lock().unwrap_or_else(PoisonError::into_inner);
                            (&mut *op)()
                        })
                        .await
                },
                |err| match err {
                    BreakerError::TemporarilyUnavailable { .. } => false,
                    BreakerError::Inner(inner) => is_retryable(inner),
                },
            )
            .await
            .map_err(ResilienceError::from)
    }
}
