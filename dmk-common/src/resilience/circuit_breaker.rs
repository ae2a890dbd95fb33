//! Three-state circuit breaker
//!
//! State progression:
//!
//! ```text
//! Closed --(failure_threshold consecutive failures)--> Open
//! Open   --(reset_timeout elapsed since last failure)--> HalfOpen
//! HalfOpen --(success)--> Closed
//! HalfOpen --(failure)--> Open
//! ```
//!
//! All state lives behind a mutex owned by the breaker. The lock is held only while a
//! decision is made, never across the wrapped operation, so concurrent callers observe one
//! consistent transition sequence.

use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::events::{DmkEvent, EventBus};

/// Circuit breaker tuning
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Cooldown after the last failure before a trial call is let through
    pub reset_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only copy of the breaker's state
#[derive(Debug, Clone, Copy)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_instant: Option<Instant>,
}

/// Failure returned by [`CircuitBreaker::execute`]
#[derive(Debug)]
pub enum BreakerError<E> {
    /// Circuit is open; the operation was not invoked
    TemporarilyUnavailable { retry_after: Duration },
    /// The operation ran and failed
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::TemporarilyUnavailable { retry_after } => {
                write!(f, "Temporarily unavailable (circuit open), retry after {:?}", retry_after)
            }
            BreakerError::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for BreakerError<E> {}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    /// Start of the HalfOpen trial call, while one is running
    trial_started: Option<Instant>,
}

/// Failure-isolating wrapper around any fallible async operation
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    inner: Mutex<BreakerInner>,
    event_bus: Option<EventBus>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                trial_started: None,
            }),
            event_bus: None,
        }
    }

    /// Publish state transitions on `bus`
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Current state (read-only)
    pub async fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock().await;
        CircuitSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_failure_instant: inner.last_failure,
        }
    }

    /// Invoke `operation` unless the circuit is open
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        if let Err(retry_after) = self.admit().await {
            return Err(BreakerError::TemporarilyUnavailable { retry_after });
        }

        let result = operation().await;
        match &result {
            Ok(_) => self.record_success().await,
            Err(_) => self.record_failure().await,
        }

        result.map_err(BreakerError::Inner)
    }

    /// Err carries the remaining cooldown
    ///
    /// Only one trial call runs while HalfOpen. A trial that never reports back (its future
    /// was dropped) stops blocking others after `reset_timeout`.
    async fn admit(&self) -> Result<(), Duration> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => match inner.trial_started.map(|t| t.elapsed()) {
                Some(elapsed) if elapsed <= self.config.reset_timeout => {
                    Err(self.config.reset_timeout - elapsed)
                }
                _ => {
                    inner.trial_started = Some(Instant::now());
                    Ok(())
                }
            },
            CircuitState::Open => {
                let since_failure = inner.last_failure.map(|t| t.elapsed());
                match since_failure {
                    Some(elapsed) if elapsed <= self.config.reset_timeout => {
                        Err(self.config.reset_timeout - elapsed)
                    }
                    _ => {
                        self.transition(&mut inner, CircuitState::HalfOpen);
                        inner.trial_started = Some(Instant::now());
                        Ok(())
                    }
                }
            }
        }
    }

    async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.trial_started = None;
        inner.consecutive_failures = 0;
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        }
    }

    async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.trial_started = None;
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        if inner.state != CircuitState::Open
            && inner.consecutive_failures >= self.config.failure_threshold
        {
            self.transition(&mut inner, CircuitState::Open);
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;

        if to == CircuitState::Open {
            tracing::warn!(
                breaker = %self.name,
                from = %from,
                to = %to,
                consecutive_failures = inner.consecutive_failures,
                reset_timeout_ms = self.config.reset_timeout.as_millis(),
                "Circuit breaker opened"
            );
        } else {
            tracing::info!(
                breaker = %self.name,
                from = %from,
                to = %to,
                "Circuit breaker state change"
            );
        }

        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(DmkEvent::CircuitStateChanged {
                name: self.name.clone(),
                from: from.to_string(),
                to: to.to_string(),
                timestamp: chrono::Utc::now(),
            });
        }
    }
}
