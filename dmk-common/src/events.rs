//! Event types for the DMK event system
//!
//! Scan progress, per-file outcomes, retry attempts and circuit breaker transitions are
//! broadcast on an [`EventBus`]. Emission never blocks and never fails the emitting
//! operation; subscribers that fall behind lose the oldest events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// DMK event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DmkEvent {
    /// A scan over a file source started
    ScanStarted {
        session_id: String,
        root: String,
        timestamp: DateTime<Utc>,
    },

    /// One document was parsed and analyzed
    FileAnalyzed {
        session_id: String,
        path: String,
        message_count: usize,
        peak_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// One document failed and was skipped
    FileFailed {
        session_id: String,
        path: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Batch progress counter update (advances for failed files too)
    ScanProgress {
        session_id: String,
        processed: usize,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// A scan finished (possibly cancelled)
    ScanCompleted {
        session_id: String,
        succeeded: usize,
        failed: usize,
        cancelled: bool,
        timestamp: DateTime<Utc>,
    },

    /// One attempt of a retried operation finished
    RetryAttempt {
        operation: String,
        attempt: u32,
        max_attempts: u32,
        outcome: String,
        delay_ms: Option<u64>,
        timestamp: DateTime<Utc>,
    },

    /// Circuit breaker moved between states
    CircuitStateChanged {
        name: String,
        from: String,
        to: String,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for [`DmkEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DmkEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    ///
    /// # Examples
    ///
    /// ```
    /// use dmk_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<DmkEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: DmkEvent) -> Result<usize, broadcast::error::SendError<DmkEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: DmkEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
