//! # DMK Common Library
//!
//! Shared code for the DMK danmaku highlight tools including:
//! - Configuration loading (TOML + environment + compiled defaults)
//! - Event types and the broadcast event bus
//! - Resilience primitives (retry with backoff, circuit breaker)
//! - Timestamp utilities

pub mod config;
pub mod error;
pub mod events;
pub mod resilience;
pub mod time;

pub use error::{Error, Result};
pub use events::{DmkEvent, EventBus};
