//! Detected density peak

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::Position;

/// One window whose message density is a strict local maximum above the adaptive threshold
///
/// A peak always spans exactly one full window: `end_time - start_time == window_size`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    /// Window start in seconds since recording start
    pub start_time: f64,
    /// Window end in seconds since recording start
    pub end_time: f64,
    pub start_absolute_time: DateTime<Utc>,
    pub end_absolute_time: DateTime<Utc>,
    /// Messages inside the window
    pub count: usize,
    /// Mean content length in characters
    pub average_content_length: f64,
    pub dominant_position: Position,
}

impl Peak {
    /// Window length in seconds
    pub fn span(&self) -> f64 {
        self.end_time - self.start_time
    }
}
