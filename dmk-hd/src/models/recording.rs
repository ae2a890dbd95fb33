//! Recording-level types: metadata, parse result and summary statistics

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::message::{Message, Position};

/// Metadata inferred from the source path and from in-document elements
///
/// Later sources overwrite earlier ones field by field (path first, then document order).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub title: Option<String>,
    pub channel: Option<String>,
    pub recording_date: Option<NaiveDate>,
    /// Declared length in seconds (0 if absent)
    pub declared_duration: f64,
    /// Wall-clock start of the recording, when the exporter records it
    pub start_time: Option<DateTime<Utc>>,
}

/// Result of parsing one danmaku document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedRecording {
    /// Path or name the document was read from
    pub source: String,
    pub metadata: RecordingMetadata,
    /// Sorted by `elapsed_seconds` ascending
    pub messages: Vec<Message>,
    pub total_count: usize,
    /// Declared duration when present, otherwise the last message's elapsed time
    pub duration: f64,
    pub parse_instant: DateTime<Utc>,
}

impl ParsedRecording {
    pub fn new(source: impl Into<String>, metadata: RecordingMetadata, messages: Vec<Message>) -> Self {
        let last_elapsed = messages
            .iter()
            .map(|m| m.elapsed_seconds)
            .fold(0.0_f64, f64::max);
        let duration = if metadata.declared_duration > 0.0 {
            metadata.declared_duration
        } else {
            last_elapsed
        };

        Self {
            source: source.into(),
            total_count: messages.len(),
            metadata,
            messages,
            duration,
            parse_instant: Utc::now(),
        }
    }

    pub fn stats(&self) -> RecordingStats {
        RecordingStats::from_messages(&self.messages, self.duration)
    }
}

/// Summary statistics for one recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingStats {
    pub total_messages: usize,
    /// Distinct non-empty user ids
    pub unique_users: usize,
    pub scroll_count: usize,
    pub top_count: usize,
    pub bottom_count: usize,
    /// Mean content length in characters (0 for no messages)
    pub average_content_length: f64,
    /// Messages per minute over `duration` (0 when duration is 0)
    pub messages_per_minute: f64,
}

impl RecordingStats {
    pub fn from_messages(messages: &[Message], duration: f64) -> Self {
        let mut by_position = [0usize; 3];
        let mut users: HashSet<&str> = HashSet::new();
        let mut total_chars = 0usize;

        for msg in messages {
            by_position[msg.position.index()] += 1;
            total_chars += msg.content_chars();
            if let Some(user) = msg.user_id.as_deref() {
                users.insert(user);
            }
        }

        let total = messages.len();
        let average_content_length = if total == 0 {
            0.0
        } else {
            total_chars as f64 / total as f64
        };
        let messages_per_minute = if duration > 0.0 {
            total as f64 / (duration / 60.0)
        } else {
            0.0
        };

        Self {
            total_messages: total,
            unique_users: users.len(),
            scroll_count: by_position[Position::Scroll.index()],
            top_count: by_position[Position::Top.index()],
            bottom_count: by_position[Position::Bottom.index()],
            average_content_length,
            messages_per_minute,
        }
    }
}
