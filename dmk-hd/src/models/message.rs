//! Danmaku message record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// On-screen placement of a message
///
/// Variant order is also the tie-break order when picking a window's dominant position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    #[default]
    Scroll,
    Top,
    Bottom,
}

impl Position {
    /// All positions in tie-break order
    pub const ALL: [Position; 3] = [Position::Scroll, Position::Top, Position::Bottom];

    /// Map the exporter's numeric mode code: 4 → Bottom, 5 → Top, anything else → Scroll
    pub fn from_mode(code: i64) -> Self {
        match code {
            4 => Position::Bottom,
            5 => Position::Top,
            _ => Position::Scroll,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Position::Scroll => 0,
            Position::Top => 1,
            Position::Bottom => 2,
        }
    }
}

/// One chat-overlay event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Seconds since recording start (always >= 0)
    pub elapsed_seconds: f64,
    /// Wall-clock time the message was sent
    pub absolute_time: DateTime<Utc>,
    pub user_id: Option<String>,
    /// Text content (empty if the element carried none)
    pub content: String,
    /// Raw color value as exported
    pub color: Option<String>,
    pub font_size: Option<u32>,
    pub position: Position,
}

impl Message {
    /// Content length in characters (not bytes)
    pub fn content_chars(&self) -> usize {
        self.content.chars().count()
    }
}
