//! Incremental reconstruction of messages from `d` element events
//!
//! Attributes arrive on the start tag, character data arrives later (possibly in several
//! chunks), and the end tag commits it. The reconstructor keeps an explicit index of the
//! record currently open so text can only ever land on that record.

use dmk_common::time::epoch_millis_to_utc;

use crate::models::{Message, Position};

/// Minimum number of comma-separated fields in the composite `p` attribute
pub const MIN_COMPOSITE_FIELDS: usize = 5;

const FIELD_ELAPSED: usize = 0;
const FIELD_MODE: usize = 1;
const FIELD_FONT_SIZE: usize = 2;
const FIELD_COLOR: usize = 3;
const FIELD_EPOCH_MILLIS: usize = 4;
const FIELD_USER: usize = 6;

/// Builds [`Message`]s from start / text / end events
#[derive(Debug, Default)]
pub struct MessageReconstructor {
    messages: Vec<Message>,
    /// Index into `messages` of the record awaiting its end tag
    open: Option<usize>,
    text: String,
    dropped: usize,
}

impl MessageReconstructor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a record from the composite attribute value
    ///
    /// Returns `false` when the element is dropped. A dropped element opens no record, so any
    /// text that follows until the next open is discarded. An element opened while another is
    /// still open closes the previous one first.
    pub fn open_record(&mut self, composite: Option<&str>) -> bool {
        if self.open.is_some() {
            self.close_record();
        }
        self.text.clear();

        match composite.and_then(message_from_composite) {
            Some(message) => {
                self.messages.push(message);
                self.open = Some(self.messages.len() - 1);
                true
            }
            None => {
                self.dropped += 1;
                false
            }
        }
    }

    /// Collect character data for the open record (ignored when nothing is open)
    pub fn push_text(&mut self, text: &str) {
        if self.open.is_some() {
            self.text.push_str(text);
        }
    }

    /// Commit collected text to the open record and close it
    pub fn close_record(&mut self) {
        if let Some(index) = self.open.take() {
            if let Some(message) = self.messages.get_mut(index) {
                message.content = std::mem::take(&mut self.text);
            }
        }
        self.text.clear();
    }

    pub fn open_index(&self) -> Option<usize> {
        self.open
    }

    /// Elements dropped so far
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Close any dangling record and return messages stably sorted by elapsed time
    pub fn finish(mut self) -> Vec<Message> {
        self.close_record();
        let mut messages = self.messages;
        messages.sort_by(|a, b| a.elapsed_seconds.total_cmp(&b.elapsed_seconds));
        messages
    }
}

/// Decode the composite attribute into a message with empty content
///
/// `None` when fewer than five fields are present, when elapsed time or the epoch field is
/// not a finite number, or when elapsed time is negative. Other fields degrade to defaults.
pub fn message_from_composite(composite: &str) -> Option<Message> {
    let fields: Vec<&str> = composite.split(',').map(str::trim).collect();
    if fields.len() < MIN_COMPOSITE_FIELDS {
        return None;
    }

    let elapsed_seconds = fields[FIELD_ELAPSED].parse::<f64>().ok()?;
    if !elapsed_seconds.is_finite() || elapsed_seconds < 0.0 {
        return None;
    }

    let epoch_millis = fields[FIELD_EPOCH_MILLIS].parse::<f64>().ok()?;
    let absolute_time = epoch_millis_to_utc(epoch_millis)?;

    let position = fields[FIELD_MODE]
        .parse::<i64>()
        .map(Position::from_mode)
        .unwrap_or_default();
    let font_size = fields[FIELD_FONT_SIZE].parse::<u32>().ok();

    Some(Message {
        elapsed_seconds,
        absolute_time,
        user_id: non_empty(fields.get(FIELD_USER).copied()),
        content: String::new(),
        color: non_empty(Some(fields[FIELD_COLOR])),
        font_size,
        position,
    })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}
