//! Peak construction and ranking

use chrono::{DateTime, Utc};
use dmk_common::time::{now, offset_by_seconds};

use super::density_analyzer::WindowSample;
use crate::models::{Message, Peak, Position};

/// Turn a qualifying window into a [`Peak`]
///
/// The absolute span comes from the first and last member messages. A window without
/// members falls back to `recording_start` plus the window offset, then to the current time.
pub fn build_peak(
    sample: &WindowSample<'_>,
    window_size: f64,
    recording_start: Option<DateTime<Utc>>,
) -> Peak {
    let start_time = sample.window_start;
    let end_time = start_time + window_size;

    let (start_absolute_time, end_absolute_time) =
        match (sample.members.first(), sample.members.last()) {
            (Some(first), Some(last)) => (first.absolute_time, last.absolute_time),
            _ => match recording_start {
                Some(base) => (
                    offset_by_seconds(base, start_time),
                    offset_by_seconds(base, end_time),
                ),
                None => {
                    let instant = now();
                    (instant, instant)
                }
            },
        };

    Peak {
        start_time,
        end_time,
        start_absolute_time,
        end_absolute_time,
        count: sample.count(),
        average_content_length: average_content_length(sample.members),
        dominant_position: dominant_position(sample.members),
    }
}

/// Mean content length in characters (0 for no messages)
pub fn average_content_length(messages: &[Message]) -> f64 {
    if messages.is_empty() {
        return 0.0;
    }
    let total: usize = messages.iter().map(Message::content_chars).sum();
    total as f64 / messages.len() as f64
}

/// Most frequent position; ties go to the earlier of Scroll, Top, Bottom
pub fn dominant_position(messages: &[Message]) -> Position {
    let mut counts = [0usize; 3];
    for msg in messages {
        counts[msg.position.index()] += 1;
    }

    let mut best = Position::Scroll;
    for pos in Position::ALL {
        if counts[pos.index()] > counts[best.index()] {
            best = pos;
        }
    }
    best
}

/// Stable sort by count descending, then keep the first `max_peaks`
pub fn rank(mut peaks: Vec<Peak>, max_peaks: usize) -> Vec<Peak> {
    peaks.sort_by(|a, b| b.count.cmp(&a.count));
    peaks.truncate(max_peaks);
    peaks
}
