//! Recording metadata inferred from the source path
//!
//! Recorders name their output `.../<streamer>-Channel/record-YYYYMMDD-<title>.xml`. The
//! inference is best effort: anything that does not fit the convention is ignored, never an
//! error. Segments are visited in path order, so deeper segments overwrite shallower ones.

use chrono::NaiveDate;

use crate::models::RecordingMetadata;

const RECORD_PREFIX: &str = "record-";
const CHANNEL_TOKEN: &str = "channel";

/// Infer title, channel and date from a path-like identifier
pub fn infer_from_path(source: &str) -> RecordingMetadata {
    let mut metadata = RecordingMetadata::default();

    let segments: Vec<&str> = source
        .split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .collect();

    // The last segment is the file name; only folders name a channel
    let folders = segments.len().saturating_sub(1);
    for (i, segment) in segments.iter().enumerate() {
        if i < folders && segment.contains('-') && segment.to_lowercase().contains(CHANNEL_TOKEN) {
            if let Some(channel) = channel_from_segment(segment) {
                metadata.channel = Some(channel);
            }
        }

        let stem = strip_extension(segment);
        if let Some((date, title)) = parse_record_name(stem) {
            if date.is_some() {
                metadata.recording_date = date;
            }
            if title.is_some() {
                metadata.title = title;
            }
        }
    }

    metadata
}

/// Text after the last hyphen, or before it when the tail is only the channel token
fn channel_from_segment(segment: &str) -> Option<String> {
    let (head, tail) = segment.rsplit_once('-')?;
    let tail = tail.trim();
    let name = if tail.is_empty() || tail.eq_ignore_ascii_case(CHANNEL_TOKEN) {
        head.trim()
    } else {
        tail
    };

    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// `record-<YYYYMMDD>-<title...>` → (date, title); `None` if the prefix does not match
fn parse_record_name(name: &str) -> Option<(Option<NaiveDate>, Option<String>)> {
    if !name.starts_with(RECORD_PREFIX) {
        return None;
    }

    let parts: Vec<&str> = name.split('-').collect();
    if parts.len() < 2 {
        return None;
    }

    let date = parse_compact_date(parts[1]);
    let title = if parts.len() > 2 {
        let cleaned = clean_title(&parts[2..].join("-"));
        (!cleaned.is_empty()).then_some(cleaned)
    } else {
        None
    };

    Some((date, title))
}

/// Exactly eight digits forming a valid calendar date
pub(crate) fn parse_compact_date(value: &str) -> Option<NaiveDate> {
    if value.len() != 8 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(value, "%Y%m%d").ok()
}

/// Drop trailing `.xml`, exclamation marks and whitespace
fn clean_title(raw: &str) -> String {
    let mut title = raw.trim();
    loop {
        let before = title.len();
        title = title.trim_end();
        let cut = title.len().saturating_sub(4);
        if title.get(cut..).is_some_and(|ext| ext.eq_ignore_ascii_case(".xml")) {
            title = &title[..cut];
        }
        title = title.trim_end_matches(['!', '！']);
        if title.len() == before {
            break;
        }
    }
    title.trim().to_string()
}

/// Strip a short alphanumeric extension (`.xml`, `.XML`, `.txt`)
fn strip_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && (1..=5).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            stem
        }
        _ => name,
    }
}
