//! Danmaku XML parser
//!
//! Pull-parses one exported document with quick-xml (no DOM) and hands `d` element events to
//! the [`MessageReconstructor`]. Recording metadata starts from the path convention and is then
//! overwritten by in-document elements in document order.
//!
//! # Document shape
//!
//! ```xml
//! <i>
//!   <chatserver>chat.example.com</chatserver>
//!   <BililiveRecorderRecordInfo name="Streamer" title="Late Night" start_time="2025-08-13T20:00:00+08:00"/>
//!   <d p="12.5,1,25,16777215,1755086412500,0,user42,0">hello</d>
//! </i>
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;
use tracing::debug;

use super::message_reconstructor::MessageReconstructor;
use super::path_metadata::{infer_from_path, parse_compact_date};
use crate::models::{ParsedRecording, RecordingMetadata};

/// Bytes inspected by [`looks_like_danmaku_xml`]
pub const SNIFF_LIMIT: usize = 64 * 1024;

/// Substrings that mark a danmaku export
const MARKERS: [&[u8]; 4] = [b"<d ", b"<d>", b"<D ", b"BililiveRecorder"];

const COMPOSITE_ATTRIBUTE: &str = "p";
const VENDOR_RECORD_INFO: &str = "bililiverecorderrecordinfo";

/// Parse errors
#[derive(Debug, Error)]
pub enum ParseError {
    /// The document cannot be tokenized or is not well formed
    #[error("Malformed document {path}: {reason}")]
    MalformedDocument { path: String, reason: String },
}

/// Cheap caller-side filter run before [`parse`]
///
/// Looks for a `d` element or a known exporter marker in the first [`SNIFF_LIMIT`] bytes, or
/// an `i` root element (an export with no messages yet).
pub fn looks_like_danmaku_xml(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(SNIFF_LIMIT)];
    MARKERS.iter().any(|needle| contains(head, needle)) || root_is_i(head)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// First element after the prolog (BOM, declaration, comments, doctype) is `<i>`
fn root_is_i(head: &[u8]) -> bool {
    let mut rest = head.strip_prefix(b"\xEF\xBB\xBF".as_slice()).unwrap_or(head);
    loop {
        let blank = rest.iter().take_while(|b| b.is_ascii_whitespace()).count();
        rest = &rest[blank..];
        let close: &[u8] = if rest.starts_with(b"<?") {
            b"?>"
        } else if rest.starts_with(b"<!--") {
            b"-->"
        } else if rest.starts_with(b"<!") {
            b">"
        } else {
            return rest.starts_with(b"<i>") || rest.starts_with(b"<i ");
        };
        match rest.windows(close.len()).position(|w| w == close) {
            Some(end) => rest = &rest[end + close.len()..],
            None => return false,
        }
    }
}

/// Parse one document held in memory
///
/// `source` is only used for metadata inference; the parser never opens it. Malformed `d`
/// elements are dropped silently. A document that cannot be tokenized, has mismatched or
/// unclosed elements, or has no root element fails as a whole.
pub fn parse(bytes: &[u8], source: &str) -> Result<ParsedRecording, ParseError> {
    let mut state = ParseState::new(infer_from_path(source));
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().check_end_names = true;

    let malformed = |reason: String| ParseError::MalformedDocument {
        path: source.to_string(),
        reason,
    };

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Err(e) => {
                return Err(malformed(format!(
                    "at byte {}: {}",
                    reader.error_position(),
                    e
                )));
            }
            Ok(Event::Start(e)) => {
                state.depth += 1;
                state.saw_root = true;
                state.open_element(&e, false);
            }
            Ok(Event::Empty(e)) => {
                state.saw_root = true;
                state.open_element(&e, true);
            }
            Ok(Event::End(e)) => {
                if state.depth == 0 {
                    return Err(malformed("end tag without matching start tag".to_string()));
                }
                state.depth -= 1;
                let tag = lowercase_name(e.local_name().as_ref());
                state.close_element(&tag);
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map(|s| s.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&t).into_owned());
                state.push_text(&text);
            }
            Ok(Event::CData(c)) => {
                state.push_text(&String::from_utf8_lossy(&c));
            }
            Ok(Event::Eof) => break,
            _ => {}
        }
        buf.clear();
    }

    if !state.saw_root {
        return Err(malformed("no root element".to_string()));
    }
    if state.depth > 0 {
        return Err(malformed(format!(
            "{} element(s) unclosed at end of document",
            state.depth
        )));
    }

    let dropped = state.reconstructor.dropped();
    let metadata = state.metadata;
    let messages = state.reconstructor.finish();

    debug!(
        source = %source,
        messages = messages.len(),
        dropped = dropped,
        "Parsed danmaku document"
    );

    Ok(ParsedRecording::new(source, metadata, messages))
}

struct ParseState {
    metadata: RecordingMetadata,
    reconstructor: MessageReconstructor,
    /// Character data since the last start tag, for `title`/`name`/`duration`
    element_text: String,
    depth: usize,
    saw_root: bool,
}

impl ParseState {
    fn new(metadata: RecordingMetadata) -> Self {
        Self {
            metadata,
            reconstructor: MessageReconstructor::new(),
            element_text: String::new(),
            depth: 0,
            saw_root: false,
        }
    }

    fn open_element(&mut self, e: &BytesStart<'_>, is_empty: bool) {
        self.element_text.clear();
        let tag = lowercase_name(e.local_name().as_ref());

        match tag.as_str() {
            "d" => {
                let attrs = attributes_of(e);
                let composite = find(&attrs, COMPOSITE_ATTRIBUTE);
                self.reconstructor.open_record(composite);
                if is_empty {
                    self.reconstructor.close_record();
                }
            }
            "video" | "recording" => {
                let attrs = attributes_of(e);
                if let Some(title) = find(&attrs, "title").or_else(|| find(&attrs, "name")) {
                    set_non_empty(&mut self.metadata.title, title);
                }
                if let Some(channel) = find(&attrs, "channel") {
                    set_non_empty(&mut self.metadata.channel, channel);
                }
                if let Some(duration) = find(&attrs, "duration").and_then(parse_duration) {
                    self.metadata.declared_duration = duration;
                }
                if let Some(date) = find(&attrs, "date").and_then(parse_date) {
                    self.metadata.recording_date = Some(date);
                }
            }
            "chatserver" | "server" => {
                let attrs = attributes_of(e);
                if let Some(channel) = find(&attrs, "channel").or_else(|| find(&attrs, "name")) {
                    set_non_empty(&mut self.metadata.channel, channel);
                }
                if let Some(title) = find(&attrs, "title") {
                    set_non_empty(&mut self.metadata.title, title);
                }
            }
            VENDOR_RECORD_INFO => {
                let attrs = attributes_of(e);
                if let Some(name) = find(&attrs, "name") {
                    set_non_empty(&mut self.metadata.channel, name);
                }
                if let Some(title) = find(&attrs, "title") {
                    set_non_empty(&mut self.metadata.title, title);
                }
                if let Some(start) = find(&attrs, "start_time").and_then(parse_rfc3339) {
                    self.metadata.start_time = Some(start);
                }
            }
            _ => {}
        }
    }

    fn close_element(&mut self, tag: &str) {
        match tag {
            "d" => self.reconstructor.close_record(),
            "title" | "name" => {
                let text = self.element_text.trim();
                if !text.is_empty() {
                    self.metadata.title = Some(text.to_string());
                }
            }
            "duration" => {
                if let Some(duration) = parse_duration(&self.element_text) {
                    self.metadata.declared_duration = duration;
                }
            }
            _ => {}
        }
        self.element_text.clear();
    }

    fn push_text(&mut self, text: &str) {
        self.reconstructor.push_text(text);
        self.element_text.push_str(text);
    }
}

fn lowercase_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_ascii_lowercase()
}

/// Attribute (lowercased key, unescaped value) pairs; unreadable attributes are skipped
fn attributes_of(e: &BytesStart<'_>) -> Vec<(String, String)> {
    e.attributes()
        .flatten()
        .map(|attr| {
            let key = lowercase_name(attr.key.local_name().as_ref());
            let value = attr
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
            (key, value)
        })
        .collect()
}

fn find<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn set_non_empty(slot: &mut Option<String>, value: &str) {
    let value = value.trim();
    if !value.is_empty() {
        *slot = Some(value.to_string());
    }
}

fn parse_duration(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    parse_compact_date(value).or_else(|| NaiveDate::parse_from_str(value, "%Y-%m-%d").ok())
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
