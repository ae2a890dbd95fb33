//! Shared fixtures for dmk-hd integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use dmk_hd::services::{Entry, FileSource, SourceError};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};

/// 2025-08-13T12:00:00Z in epoch milliseconds
pub const BASE_EPOCH_MS: i64 = 1_755_086_400_000;

/// Builder for danmaku XML documents
#[derive(Debug, Default, Clone)]
pub struct DanmakuDoc {
    header: Vec<String>,
    items: Vec<String>,
}

impl DanmakuDoc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vendor record-info element
    pub fn record_info(mut self, name: &str, title: &str, start_time: &str) -> Self {
        self.header.push(format!(
            r#"<BililiveRecorderRecordInfo roomid="1000" name="{}" title="{}" start_time="{}"/>"#,
            escape(name),
            escape(title),
            start_time
        ));
        self
    }

    /// Arbitrary markup placed before the messages
    pub fn raw(mut self, xml: &str) -> Self {
        self.header.push(xml.to_string());
        self
    }

    /// Message with an epoch derived from `elapsed`
    pub fn message(self, elapsed: f64, mode: i64, text: &str) -> Self {
        let user = format!("u{}", self.items.len() % 7);
        self.message_from(elapsed, mode, &user, text)
    }

    pub fn message_from(self, elapsed: f64, mode: i64, user: &str, text: &str) -> Self {
        let epoch = BASE_EPOCH_MS + (elapsed * 1000.0).round() as i64;
        let p = format!("{},{},25,16777215,{},0,{},0", elapsed, mode, epoch, user);
        self.composite(&p, text)
    }

    /// `d` element with a literal composite attribute
    pub fn composite(mut self, p: &str, text: &str) -> Self {
        self.items
            .push(format!(r#"<d p="{}">{}</d>"#, escape(p), escape(text)));
        self
    }

    pub fn build(&self) -> String {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<i>\n");
        for line in self.header.iter().chain(&self.items) {
            xml.push_str("  ");
            xml.push_str(line);
            xml.push('\n');
        }
        xml.push_str("</i>\n");
        xml
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.build().into_bytes()
    }
}

pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Ten baseline messages every 30 s plus a ten-message burst from 150 s to 177 s
pub fn burst_document() -> DanmakuDoc {
    let mut doc = DanmakuDoc::new();
    for i in 0..10 {
        doc = doc.message(i as f64 * 30.0, 1, "normal");
    }
    for i in 0..10 {
        doc = doc.message(150.0 + i as f64 * 3.0, 1, "wow!!");
    }
    doc
}

/// In-memory file source with injectable read failures
#[derive(Debug, Default)]
pub struct MemorySource {
    files: BTreeMap<String, Vec<u8>>,
    failing_reads: AtomicU32,
    read_calls: AtomicU32,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.to_string(), bytes.into());
        self
    }

    /// Next `count` reads fail with a transient error
    pub fn failing_reads(self, count: u32) -> Self {
        self.failing_reads.store(count, Ordering::SeqCst);
        self
    }

    pub fn read_calls(&self) -> u32 {
        self.read_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileSource for MemorySource {
    async fn list_entries(&self, dir: &str) -> Result<Vec<Entry>, SourceError> {
        let dir = dir.trim_end_matches('/');
        let prefix = format!("{}/", dir);

        let mut subdirs = BTreeSet::new();
        let mut entries = Vec::new();
        for (path, bytes) in &self.files {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((child, _)) => {
                    subdirs.insert(child.to_string());
                }
                None => entries.push(Entry {
                    path: path.clone(),
                    name: rest.to_string(),
                    is_dir: false,
                    size: bytes.len() as u64,
                }),
            }
        }

        if entries.is_empty() && subdirs.is_empty() {
            return Err(SourceError::FileNotFound(dir.to_string()));
        }

        entries.extend(subdirs.into_iter().map(|name| Entry {
            path: format!("{}{}", prefix, name),
            name,
            is_dir: true,
            size: 0,
        }));
        Ok(entries)
    }

    async fn read_bytes(&self, path: &str) -> Result<Vec<u8>, SourceError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.failing_reads.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_reads.store(remaining - 1, Ordering::SeqCst);
            return Err(SourceError::FileUnreadable {
                path: path.to_string(),
                reason: "share offline".to_string(),
            });
        }

        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| SourceError::FileNotFound(path.to_string()))
    }
}
