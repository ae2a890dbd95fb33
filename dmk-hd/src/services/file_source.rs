//! File source collaborator
//!
//! The pipeline sees recordings only through [`FileSource`]: a directory tree that can be
//! listed one level at a time and files that can be read whole. [`LocalFileSource`] serves
//! the local disk; network shares plug in behind the same trait.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::Path;
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

/// File source errors
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Path does not exist
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Path exists but cannot be read right now
    #[error("File unreadable {path}: {reason}")]
    FileUnreadable { path: String, reason: String },

    /// Listing was requested for something that is not a directory
    #[error("Not a directory: {0}")]
    NotADirectory(String),
}

impl SourceError {
    /// Whether another attempt could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::FileUnreadable { .. })
    }

    fn from_io(path: &str, err: std::io::Error) -> Self {
        match err.kind() {
            ErrorKind::NotFound => SourceError::FileNotFound(path.to_string()),
            _ => SourceError::FileUnreadable {
                path: path.to_string(),
                reason: err.to_string(),
            },
        }
    }
}

/// One child of a listed directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Full path, usable with [`FileSource::read_bytes`] or [`FileSource::list_entries`]
    pub path: String,
    pub name: String,
    pub is_dir: bool,
    /// Size in bytes (0 for directories)
    pub size: u64,
}

/// Directory tree with readable files
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Immediate children of `dir`
    async fn list_entries(&self, dir: &str) -> Result<Vec<Entry>, SourceError>;

    /// Whole contents of `path`
    async fn read_bytes(&self, path: &str) -> Result<Vec<u8>, SourceError>;
}

/// Local disk file source
#[derive(Debug, Clone)]
pub struct LocalFileSource {
    ignore_patterns: Vec<String>,
}

impl Default for LocalFileSource {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalFileSource {
    /// Create local source with default ignore patterns
    ///
    /// Ignores system files like .DS_Store, Thumbs.db, .git, etc.
    pub fn new() -> Self {
        Self {
            ignore_patterns: vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                ".git".to_string(),
                ".svn".to_string(),
                "@eaDir".to_string(),
            ],
        }
    }

    /// Add a name fragment to skip when listing
    pub fn with_ignore_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.ignore_patterns.push(pattern.into());
        self
    }

    fn is_ignored(&self, entry: &DirEntry) -> bool {
        let file_name = entry.file_name().to_string_lossy();
        self.ignore_patterns
            .iter()
            .any(|pattern| file_name.contains(pattern.as_str()))
    }

    fn list_blocking(&self, dir: &str) -> Result<Vec<Entry>, SourceError> {
        let root = Path::new(dir);
        let metadata = std::fs::metadata(root).map_err(|e| SourceError::from_io(dir, e))?;
        if !metadata.is_dir() {
            return Err(SourceError::NotADirectory(dir.to_string()));
        }

        let walker = WalkDir::new(root)
            .follow_links(false)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !self.is_ignored(e));

        let mut entries = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Error accessing entry: {}", e);
                    continue;
                }
            };

            let path = entry.path();
            let file_type = entry.file_type();

            // Symlinked directories are not followed so a scan cannot loop
            let (is_dir, size) = if file_type.is_symlink() {
                match std::fs::metadata(path) {
                    Ok(target) if target.is_file() => (false, target.len()),
                    Ok(_) => {
                        tracing::debug!("Skipping symlinked directory: {}", path.display());
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!("Dangling symlink {}: {}", path.display(), e);
                        continue;
                    }
                }
            } else if file_type.is_dir() {
                (true, 0)
            } else {
                (false, entry.metadata().map(|m| m.len()).unwrap_or(0))
            };

            entries.push(Entry {
                path: path.to_string_lossy().into_owned(),
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir,
                size,
            });
        }

        Ok(entries)
    }
}

#[async_trait]
impl FileSource for LocalFileSource {
    async fn list_entries(&self, dir: &str) -> Result<Vec<Entry>, SourceError> {
        let source = self.clone();
        let dir_owned = dir.to_string();
        tokio::task::spawn_blocking(move || source.list_blocking(&dir_owned))
            .await
            .map_err(|e| SourceError::FileUnreadable {
                path: dir.to_string(),
                reason: format!("listing task failed: {}", e),
            })?
    }

    async fn read_bytes(&self, path: &str) -> Result<Vec<u8>, SourceError> {
        tokio::fs::read(path)
            .await
            .map_err(|e| SourceError::from_io(path, e))
    }
}

/// Whether `name` ends in `.xml` (case-insensitive)
pub fn has_xml_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("xml"))
        .unwrap_or(false)
}
