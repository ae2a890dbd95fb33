//! Scan-and-analyze batch pipeline
//!
//! Walks a [`FileSource`] from a root directory, reads every `.xml` file through the
//! resilient executor, and parses and analyzes each document on the blocking pool.
//!
//! # Error Handling
//! - Per-file error isolation: a failed document is recorded and the batch continues
//! - The progress counter advances for failed documents too
//! - Only a failure to list the root directory fails the scan
//!
//! # Example
//! ```rust,ignore
//! let pipeline = HighlightPipeline::new(Arc::new(LocalFileSource::new()), PipelineConfig::default())?;
//! let report = pipeline.scan_and_analyze("/recordings", &CancellationToken::new()).await?;
//! ```

use dmk_common::config::TomlConfig;
use dmk_common::events::{DmkEvent, EventBus};
use dmk_common::resilience::{
    CircuitBreaker, CircuitConfig, CompositeRetryObserver, EventBusRetryObserver,
    ResilientExecutor, RetryExecutor, RetryObserver, RetryPolicy, TracingRetryObserver,
};
use dmk_common::time::now;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::models::{ParsedRecording, Peak, RecordingStats};
use crate::services::{
    has_xml_extension, looks_like_danmaku_xml, parse, AnalysisConfig, DensityAnalyzer, Entry,
    FileSource, SourceError,
};

const EVENT_BUS_CAPACITY: usize = 256;
const FILE_SOURCE_OPERATION: &str = "file-source";

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub analysis: AnalysisConfig,
    /// Retry pacing for listing and reading
    pub retry: RetryPolicy,
    /// Breaker shared by every file-source call of this pipeline
    pub circuit_breaker: CircuitConfig,
    /// Documents processed concurrently (0 is treated as 1)
    pub max_concurrent_files: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            analysis: AnalysisConfig::default(),
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitConfig::default(),
            max_concurrent_files: 4,
        }
    }
}

impl From<&TomlConfig> for PipelineConfig {
    fn from(config: &TomlConfig) -> Self {
        Self {
            analysis: AnalysisConfig::from(&config.analysis),
            retry: config.retry.to_policy(),
            circuit_breaker: config.circuit_breaker.to_config(),
            max_concurrent_files: config.scan.max_concurrent_files,
        }
    }
}

/// Parse and analysis result for one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingAnalysis {
    pub recording: ParsedRecording,
    /// Ranked, count descending
    pub peaks: Vec<Peak>,
    pub stats: RecordingStats,
}

/// A document or directory that was skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub path: String,
    pub error: String,
}

/// Batch progress counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanProgress {
    /// Documents discovered
    pub total: usize,
    /// Documents finished, successfully or not
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Outcome of one scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub session_id: String,
    pub root: String,
    /// Sorted by source path
    pub results: Vec<RecordingAnalysis>,
    /// Sorted by path
    pub failures: Vec<FileFailure>,
    /// Subdirectories that could not be listed
    pub skipped_dirs: Vec<FileFailure>,
    pub progress: ScanProgress,
    pub cancelled: bool,
}

/// Batch highlight detection over a file source
pub struct HighlightPipeline {
    source: Arc<dyn FileSource>,
    config: PipelineConfig,
    analyzer: DensityAnalyzer,
    breaker: Arc<CircuitBreaker>,
    event_bus: EventBus,
}

impl HighlightPipeline {
    /// Create pipeline with a private event bus
    pub fn new(source: Arc<dyn FileSource>, config: PipelineConfig) -> Result<Self> {
        let analyzer = DensityAnalyzer::with_config(config.analysis.clone())?;
        let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
        let breaker = Self::build_breaker(&config, &event_bus);

        Ok(Self {
            source,
            config,
            analyzer,
            breaker,
            event_bus,
        })
    }

    /// Publish scan, retry and breaker events on `bus`
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.breaker = Self::build_breaker(&self.config, &bus);
        self.event_bus = bus;
        self
    }

    fn build_breaker(config: &PipelineConfig, bus: &EventBus) -> Arc<CircuitBreaker> {
        Arc::new(
            CircuitBreaker::new(FILE_SOURCE_OPERATION, config.circuit_breaker.clone())
                .with_event_bus(bus.clone()),
        )
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    fn executor(&self, cancel: &CancellationToken) -> ResilientExecutor {
        let observers: Vec<Arc<dyn RetryObserver>> = vec![
            Arc::new(TracingRetryObserver),
            Arc::new(EventBusRetryObserver::new(self.event_bus.clone())),
        ];
        let retry = RetryExecutor::new(FILE_SOURCE_OPERATION, self.config.retry.clone())
            .with_observer(Arc::new(CompositeRetryObserver::new(observers)))
            .with_cancellation(cancel.clone());
        ResilientExecutor::new(retry, Arc::clone(&self.breaker))
    }

    /// Scan `root` recursively and analyze every danmaku document found
    pub async fn scan_and_analyze(
        &self,
        root: &str,
        cancel: &CancellationToken,
    ) -> Result<ScanReport> {
        let session_id = Uuid::new_v4().to_string();
        let executor = self.executor(cancel);

        info!(session_id = %session_id, root = %root, "Starting danmaku scan");
        self.event_bus.emit_lossy(DmkEvent::ScanStarted {
            session_id: session_id.clone(),
            root: root.to_string(),
            timestamp: now(),
        });

        let (files, skipped_dirs) = self.discover(&executor, root, cancel).await?;
        let total = files.len();

        info!(
            session_id = %session_id,
            file_count = total,
            skipped_dirs = skipped_dirs.len(),
            "Processing danmaku files ({} parallel workers)",
            self.config.max_concurrent_files.max(1)
        );

        let processed = AtomicUsize::new(0);
        let executor = &executor;
        let processed_ref = &processed;
        let session = &session_id;

        let outcomes: Vec<(String, Option<Result<RecordingAnalysis>>)> = stream::iter(files)
            .map(|path| async move {
                if cancel.is_cancelled() {
                    return (path, None);
                }

                let result = self.process_file(executor, &path).await;
                if matches!(result, Err(PipelineError::Cancelled)) {
                    return (path, None);
                }

                let current = processed_ref.fetch_add(1, Ordering::Relaxed) + 1;
                match &result {
                    Ok(analysis) => {
                        info!(
                            session_id = %session,
                            file = %path,
                            messages = analysis.recording.total_count,
                            peaks = analysis.peaks.len(),
                            "File analyzed"
                        );
                        self.event_bus.emit_lossy(DmkEvent::FileAnalyzed {
                            session_id: session.clone(),
                            path: path.clone(),
                            message_count: analysis.recording.total_count,
                            peak_count: analysis.peaks.len(),
                            timestamp: now(),
                        });
                    }
                    Err(e) => {
                        warn!(
                            session_id = %session,
                            file = %path,
                            error = %e,
                            "File skipped"
                        );
                        self.event_bus.emit_lossy(DmkEvent::FileFailed {
                            session_id: session.clone(),
                            path: path.clone(),
                            error: e.to_string(),
                            timestamp: now(),
                        });
                    }
                }

                self.event_bus.emit_lossy(DmkEvent::ScanProgress {
                    session_id: session.clone(),
                    processed: current,
                    total,
                    timestamp: now(),
                });
                debug!(
                    session_id = %session,
                    progress = format!("{}/{}", current, total),
                    "Scan progress update"
                );

                (path, Some(result))
            })
            .buffer_unordered(self.config.max_concurrent_files.max(1))
            .collect()
            .await;

        let mut results = Vec::new();
        let mut failures = Vec::new();
        for (path, outcome) in outcomes {
            match outcome {
                Some(Ok(analysis)) => results.push(analysis),
                Some(Err(e)) => failures.push(FileFailure {
                    path,
                    error: e.to_string(),
                }),
                None => {}
            }
        }
        results.sort_by(|a, b| a.recording.source.cmp(&b.recording.source));
        failures.sort_by(|a, b| a.path.cmp(&b.path));

        let progress = ScanProgress {
            total,
            processed: processed.load(Ordering::Relaxed),
            succeeded: results.len(),
            failed: failures.len(),
        };
        let cancelled = cancel.is_cancelled();

        self.event_bus.emit_lossy(DmkEvent::ScanCompleted {
            session_id: session_id.clone(),
            succeeded: progress.succeeded,
            failed: progress.failed,
            cancelled,
            timestamp: now(),
        });
        info!(
            session_id = %session_id,
            succeeded = progress.succeeded,
            failed = progress.failed,
            cancelled,
            "Danmaku scan finished"
        );

        Ok(ScanReport {
            session_id,
            root: root.to_string(),
            results,
            failures,
            skipped_dirs,
            progress,
            cancelled,
        })
    }

    /// Read and analyze a single document through the resilient executor
    pub async fn analyze_file(&self, path: &str) -> Result<RecordingAnalysis> {
        let executor = self.executor(&CancellationToken::new());
        self.process_file(&executor, path).await
    }

    /// Breadth-first listing; returns `.xml` file paths sorted, plus unlistable subdirectories
    async fn discover(
        &self,
        executor: &ResilientExecutor,
        root: &str,
        cancel: &CancellationToken,
    ) -> Result<(Vec<String>, Vec<FileFailure>)> {
        let mut files = Vec::new();
        let mut skipped = Vec::new();
        let mut pending = VecDeque::from([root.to_string()]);
        let mut is_root = true;

        while let Some(dir) = pending.pop_front() {
            if cancel.is_cancelled() {
                break;
            }

            let entries = match self.list(executor, &dir).await {
                Ok(entries) => entries,
                Err(e) if is_root => return Err(e),
                Err(PipelineError::Cancelled) => break,
                Err(e) => {
                    warn!(dir = %dir, error = %e, "Skipping unlistable directory");
                    skipped.push(FileFailure {
                        path: dir,
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            is_root = false;

            for entry in entries {
                if entry.is_dir {
                    pending.push_back(entry.path);
                } else if has_xml_extension(&entry.name) {
                    files.push(entry.path);
                }
            }
        }

        files.sort();
        Ok((files, skipped))
    }

    async fn list(&self, executor: &ResilientExecutor, dir: &str) -> Result<Vec<Entry>> {
        let entries = executor
            .execute_when(|| self.source.list_entries(dir), SourceError::is_transient)
            .await?;
        Ok(entries)
    }

    async fn process_file(
        &self,
        executor: &ResilientExecutor,
        path: &str,
    ) -> Result<RecordingAnalysis> {
        let bytes = executor
            .execute_when(|| self.source.read_bytes(path), SourceError::is_transient)
            .await?;

        let analyzer = self.analyzer.clone();
        let source = path.to_string();
        tokio::task::spawn_blocking(move || analyze_bytes(&bytes, &source, &analyzer)).await?
    }
}

/// Parse and analyze one document already in memory
pub fn analyze_bytes(
    bytes: &[u8],
    source: &str,
    analyzer: &DensityAnalyzer,
) -> Result<RecordingAnalysis> {
    if !looks_like_danmaku_xml(bytes) {
        return Err(PipelineError::NotDanmaku(source.to_string()));
    }

    let recording = parse(bytes, source)?;
    let peaks = analyzer.analyze(&recording.messages, recording.metadata.start_time)?;
    let stats = recording.stats();

    Ok(RecordingAnalysis {
        recording,
        peaks,
        stats,
    })
}

/// Scan with default configuration and return (recording, peaks) pairs
pub async fn scan_and_analyze(
    source: Arc<dyn FileSource>,
    root: &str,
) -> Result<Vec<(ParsedRecording, Vec<Peak>)>> {
    let pipeline = HighlightPipeline::new(source, PipelineConfig::default())?;
    let report = pipeline
        .scan_and_analyze(root, &CancellationToken::new())
        .await?;
    Ok(report
        .results
        .into_iter()
        .map(|analysis| (analysis.recording, analysis.peaks))
        .collect())
}
