//! Batch workflow over a file source

pub mod pipeline;

pub use pipeline::{
    analyze_bytes, scan_and_analyze, FileFailure, HighlightPipeline, PipelineConfig,
    RecordingAnalysis, ScanProgress, ScanReport,
};
