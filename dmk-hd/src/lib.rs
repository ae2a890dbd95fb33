//! dmk-hd (Danmaku Highlight Detector) library interface
//!
//! Parses danmaku XML exports, finds windows where message density spikes, and ranks them
//! as highlight candidates. The binary is a thin CLI over [`HighlightPipeline`].

pub mod error;
pub mod models;
pub mod services;
pub mod workflow;

pub use crate::error::{PipelineError, Result};
pub use crate::models::{
    Message, ParsedRecording, Peak, Position, RecordingMetadata, RecordingStats,
};
pub use crate::services::{FileSource, LocalFileSource};
pub use crate::workflow::{
    HighlightPipeline, PipelineConfig, RecordingAnalysis, ScanProgress, ScanReport,
};
