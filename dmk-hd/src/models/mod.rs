//! Data models for parsed recordings and detected peaks

pub mod message;
pub mod peak;
pub mod recording;

pub use message::{Message, Position};
pub use peak::Peak;
pub use recording::{ParsedRecording, RecordingMetadata, RecordingStats};
