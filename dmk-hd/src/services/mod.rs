//! Service modules for danmaku ingestion and analysis

pub mod danmaku_parser;
pub mod density_analyzer;
pub mod file_source;
pub mod message_reconstructor;
pub mod path_metadata;
pub mod peak_ranker;

pub use danmaku_parser::{looks_like_danmaku_xml, parse, ParseError};
pub use density_analyzer::{analyze, AnalysisConfig, AnalysisError, DensityAnalyzer, WindowSample};
pub use file_source::{has_xml_extension, Entry, FileSource, LocalFileSource, SourceError};
pub use message_reconstructor::MessageReconstructor;
pub use path_metadata::infer_from_path;
pub use peak_ranker::{build_peak, rank};
