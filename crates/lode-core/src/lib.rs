//! Core recording, extraction, and persistence for Lode.

mod dedup;
mod error;
mod extract;
mod gems;
mod recorder;
mod store;
mod summarizer;

pub use dedup::OutputDeduplicator;
pub use error::LodeError;
pub use extract::{ExtractionConfig, ExtractionPipeline};
pub use gems::GemStore;
pub use recorder::{RecorderConfig, SessionRecorder};
pub use store::HistoryStore;
pub use summarizer::{Extraction, HostedSummarizer, LocalSummarizer, Summarizer};

/// Result type for Lode operations.
pub type Result<T> = std::result::Result<T, LodeError>;
