pub mod checkpoint;
pub mod sink;

// Re-export common types
pub use checkpoint::{CheckpointStore, CrawlProgress};
pub use sink::OutputSink;
