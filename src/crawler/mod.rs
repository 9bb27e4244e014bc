pub mod controller;
pub mod dedup;
pub mod discovery;
pub mod executor;
pub mod shutdown;
pub mod task;

#[cfg(test)]
pub mod testing;

// Re-export common types
pub use controller::{Collaborators, CrawlSupervisor, SourceError, SourceReport};
