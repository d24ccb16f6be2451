//! A small distributed word counter.
//!
//! The coordinator splits a file into word-safe chunks, farms them out to a
//! fixed pool of worker endpoints for a Map phase, re-chunks the partial
//! results for a Reduce phase, merges the final counts and prints them
//! ordered by frequency.

pub mod aggregator;
pub mod chunker;
pub mod config;
pub mod coordinator_node;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod worker_node;

pub use aggregator::{Report, ReportFormat, ResultTable, WordCount};
pub use error::{MrError, Result};
pub use protocol::MessageType;
