//! Output module for archived records and crawl reporting
//!
//! This module handles:
//! - Writing parsed entities as atomic, idempotent JSON records
//! - Per-job statistics for logs and the `--stats` report

mod records;
pub mod stats;

pub use records::RecordWriter;
pub use stats::{print_statistics, JobStats};
