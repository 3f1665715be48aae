//! Storage module for persisting crawl progress
//!
//! This module handles all database operations for the archiver, including:
//! - SQLite database initialization and schema management
//! - Per-job crawl trees (the progress snapshot)
//! - Atomic node state transitions
//! - Run tracking and final status bookkeeping
//! - The per-job exclusive lock

mod lock;
mod schema;
mod sqlite;
mod traits;

pub use lock::JobLock;
pub use sqlite::{init_database, SqliteStorage};
pub use traits::{ProgressStore, StorageError, StorageResult};

use crate::ArchiveError;

use std::path::Path;

/// Initializes or opens a progress database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(ArchiveError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteStorage, ArchiveError> {
    SqliteStorage::new(path)
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub job_id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub error_message: Option<String>,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Aborted,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Aborted => "aborted",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "aborted" => Some(Self::Aborted),
            _ => None,
        }
    }
}

/// What `ProgressStore::recover` repaired
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Nodes found InProgress (a unit was cut short) and put back to Pending
    pub reset_in_progress: usize,

    /// Abandoned nodes revived because the ceiling now allows more attempts
    pub revived_abandoned: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_roundtrip() {
        for status in &[
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Interrupted,
            RunStatus::Aborted,
        ] {
            let db_str = status.to_db_string();
            let parsed = RunStatus::from_db_string(db_str);
            assert_eq!(Some(*status), parsed);
        }
    }

    #[test]
    fn test_run_status_invalid() {
        assert_eq!(RunStatus::from_db_string("invalid"), None);
    }
}
