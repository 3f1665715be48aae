//! Forum Archiver: a resumable, rate-limited forum crawler
//!
//! This crate walks a forum hierarchy (board index, forum listing pages,
//! threads, pages of posts) breadth-first, persisting every parsed entity as a JSON record and
//! every node transition in a SQLite progress store, so a crawl can be
//! interrupted at any point and resumed without losing or re-fetching work.

pub mod config;
pub mod crawler;
pub mod output;
pub mod source;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Forum Archiver operations
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] source::ParseError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job {job_id} is already being crawled by another process")]
    JobLocked { job_id: String },

    #[error("Unknown job: {0}")]
    UnknownJob(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Forum Archiver operations
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{
    archive, run_job, ArchiveOptions, CrawlEngine, FetchError, FinalStatus, InterruptHandler, RunReport,
};
pub use source::{Entity, ParseError, Source, VBulletinSource};
pub use state::{HierarchyNode, JobDefinition, NodeKind, NodeRef, NodeState};
