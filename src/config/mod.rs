//! Configuration module for the forum archiver
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use forum_archiver::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("archiver.toml")).unwrap();
//! println!("Requests are spaced {}s apart", config.crawler.delay_seconds);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{Config, CrawlerConfig, JobEntry, OutputConfig, SourceConfig, UserAgentConfig};

pub use validation::MAX_WAIT_SECONDS;

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
