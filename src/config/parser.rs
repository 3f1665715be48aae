use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use forum_archiver::config::load_config;
///
/// let config = load_config(Path::new("archiver.toml")).unwrap();
/// println!("Jobs: {}", config.jobs.len());
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    // Read the configuration file
    let content = std::fs::read_to_string(path)?;

    // Parse TOML
    let config: Config = toml::from_str(&content)?;

    // Validate the configuration
    validate(&config)?;

    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// This is recorded with every run so a resumed job can be traced back to the
/// configuration that produced it.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok((Config, String))` - Successfully loaded configuration and its hash
/// * `Err(ConfigError)` - Failed to load or parse the configuration
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const VALID_CONFIG: &str = r#"
[source]
base-url = "https://forum.example.com"

[crawler]
delay-seconds = 2.0
max-retries = 4
max-node-attempts = 3

[user-agent]
crawler-name = "TestArchiver"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"

[output]
database-path = "./test.db"
archive-dir = "./records"

[[job]]
id = "forum-14"
forum-id = "14"
"#;

    #[test]
    fn test_load_valid_config() {
        let file = create_temp_config(VALID_CONFIG);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.crawler.delay_seconds, 2.0);
        assert_eq!(config.crawler.max_retries, 4);
        assert_eq!(config.crawler.max_node_attempts, 3);
        assert_eq!(config.user_agent.crawler_name, "TestArchiver");
        assert_eq!(config.jobs.len(), 1);
        assert_eq!(
            config.job("forum-14").and_then(|j| j.forum_id.as_deref()),
            Some("14")
        );
    }

    #[test]
    fn test_job_without_forum_id_starts_at_board_index() {
        let content = VALID_CONFIG.replace(
            "forum-id = \"14\"",
            "thread-limit = 50",
        );
        let file = create_temp_config(&content);
        let config = load_config(file.path()).unwrap();

        let entry = config.job("forum-14").unwrap();
        assert_eq!(entry.forum_id, None);
        assert_eq!(entry.thread_limit, Some(50));

        let job = entry.definition();
        assert_eq!(job.root_kind, crate::state::NodeKind::Board);
        assert_eq!(entry.root_label(), "board index");
    }

    #[test]
    fn test_crawler_section_defaults() {
        let content = VALID_CONFIG.replace(
            "[crawler]\ndelay-seconds = 2.0\nmax-retries = 4\nmax-node-attempts = 3\n",
            "",
        );
        let file = create_temp_config(&content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.crawler.delay_seconds, 1.5);
        assert_eq!(config.crawler.max_retries, 3);
        assert_eq!(config.crawler.backoff_cap_seconds, 60.0);
        assert_eq!(config.crawler.max_node_attempts, 5);
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let config_content = "this is not valid TOML {{{";
        let file = create_temp_config(config_content);
        let result = load_config(file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let content = VALID_CONFIG.replace("max-node-attempts = 3", "max-node-attempts = 0");
        let file = create_temp_config(&content);
        let result = load_config(file.path());
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn test_config_hash_tracks_content() {
        let file = create_temp_config(VALID_CONFIG);
        let (_, hash) = load_config_with_hash(file.path()).unwrap();

        assert_eq!(hash, compute_config_hash(file.path()).unwrap());
        assert_eq!(hash.len(), 64); // SHA-256 produces 64 hex characters

        // Adding a job changes the hash recorded with later runs
        let extended = format!("{}\n[[job]]\nid = \"forum-15\"\nforum-id = \"15\"\n", VALID_CONFIG);
        let other = create_temp_config(&extended);
        assert_ne!(hash, compute_config_hash(other.path()).unwrap());
    }
}
