use crate::config::types::{Config, CrawlerConfig, JobEntry, OutputConfig, SourceConfig, UserAgentConfig};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Upper bound for any pause the crawler is configured to take (one day)
pub const MAX_WAIT_SECONDS: f64 = 86_400.0;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_source_config(&config.source)?;
    validate_crawler_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    validate_jobs(&config.jobs)?;
    Ok(())
}

/// Validates the source configuration
fn validate_source_config(config: &SourceConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "base-url '{}' must use http or https",
            config.base_url
        )));
    }

    Ok(())
}

/// Validates crawler pacing and retry settings
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    validate_seconds("delay-seconds", config.delay_seconds)?;
    validate_seconds("backoff-base-seconds", config.backoff_base_seconds)?;
    validate_seconds("backoff-cap-seconds", config.backoff_cap_seconds)?;
    validate_seconds("jitter-seconds", config.jitter_seconds)?;
    validate_seconds("rate-limit-wait-seconds", config.rate_limit_wait_seconds)?;

    if config.backoff_cap_seconds < config.backoff_base_seconds {
        return Err(ConfigError::Validation(format!(
            "backoff-cap-seconds ({}) must be >= backoff-base-seconds ({})",
            config.backoff_cap_seconds, config.backoff_base_seconds
        )));
    }

    let timeout = config.request_timeout_seconds;
    if timeout < 1 || timeout as f64 > MAX_WAIT_SECONDS {
        return Err(ConfigError::Validation(format!(
            "request-timeout-seconds must be between 1 and {}, got {}",
            MAX_WAIT_SECONDS, timeout
        )));
    }

    if config.node_retry_delay_seconds as f64 > MAX_WAIT_SECONDS {
        return Err(ConfigError::Validation(format!(
            "node-retry-delay-seconds must be <= {}, got {}",
            MAX_WAIT_SECONDS, config.node_retry_delay_seconds
        )));
    }

    if config.max_node_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max-node-attempts must be >= 1, got {}",
            config.max_node_attempts
        )));
    }

    Ok(())
}

fn validate_seconds(name: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || !(0.0..=MAX_WAIT_SECONDS).contains(&value) {
        return Err(ConfigError::Validation(format!(
            "{} must be between 0 and {}, got {}",
            name, MAX_WAIT_SECONDS, value
        )));
    }
    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    if config.archive_dir.is_empty() {
        return Err(ConfigError::Validation(
            "archive-dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates job entries: unique, file-name safe ids and usable roots
fn validate_jobs(jobs: &[JobEntry]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for job in jobs {
        validate_job_id(&job.id)?;

        if !seen.insert(job.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate job id '{}'",
                job.id
            )));
        }

        if let Some(forum_id) = &job.forum_id {
            if forum_id.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Job '{}' has an empty forum-id (omit it to start from the board index)",
                    job.id
                )));
            }
        }

        if job.thread_limit == Some(0) {
            return Err(ConfigError::Validation(format!(
                "Job '{}' thread-limit must be >= 1",
                job.id
            )));
        }
    }

    Ok(())
}

fn validate_job_id(id: &str) -> Result<(), ConfigError> {
    if id.is_empty() {
        return Err(ConfigError::Validation("Job id cannot be empty".to_string()));
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "Job id '{}' may only contain ASCII letters, digits, '-' and '_'",
            id
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    let local = parts[0];
    let domain = parts[1];

    if local.is_empty() || domain.is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_job_id() {
        assert!(validate_job_id("net54-forum_14").is_ok());

        assert!(validate_job_id("").is_err());
        assert!(validate_job_id("../escape").is_err());
        assert!(validate_job_id("with space").is_err());
    }

    #[test]
    fn test_duplicate_jobs_rejected() {
        let jobs = vec![
            JobEntry {
                id: "a".to_string(),
                forum_id: Some("1".to_string()),
                thread_limit: None,
            },
            JobEntry {
                id: "a".to_string(),
                forum_id: None,
                thread_limit: None,
            },
        ];
        assert!(matches!(
            validate_jobs(&jobs),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_job_roots() {
        let job = |forum_id: Option<&str>, thread_limit: Option<u32>| JobEntry {
            id: "net54".to_string(),
            forum_id: forum_id.map(str::to_string),
            thread_limit,
        };

        assert!(validate_jobs(&[job(Some("14"), None)]).is_ok());
        assert!(validate_jobs(&[job(None, Some(100))]).is_ok());

        assert!(validate_jobs(&[job(Some("  "), None)]).is_err());
        assert!(validate_jobs(&[job(None, Some(0))]).is_err());
    }

    #[test]
    fn test_backoff_cap_below_base_rejected() {
        let config = CrawlerConfig {
            backoff_base_seconds: 10.0,
            backoff_cap_seconds: 5.0,
            ..CrawlerConfig::default()
        };
        assert!(validate_crawler_config(&config).is_err());
    }

    #[test]
    fn test_negative_delay_rejected() {
        let config = CrawlerConfig {
            delay_seconds: -1.0,
            ..CrawlerConfig::default()
        };
        assert!(validate_crawler_config(&config).is_err());

        let config = CrawlerConfig {
            jitter_seconds: f64::NAN,
            ..CrawlerConfig::default()
        };
        assert!(validate_crawler_config(&config).is_err());
    }

    #[test]
    fn test_oversized_waits_rejected() {
        let config = CrawlerConfig {
            delay_seconds: 1e30,
            ..CrawlerConfig::default()
        };
        assert!(matches!(
            validate_crawler_config(&config),
            Err(ConfigError::Validation(_))
        ));

        let config = CrawlerConfig {
            backoff_cap_seconds: MAX_WAIT_SECONDS + 1.0,
            ..CrawlerConfig::default()
        };
        assert!(validate_crawler_config(&config).is_err());

        let config = CrawlerConfig {
            rate_limit_wait_seconds: f64::INFINITY,
            ..CrawlerConfig::default()
        };
        assert!(validate_crawler_config(&config).is_err());

        let config = CrawlerConfig {
            node_retry_delay_seconds: u64::MAX,
            ..CrawlerConfig::default()
        };
        assert!(validate_crawler_config(&config).is_err());

        let config = CrawlerConfig {
            request_timeout_seconds: 10_000_000,
            ..CrawlerConfig::default()
        };
        assert!(validate_crawler_config(&config).is_err());

        // The bound itself is accepted
        let config = CrawlerConfig {
            delay_seconds: MAX_WAIT_SECONDS,
            backoff_cap_seconds: MAX_WAIT_SECONDS,
            ..CrawlerConfig::default()
        };
        assert!(validate_crawler_config(&config).is_ok());
    }

    #[test]
    fn test_zero_node_attempts_rejected() {
        let config = CrawlerConfig {
            max_node_attempts: 0,
            ..CrawlerConfig::default()
        };
        assert!(validate_crawler_config(&config).is_err());
    }

    #[test]
    fn test_base_url_scheme() {
        let ok = SourceConfig {
            base_url: "https://forum.example.com".to_string(),
        };
        assert!(validate_source_config(&ok).is_ok());

        let bad = SourceConfig {
            base_url: "ftp://forum.example.com".to_string(),
        };
        assert!(validate_source_config(&bad).is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com").is_ok());

        assert!(validate_email("").is_err());
        assert!(validate_email("invalid").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("user@domain").is_err());
    }
}
