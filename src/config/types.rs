use crate::state::JobDefinition;
use serde::Deserialize;

/// Main configuration structure for the forum archiver
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
    #[serde(default, rename = "job")]
    pub jobs: Vec<JobEntry>,
}

impl Config {
    /// Looks up a job by id
    pub fn job(&self, id: &str) -> Option<&JobEntry> {
        self.jobs.iter().find(|j| j.id == id)
    }
}

/// The remote forum being archived
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the forum software (e.g. "https://www.net54baseball.com")
    #[serde(rename = "base-url")]
    pub base_url: String,
}

/// Crawl pacing, retry and ceiling configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Minimum spacing between outbound requests (seconds)
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: f64,

    /// Timeout applied to each HTTP request (seconds)
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// Retries after the first attempt of a single fetch
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay (seconds); doubles on each further retry
    #[serde(default = "default_backoff_base_seconds")]
    pub backoff_base_seconds: f64,

    /// Upper bound for a single backoff delay (seconds)
    #[serde(default = "default_backoff_cap_seconds")]
    pub backoff_cap_seconds: f64,

    /// Maximum random delay added on top of each backoff (seconds)
    #[serde(default = "default_jitter_seconds")]
    pub jitter_seconds: f64,

    /// Wait after an HTTP 429 that carries no Retry-After hint (seconds)
    #[serde(default = "default_rate_limit_wait_seconds")]
    pub rate_limit_wait_seconds: f64,

    /// Total attempts a node gets across all runs before it is abandoned
    #[serde(default = "default_max_node_attempts")]
    pub max_node_attempts: u32,

    /// Time a failed node waits before it becomes pending again (seconds)
    #[serde(default = "default_node_retry_delay_seconds")]
    pub node_retry_delay_seconds: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            delay_seconds: default_delay_seconds(),
            request_timeout_seconds: default_request_timeout_seconds(),
            max_retries: default_max_retries(),
            backoff_base_seconds: default_backoff_base_seconds(),
            backoff_cap_seconds: default_backoff_cap_seconds(),
            jitter_seconds: default_jitter_seconds(),
            rate_limit_wait_seconds: default_rate_limit_wait_seconds(),
            max_node_attempts: default_max_node_attempts(),
            node_retry_delay_seconds: default_node_retry_delay_seconds(),
        }
    }
}

fn default_delay_seconds() -> f64 {
    1.5
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_seconds() -> f64 {
    1.0
}

fn default_backoff_cap_seconds() -> f64 {
    60.0
}

fn default_jitter_seconds() -> f64 {
    0.5
}

fn default_rate_limit_wait_seconds() -> f64 {
    60.0
}

fn default_max_node_attempts() -> u32 {
    5
}

fn default_node_retry_delay_seconds() -> u64 {
    300
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite progress database
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Directory receiving the archived JSON records
    #[serde(rename = "archive-dir")]
    pub archive_dir: String,
}

/// One archive target
#[derive(Debug, Clone, Deserialize)]
pub struct JobEntry {
    /// Job identifier, used as the progress key and lock file name
    pub id: String,

    /// Remote id of the forum section the job starts from; without it the
    /// job starts from the board index and archives every forum listed there
    #[serde(default, rename = "forum-id")]
    pub forum_id: Option<String>,

    /// Most threads archived per forum
    #[serde(default, rename = "thread-limit")]
    pub thread_limit: Option<u32>,
}

impl JobEntry {
    /// The job's root in the progress store
    pub fn definition(&self) -> JobDefinition {
        match &self.forum_id {
            Some(forum_id) => JobDefinition::forum(&self.id, forum_id),
            None => JobDefinition::board(&self.id),
        }
    }

    /// Human-readable description of the job's root
    pub fn root_label(&self) -> String {
        match &self.forum_id {
            Some(forum_id) => format!("forum {}", forum_id),
            None => "board index".to_string(),
        }
    }
}
