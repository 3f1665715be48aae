//! Crawler module for fetching and archiving a forum hierarchy
//!
//! This module contains the core crawling logic, including:
//! - Request spacing (`RateLimiter`)
//! - HTTP fetching with retry logic (`RetryingFetcher`)
//! - The breadth-first crawl loop (`CrawlEngine`)
//! - Signal and deadline handling (`InterruptHandler`)

mod engine;
mod fetcher;
mod interrupt;
mod rate_limiter;

pub use engine::{CrawlEngine, EngineSettings, RunReport};
pub use fetcher::{
    build_http_client, parse_retry_after, FetchError, HttpTransport, RawPage, RetryPolicy,
    RetryingFetcher, Transport, TransportError,
};
pub use interrupt::{FinalStatus, InterruptHandler};
pub use rate_limiter::RateLimiter;

use crate::config::Config;
use crate::output::RecordWriter;
use crate::state::NodeRef;
use crate::storage::{open_storage, JobLock, ProgressStore, StorageError};
use crate::{ArchiveError, VBulletinSource};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Per-invocation choices that are not part of the configuration file
#[derive(Debug, Clone, Default)]
pub struct ArchiveOptions {
    /// Forget the job's progress and start again from its root
    pub fresh: bool,

    /// Move this Done node back to Pending before crawling
    pub rescrape: Option<NodeRef>,

    /// Re-walk listing pages to pick up threads posted since the last run
    pub refresh_listings: bool,

    /// Overrides the job's configured thread limit
    pub thread_limit: Option<u32>,

    /// Hash of the configuration file, recorded with the run
    pub config_hash: String,
}

/// Archives one configured job, resuming wherever it last stopped
///
/// This is the main entry point for a crawl. It will:
/// 1. Take the job's exclusive lock
/// 2. Open the progress store and apply `fresh`, `rescrape` and `refresh_listings`
/// 3. Build the transport, rate limiter and retry policy
/// 4. Run the crawl engine until completion, interruption or abort
///
/// # Arguments
///
/// * `config` - The archiver configuration
/// * `job_id` - Identifier of a job listed in the configuration
/// * `handler` - Shared stop flag
/// * `options` - Per-invocation options
///
/// # Returns
///
/// * `Ok(RunReport)` - The run ended (check `status` for how)
/// * `Err(ArchiveError)` - The run could not start
pub async fn archive(
    config: &Config,
    job_id: &str,
    handler: &InterruptHandler,
    options: &ArchiveOptions,
) -> Result<RunReport, ArchiveError> {
    let entry = config
        .job(job_id)
        .ok_or_else(|| ArchiveError::UnknownJob(job_id.to_string()))?;
    let job = entry.definition();

    let db_path = Path::new(&config.output.database_path);
    let lock_dir = db_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let _lock = JobLock::acquire(lock_dir, &job.id)?;

    let mut store = open_storage(db_path)?;
    if options.fresh {
        tracing::info!("Starting job {} fresh (discarding previous progress)", job.id);
        store.reset_job(&job.id)?;
    }
    if options.rescrape.is_some() || options.refresh_listings {
        // Nodes must exist before they can be re-queued
        store.load(&job)?;
    }
    if let Some(reference) = &options.rescrape {
        let node = store
            .find_node(&job.id, reference)?
            .ok_or_else(|| StorageError::UnknownNode {
                job_id: job.id.clone(),
                key: reference.key(),
            })?;
        store.rescrape(&job.id, node.id)?;
        tracing::info!("Node {} of job {} queued for re-scrape", reference, job.id);
    }
    if options.refresh_listings {
        store.refresh_listings(&job.id)?;
    }
    let thread_limit = options.thread_limit.or(entry.thread_limit);

    let transport = HttpTransport::new(
        &config.user_agent,
        Duration::from_secs(config.crawler.request_timeout_seconds),
    )?;
    let limiter = Arc::new(RateLimiter::from_secs_f64(config.crawler.delay_seconds));
    let fetcher = RetryingFetcher::new(
        Arc::new(transport),
        limiter,
        RetryPolicy::from_config(&config.crawler),
    );
    let source = VBulletinSource::new(&config.source.base_url)?;
    let writer = RecordWriter::new(&config.output.archive_dir);

    tracing::info!(
        "Archiving job {} ({}) from {} into {}",
        job.id,
        entry.root_label(),
        config.source.base_url,
        config.output.archive_dir
    );
    if let Some(limit) = thread_limit {
        tracing::info!("Archiving at most {} threads per forum", limit);
    }

    let mut engine = CrawlEngine::new(
        store,
        fetcher,
        Arc::new(source),
        writer,
        EngineSettings::from_config(&config.crawler).with_thread_limit(thread_limit),
    )
    .with_config_hash(&options.config_hash);

    Ok(engine.run(&job, handler).await)
}

/// Blocking entry point for operational wrappers without their own runtime
///
/// Builds a single-threaded runtime, listens for Ctrl+C/SIGTERM, stops
/// cleanly once `deadline` has elapsed, and archives the job.
///
/// # Returns
///
/// * `Ok(RunReport)` - The run ended (check `status` for how)
/// * `Err(ArchiveError)` - The runtime or the run could not start
pub fn run_job(
    config: &Config,
    job_id: &str,
    deadline: Option<Duration>,
    options: &ArchiveOptions,
) -> Result<RunReport, ArchiveError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let handler = InterruptHandler::new();
        handler.install_signal_handlers()?;
        if let Some(after) = deadline {
            handler.arm_deadline(after);
        }
        archive(config, job_id, &handler, options).await
    })
}
