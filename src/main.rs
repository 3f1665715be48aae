//! Forum Archiver main entry point
//!
//! This is the command-line interface for the resumable forum archiver.

use anyhow::Context;
use clap::Parser;
use forum_archiver::config::{load_config_with_hash, Config};
use forum_archiver::crawler::{archive, ArchiveOptions, FinalStatus, InterruptHandler};
use forum_archiver::output::print_statistics;
use forum_archiver::state::{NodeRef, NodeState};
use forum_archiver::storage::{open_storage, ProgressStore};
use forum_archiver::ArchiveError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Forum Archiver: a polite, resumable forum crawler
///
/// Walks each configured forum section (or the whole board index)
/// breadth-first: listing pages, threads, pages of posts. Every parsed entity
/// is written as a JSON record. Progress is committed after every page, so an
/// interrupted run picks up where it left off.
///
/// Exit status: 0 when every job completed, 75 when a job was interrupted
/// with work remaining, 1 when a job aborted.
#[derive(Parser, Debug)]
#[command(name = "forum-archiver")]
#[command(version = "1.0.0")]
#[command(about = "A polite, resumable forum archiver", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Only run this job (default: every job, in config order)
    #[arg(long, value_name = "ID")]
    job: Option<String>,

    /// Stop cleanly after this many minutes
    #[arg(long, value_name = "N")]
    deadline_minutes: Option<u64>,

    /// Discard the job's progress and start again from its root
    #[arg(long)]
    fresh: bool,

    /// Re-queue one archived node before crawling, e.g. `thread:900` or `post_page:900:2`
    #[arg(long, value_name = "KIND:ID[:PAGE]", requires = "job")]
    rescrape: Option<NodeRef>,

    /// Re-walk listing pages to pick up threads posted since the last run
    #[arg(long, conflicts_with = "fresh")]
    refresh_listings: bool,

    /// Archive at most N threads per forum (overrides the job's thread-limit)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    thread_limit: Option<u32>,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "fresh", "rescrape", "refresh_listings", "list_nodes"])]
    stats: bool,

    /// List the job's nodes (optionally only those in STATE) and exit
    #[arg(
        long,
        value_name = "STATE",
        num_args = 0..=1,
        default_missing_value = "all",
        conflicts_with_all = ["dry_run", "fresh", "rescrape", "refresh_listings"]
    )]
    list_nodes: Option<String>,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with_all = ["stats", "fresh", "rescrape", "refresh_listings"])]
    dry_run: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    let job_ids = select_jobs(&config, cli.job.as_deref())?;

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config, &job_ids);
        return Ok(());
    }
    if cli.stats {
        return handle_stats(&config, &job_ids);
    }
    if let Some(state) = cli.list_nodes.as_deref() {
        return handle_list_nodes(&config, &job_ids, state);
    }

    let options = ArchiveOptions {
        fresh: cli.fresh,
        rescrape: cli.rescrape,
        refresh_listings: cli.refresh_listings,
        thread_limit: cli.thread_limit,
        config_hash,
    };
    let status = handle_archive(&config, &job_ids, &options, cli.deadline_minutes).await?;

    std::process::exit(status.exit_code());
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("forum_archiver=info,warn"),
            1 => EnvFilter::new("forum_archiver=debug,info"),
            2 => EnvFilter::new("forum_archiver=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Resolves `--job` against the configuration
fn select_jobs(config: &Config, job: Option<&str>) -> anyhow::Result<Vec<String>> {
    match job {
        Some(id) => {
            if config.job(id).is_none() {
                anyhow::bail!(ArchiveError::UnknownJob(id.to_string()));
            }
            Ok(vec![id.to_string()])
        }
        None => {
            if config.jobs.is_empty() {
                anyhow::bail!("No [[job]] entries in the configuration");
            }
            Ok(config.jobs.iter().map(|j| j.id.clone()).collect())
        }
    }
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config, job_ids: &[String]) {
    println!("=== Forum Archiver Dry Run ===\n");

    println!("Source: {}", config.source.base_url);

    println!("\nCrawler Configuration:");
    println!("  Request delay: {}s", config.crawler.delay_seconds);
    println!("  Request timeout: {}s", config.crawler.request_timeout_seconds);
    println!("  Fetch retries: {}", config.crawler.max_retries);
    println!(
        "  Backoff: {}s base, {}s cap, {}s jitter",
        config.crawler.backoff_base_seconds,
        config.crawler.backoff_cap_seconds,
        config.crawler.jitter_seconds
    );
    println!("  Rate-limit wait: {}s", config.crawler.rate_limit_wait_seconds);
    println!("  Node attempts: {}", config.crawler.max_node_attempts);
    println!("  Node retry delay: {}s", config.crawler.node_retry_delay_seconds);

    println!("\nUser Agent:");
    println!("  Name: {}", config.user_agent.crawler_name);
    println!("  Version: {}", config.user_agent.crawler_version);
    println!("  Contact URL: {}", config.user_agent.contact_url);
    println!("  Contact Email: {}", config.user_agent.contact_email);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Records: {}", config.output.archive_dir);

    println!("\nJobs ({}):", job_ids.len());
    for entry in config.jobs.iter().filter(|j| job_ids.contains(&j.id)) {
        match entry.thread_limit {
            Some(limit) => println!(
                "  - {} ({}, at most {} threads per forum)",
                entry.id,
                entry.root_label(),
                limit
            ),
            None => println!("  - {} ({})", entry.id, entry.root_label()),
        }
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows per-job statistics from the database
fn handle_stats(config: &Config, job_ids: &[String]) -> anyhow::Result<()> {
    let db_path = Path::new(&config.output.database_path);
    println!("Database: {}\n", db_path.display());

    if !db_path.exists() {
        println!("No progress recorded yet");
        return Ok(());
    }

    let storage = open_storage(db_path)
        .with_context(|| format!("Failed to open {}", db_path.display()))?;

    for job_id in job_ids {
        let stats = storage.stats(job_id)?;
        let last_run = storage.latest_run(job_id)?;
        print_statistics(&stats, last_run.as_ref());
    }

    Ok(())
}

/// Handles the --list-nodes mode: prints each node with its reference and state
///
/// The first column is the `KIND:ID:PAGE` reference accepted by `--rescrape`.
fn handle_list_nodes(config: &Config, job_ids: &[String], state: &str) -> anyhow::Result<()> {
    let filter = match state {
        "all" => None,
        other => Some(NodeState::from_db_string(other).with_context(|| {
            format!(
                "Unknown state '{}' (expected pending, in_progress, done, failed or abandoned)",
                other
            )
        })?),
    };

    let db_path = Path::new(&config.output.database_path);
    if !db_path.exists() {
        println!("No progress recorded yet");
        return Ok(());
    }

    let storage = open_storage(db_path)
        .with_context(|| format!("Failed to open {}", db_path.display()))?;

    for job_id in job_ids {
        let nodes = storage.nodes(job_id, filter)?;
        println!("Job {} ({} nodes)", job_id, nodes.len());
        for node in nodes {
            let error = node.last_error.as_deref().unwrap_or("");
            println!(
                "  {:<24} {:<12} attempts={} {}",
                node.key(),
                node.state,
                node.attempt_count,
                error
            );
        }
    }

    Ok(())
}

/// Handles the main archive operation: runs the selected jobs in order
///
/// # Returns
///
/// The worst final status across the jobs that ran
async fn handle_archive(
    config: &Config,
    job_ids: &[String],
    options: &ArchiveOptions,
    deadline_minutes: Option<u64>,
) -> anyhow::Result<FinalStatus> {
    let handler = InterruptHandler::new();
    handler
        .install_signal_handlers()
        .context("Failed to install signal handlers")?;
    if let Some(minutes) = deadline_minutes {
        tracing::info!("Stopping after {} minutes", minutes);
        handler.arm_deadline(Duration::from_secs(minutes.saturating_mul(60)));
    }

    let mut worst = FinalStatus::Completed;
    for job_id in job_ids {
        if handler.is_stop_requested() {
            // Jobs that never started still have work remaining
            worst = worst.worst(FinalStatus::Interrupted);
            break;
        }

        let status = match archive(config, job_id, &handler, options).await {
            Ok(report) => {
                if let Some(error) = &report.error {
                    tracing::error!("Job {} aborted: {}", report.job_id, error);
                }
                report.status
            }
            Err(e) => {
                tracing::error!("Job {} could not run: {}", job_id, e);
                FinalStatus::Aborted
            }
        };

        worst = worst.worst(status);
        if status == FinalStatus::Interrupted {
            break;
        }
    }

    tracing::info!("Finished with status {}", worst);
    Ok(worst)
}
