//! Crawl engine - main crawl orchestration logic
//!
//! This module contains the main crawl loop that coordinates all aspects of
//! archiving one job, including:
//! - Loading and repairing the job's progress snapshot
//! - Picking the next node breadth-first
//! - Fetching, parsing and writing each node as one unit
//! - Recording every outcome in the progress store
//! - Stopping cleanly between units when interrupted

use crate::config::CrawlerConfig;
use crate::crawler::{FinalStatus, InterruptHandler, RetryingFetcher};
use crate::output::{JobStats, RecordWriter};
use crate::source::Source;
use crate::state::{
    DiscoveredNode, FailureKind, HierarchyNode, JobDefinition, NodeKind, NodeRef, NodeState,
    Relation,
};
use crate::storage::{ProgressStore, StorageResult};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Node-level retry settings (distinct from per-fetch retries) and scope limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Total attempts a node gets across all runs
    pub max_node_attempts: u32,

    /// How long a Failed node waits before it is pending again
    pub node_retry_delay: Duration,

    /// Most threads archived per forum; listing pages past it are not walked
    pub thread_limit: Option<u32>,
}

impl EngineSettings {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            max_node_attempts: config.max_node_attempts,
            node_retry_delay: Duration::from_secs(config.node_retry_delay_seconds),
            thread_limit: None,
        }
    }

    pub fn with_thread_limit(mut self, thread_limit: Option<u32>) -> Self {
        self.thread_limit = thread_limit;
        self
    }
}

/// What a run reports back to its caller
#[derive(Debug, Clone)]
pub struct RunReport {
    pub job_id: String,
    pub run_id: Option<i64>,
    pub status: FinalStatus,

    /// Nodes processed by this run, successfully or not
    pub processed: u64,

    /// Counts by state after the run
    pub stats: JobStats,

    /// Set when the run was aborted
    pub error: Option<String>,
}

/// Drives one job through its hierarchy
pub struct CrawlEngine<S: ProgressStore> {
    store: S,
    fetcher: RetryingFetcher,
    source: Arc<dyn Source>,
    writer: RecordWriter,
    settings: EngineSettings,
    config_hash: String,
    processed: u64,
}

impl<S: ProgressStore> CrawlEngine<S> {
    /// Creates a new engine instance
    ///
    /// # Arguments
    ///
    /// * `store` - Durable progress store
    /// * `fetcher` - Rate-limited, retrying fetcher
    /// * `source` - Site-specific targets and parsing
    /// * `writer` - Record writer for parsed entities
    /// * `settings` - Node-level retry settings
    pub fn new(
        store: S,
        fetcher: RetryingFetcher,
        source: Arc<dyn Source>,
        writer: RecordWriter,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            fetcher,
            source,
            writer,
            settings,
            config_hash: String::new(),
            processed: 0,
        }
    }

    /// Sets the configuration hash recorded with each run
    pub fn with_config_hash(mut self, config_hash: impl Into<String>) -> Self {
        self.config_hash = config_hash.into();
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Counts a job's nodes by state
    pub fn stats(&self, job_id: &str) -> StorageResult<JobStats> {
        self.store.stats(job_id)
    }

    /// Runs a job to completion, interruption or abort, recording the run
    ///
    /// Never fails: storage faults become `FinalStatus::Aborted` with the
    /// error text in the report.
    pub async fn run(&mut self, job: &JobDefinition, handler: &InterruptHandler) -> RunReport {
        self.processed = 0;

        let mut run_id = None;
        let result = match self.prepare(job) {
            Ok(()) => match self.store.create_run(&job.id, &self.config_hash) {
                Ok(id) => {
                    run_id = Some(id);
                    tracing::info!("Starting run {} of job {}", id, job.id);
                    self.crawl_loop(&job.id, handler.token()).await
                }
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        let (mut status, mut error) = match result {
            Ok(status) => (status, None),
            Err(e) => {
                tracing::error!("Job {} aborted: {}", job.id, e);
                (FinalStatus::Aborted, Some(e.to_string()))
            }
        };

        if let Some(id) = run_id {
            if let Err(e) = self.store.finish_run(id, status.into(), error.as_deref()) {
                tracing::error!("Failed to record the end of run {}: {}", id, e);
                status = FinalStatus::Aborted;
                error.get_or_insert_with(|| e.to_string());
            }
        }

        let stats = self.store.stats(&job.id).unwrap_or_else(|e| {
            tracing::warn!("Failed to read stats for job {}: {}", job.id, e);
            JobStats {
                job_id: job.id.clone(),
                ..JobStats::default()
            }
        });

        tracing::info!(
            "Job {} {}: {} nodes processed this run, {}",
            job.id,
            status,
            self.processed,
            stats
        );
        if stats.abandoned > 0 {
            tracing::warn!(
                "Job {} has {} abandoned nodes; raise max-node-attempts to retry them",
                job.id,
                stats.abandoned
            );
        }

        RunReport {
            job_id: job.id.clone(),
            run_id,
            status,
            processed: self.processed,
            stats,
            error,
        }
    }

    /// Loads, repairs and crawls a job without run bookkeeping
    ///
    /// # Returns
    ///
    /// * `Ok(FinalStatus::Completed)` - No pending or retryable nodes remain
    /// * `Ok(FinalStatus::Interrupted)` - Stopped with work remaining
    /// * `Err(StorageError)` - Fatal storage fault
    pub async fn crawl(
        &mut self,
        job: &JobDefinition,
        cancel: &CancellationToken,
    ) -> StorageResult<FinalStatus> {
        self.prepare(job)?;
        self.crawl_loop(&job.id, cancel).await
    }

    /// Loads the snapshot and puts interrupted or revivable nodes back to Pending
    fn prepare(&mut self, job: &JobDefinition) -> StorageResult<()> {
        let snapshot = self.store.load(job)?;
        let counts = snapshot.counts();
        tracing::info!(
            "Loaded job {} ({} source): {} nodes ({} done, {} pending)",
            job.id,
            self.source.name(),
            snapshot.nodes.len(),
            counts.get(&NodeState::Done).copied().unwrap_or(0),
            counts.get(&NodeState::Pending).copied().unwrap_or(0)
        );

        let report = self.store.recover(&job.id, self.settings.max_node_attempts)?;
        if report.reset_in_progress > 0 {
            tracing::info!(
                "Resuming {} nodes that were in progress when the last run ended",
                report.reset_in_progress
            );
        }
        if report.revived_abandoned > 0 {
            tracing::info!(
                "Revived {} abandoned nodes under the current attempt ceiling",
                report.revived_abandoned
            );
        }

        Ok(())
    }

    async fn crawl_loop(
        &mut self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> StorageResult<FinalStatus> {
        let retry_delay = chrono::Duration::from_std(self.settings.node_retry_delay)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let start_time = Instant::now();

        loop {
            if cancel.is_cancelled() {
                let stats = self.store.stats(job_id)?;
                return Ok(if stats.remaining() > 0 {
                    FinalStatus::Interrupted
                } else {
                    FinalStatus::Completed
                });
            }

            let node = match self.store.next_pending(job_id, retry_delay)? {
                Some(node) => node,
                None => match self.store.next_retry_at(job_id, retry_delay)? {
                    Some(at) => {
                        let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                        tracing::info!(
                            "Waiting {:.0}s for failed nodes of job {} to become eligible",
                            wait.as_secs_f64(),
                            job_id
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(wait) => {}
                            _ = cancel.cancelled() => {}
                        }
                        continue;
                    }
                    None => {
                        tracing::info!("No pending nodes left in job {}", job_id);
                        return Ok(FinalStatus::Completed);
                    }
                },
            };

            self.process_node(&node).await?;
            self.processed += 1;

            // Progress reporting every 10 nodes
            if self.processed % 10 == 0 {
                let stats = self.store.stats(job_id)?;
                let rate = self.processed as f64 / start_time.elapsed().as_secs_f64().max(f64::EPSILON);
                tracing::info!(
                    "Progress: {} nodes processed, {} done, {} pending, {:.2} nodes/sec",
                    self.processed,
                    stats.done,
                    stats.pending + stats.failed,
                    rate
                );
            }
        }
    }

    /// Processes a single node as one fetch/parse/write/mark unit
    ///
    /// Fetch and parse failures are recorded on the node; only storage
    /// faults are returned.
    async fn process_node(&mut self, node: &HierarchyNode) -> StorageResult<NodeState> {
        tracing::debug!(
            "Processing {} {} page {} (depth {})",
            node.kind,
            node.remote_id,
            node.cursor,
            node.depth
        );
        self.store.mark_in_progress(&node.job_id, node.id)?;

        let target = match self.source.target(node) {
            Ok(url) => url,
            Err(e) => return self.fail(node, FailureKind::PermanentFetch, &e.to_string()),
        };

        let raw = match self.fetcher.fetch(&target).await {
            Ok(raw) => raw,
            Err(e) => return self.fail(node, e.failure_kind(), &e.to_string()),
        };

        let parsed = match self.source.parse(&raw, node) {
            Ok(parsed) => parsed,
            Err(e) => return self.fail(node, FailureKind::Parse, &e.to_string()),
        };

        let discovered = match (node.kind, self.settings.thread_limit) {
            (NodeKind::Forum, Some(limit)) => self.limit_threads(node, parsed.discovered, limit)?,
            _ => parsed.discovered,
        };

        self.writer.write(&parsed.entity)?;
        let added = self.store.mark_done(&node.job_id, node.id, &discovered)?;

        tracing::debug!(
            "Done {} {} page {}: {} new nodes",
            node.kind,
            node.remote_id,
            node.cursor,
            added
        );
        Ok(NodeState::Done)
    }

    /// Keeps the threads of a listing page that fit under `limit`
    ///
    /// Threads already in the job do not use up the limit again. Once the
    /// forum is full, the page's next-page link is dropped as well.
    fn limit_threads(
        &self,
        node: &HierarchyNode,
        discovered: Vec<DiscoveredNode>,
        limit: u32,
    ) -> StorageResult<Vec<DiscoveredNode>> {
        let limit = u64::from(limit);
        let mut known = self
            .store
            .count_children(&node.job_id, NodeKind::Thread, &node.remote_id)?;

        let (threads, rest): (Vec<_>, Vec<_>) = discovered
            .into_iter()
            .partition(|found| found.kind == NodeKind::Thread && found.relation == Relation::Child);

        let mut kept = Vec::with_capacity(threads.len() + rest.len());
        let mut skipped = 0;
        for thread in threads {
            let reference = NodeRef {
                kind: thread.kind,
                remote_id: thread.remote_id.clone(),
                cursor: thread.cursor,
            };
            if self.store.find_node(&node.job_id, &reference)?.is_some() {
                kept.push(thread);
            } else if known < limit {
                known += 1;
                kept.push(thread);
            } else {
                skipped += 1;
            }
        }

        let full = known >= limit;
        kept.extend(
            rest.into_iter()
                .filter(|found| !(full && found.relation == Relation::NextPage)),
        );

        if full {
            tracing::info!(
                "Forum {} reached its limit of {} threads ({} skipped on page {})",
                node.remote_id,
                limit,
                skipped,
                node.cursor
            );
        }

        Ok(kept)
    }

    fn fail(&mut self, node: &HierarchyNode, kind: FailureKind, reason: &str) -> StorageResult<NodeState> {
        let state = self.store.mark_failed(
            &node.job_id,
            node.id,
            kind,
            reason,
            self.settings.max_node_attempts,
        )?;

        match state {
            NodeState::Abandoned => tracing::warn!(
                "Abandoned {} {} page {} after {} attempts: {}",
                node.kind,
                node.remote_id,
                node.cursor,
                node.attempt_count + 1,
                reason
            ),
            _ => tracing::warn!(
                "Failed {} {} page {} ({}): {}",
                node.kind,
                node.remote_id,
                node.cursor,
                kind,
                reason
            ),
        }

        Ok(state)
    }
}
