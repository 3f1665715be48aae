//! Storage traits and error types
//!
//! This module defines the trait interface for progress store backends and
//! associated error types.

use crate::output::JobStats;
use crate::state::{
    DiscoveredNode, FailureKind, HierarchyNode, JobDefinition, NodeKind, NodeRef, NodeState,
    ProgressSnapshot,
};
use crate::storage::{RecoveryReport, RunRecord, RunStatus};
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations
///
/// Every variant is fatal for a crawl run: the engine stops and reports
/// `Aborted`, leaving everything already committed intact.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Node {node_id} not found in job {job_id}")]
    NodeNotFound { job_id: String, node_id: i64 },

    #[error("No node {key} in job {job_id}")]
    UnknownNode { job_id: String, key: String },

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Invalid state transition for node {node_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        node_id: i64,
        from: NodeState,
        to: NodeState,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable record of crawl progress
///
/// Every mutating call is one atomic transaction that is committed to disk
/// before it returns, so the process may die between any two calls.
pub trait ProgressStore {
    // ===== Snapshot =====

    /// Returns the persisted snapshot of a job
    ///
    /// A job seen for the first time is created and seeded with its root
    /// node in `Pending` state.
    fn load(&mut self, job: &JobDefinition) -> StorageResult<ProgressSnapshot>;

    /// Repairs a snapshot left behind by an earlier run
    ///
    /// `InProgress` nodes (the process died mid-unit) go back to `Pending`,
    /// and `Abandoned` nodes below the current attempt ceiling are revived.
    fn recover(&mut self, job_id: &str, max_node_attempts: u32) -> StorageResult<RecoveryReport>;

    /// Gets a single node
    fn get_node(&self, job_id: &str, node_id: i64) -> StorageResult<HierarchyNode>;

    /// Looks a node up by kind, remote id and page
    fn find_node(&self, job_id: &str, node: &NodeRef) -> StorageResult<Option<HierarchyNode>>;

    /// Lists a job's nodes in id order, optionally only those in `state`
    fn nodes(&self, job_id: &str, state: Option<NodeState>) -> StorageResult<Vec<HierarchyNode>>;

    /// Counts nodes of `kind` whose enclosing entity is `parent_remote_id`
    fn count_children(
        &self,
        job_id: &str,
        kind: NodeKind,
        parent_remote_id: &str,
    ) -> StorageResult<u64>;

    // ===== Scheduling =====

    /// Returns the next node to work on, breadth-first
    ///
    /// `Failed` nodes whose last attempt is older than `retry_delay` are moved
    /// back to `Pending` first. Among pending nodes the shallowest wins; ties
    /// go to the lowest node id.
    fn next_pending(
        &mut self,
        job_id: &str,
        retry_delay: Duration,
    ) -> StorageResult<Option<HierarchyNode>>;

    /// Returns when the earliest `Failed` node becomes eligible again
    fn next_retry_at(
        &self,
        job_id: &str,
        retry_delay: Duration,
    ) -> StorageResult<Option<DateTime<Utc>>>;

    // ===== Transitions =====

    /// Pending -> InProgress
    fn mark_in_progress(&mut self, job_id: &str, node_id: i64) -> StorageResult<()>;

    /// InProgress -> Done, inserting the discovered nodes in the same transaction
    ///
    /// When the page revealed at least one new child and its next page is
    /// already Done (after a listing refresh), that next page goes back to
    /// Pending so the walk continues until a page adds nothing new.
    ///
    /// Returns the number of nodes that were new to the job.
    fn mark_done(
        &mut self,
        job_id: &str,
        node_id: i64,
        discovered: &[DiscoveredNode],
    ) -> StorageResult<usize>;

    /// InProgress -> Failed, or Abandoned once the attempt ceiling is reached
    ///
    /// Returns the state the node ended up in.
    fn mark_failed(
        &mut self,
        job_id: &str,
        node_id: i64,
        kind: FailureKind,
        reason: &str,
        max_node_attempts: u32,
    ) -> StorageResult<NodeState>;

    /// Done -> Pending, for an explicit re-scrape
    fn rescrape(&mut self, job_id: &str, node_id: i64) -> StorageResult<()>;

    /// Done -> Pending for the first page of every listing (board and forums)
    ///
    /// All listings move in one transaction. Returns how many were re-queued.
    fn refresh_listings(&mut self, job_id: &str) -> StorageResult<usize>;

    /// Forgets every node of a job; the next `load` starts from the root again
    fn reset_job(&mut self, job_id: &str) -> StorageResult<()>;

    // ===== Statistics =====

    /// Counts a job's nodes by state
    fn stats(&self, job_id: &str) -> StorageResult<JobStats>;

    // ===== Run Management =====

    /// Records the start of a run
    fn create_run(&mut self, job_id: &str, config_hash: &str) -> StorageResult<i64>;

    /// Records how a run ended
    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> StorageResult<()>;

    /// Gets the most recent run of a job
    fn latest_run(&self, job_id: &str) -> StorageResult<Option<RunRecord>>;
}
