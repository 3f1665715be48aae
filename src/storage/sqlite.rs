//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the ProgressStore trait.

use crate::output::JobStats;
use crate::state::{
    node_key, CrawlJob, DiscoveredNode, FailureKind, HierarchyNode, JobDefinition, NodeKind,
    NodeRef, NodeState, ProgressSnapshot, Relation,
};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{ProgressStore, StorageError, StorageResult};
use crate::storage::{RecoveryReport, RunRecord, RunStatus};
use crate::ArchiveError;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::HashMap;
use std::path::Path;

const NODE_COLUMNS: &str = "id, job_id, parent_id, kind, remote_id, parent_remote_id, cursor, depth,
     state, attempt_count, last_attempt_at, failure_kind, last_error, completed_seq";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(ArchiveError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, ArchiveError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = init_database(path)?;
        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, ArchiveError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn get_job(&self, job_id: &str) -> StorageResult<CrawlJob> {
        let job = self
            .conn
            .query_row(
                "SELECT id, root_kind, root_remote_id, created_at FROM jobs WHERE id = ?1",
                params![job_id],
                |row| {
                    Ok(CrawlJob {
                        id: row.get(0)?,
                        root_kind: parse_kind(row, 1)?,
                        root_remote_id: row.get(2)?,
                        created_at: parse_timestamp(row, 3)?,
                    })
                },
            )
            .optional()?;

        job.ok_or_else(|| StorageError::JobNotFound(job_id.to_string()))
    }

}

/// Loads a node inside an open transaction
fn fetch_node(conn: &Connection, job_id: &str, node_id: i64) -> StorageResult<HierarchyNode> {
    let node = conn
        .query_row(
            &format!(
                "SELECT {} FROM nodes WHERE job_id = ?1 AND id = ?2",
                NODE_COLUMNS
            ),
            params![job_id, node_id],
            node_from_row,
        )
        .optional()?;

    node.ok_or_else(|| StorageError::NodeNotFound {
        job_id: job_id.to_string(),
        node_id,
    })
}

fn require_state(node: &HierarchyNode, expected: NodeState, to: NodeState) -> StorageResult<()> {
    if node.state != expected {
        return Err(StorageError::InvalidTransition {
            node_id: node.id,
            from: node.state,
            to,
        });
    }
    Ok(())
}

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<HierarchyNode> {
    let last_attempt_at: Option<String> = row.get(10)?;
    let failure_kind: Option<String> = row.get(11)?;

    Ok(HierarchyNode {
        id: row.get(0)?,
        job_id: row.get(1)?,
        parent_id: row.get(2)?,
        kind: parse_kind(row, 3)?,
        remote_id: row.get(4)?,
        parent_remote_id: row.get(5)?,
        cursor: row.get(6)?,
        depth: row.get(7)?,
        state: parse_state(row, 8)?,
        attempt_count: row.get(9)?,
        last_attempt_at: last_attempt_at.and_then(|s| s.parse::<DateTime<Utc>>().ok()),
        failure_kind: failure_kind.as_deref().and_then(FailureKind::from_db_string),
        last_error: row.get(12)?,
        completed_seq: row.get(13)?,
    })
}

fn parse_kind(row: &Row<'_>, idx: usize) -> rusqlite::Result<NodeKind> {
    let value: String = row.get(idx)?;
    NodeKind::from_db_string(&value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown node kind '{}'", value).into(),
        )
    })
}

fn parse_state(row: &Row<'_>, idx: usize) -> rusqlite::Result<NodeState> {
    let value: String = row.get(idx)?;
    NodeState::from_db_string(&value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown node state '{}'", value).into(),
        )
    })
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let value: String = row.get(idx)?;
    value.parse::<DateTime<Utc>>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
    })
}

/// Fixed-width UTC timestamps so string comparison in SQL matches time order
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl ProgressStore for SqliteStorage {
    // ===== Snapshot =====

    fn load(&mut self, job: &JobDefinition) -> StorageResult<ProgressSnapshot> {
        let now = timestamp(Utc::now());
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT OR IGNORE INTO jobs (id, root_kind, root_remote_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![job.id, job.root_kind.to_db_string(), job.root_remote_id, now],
        )?;

        let node_count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM nodes WHERE job_id = ?1",
            params![job.id],
            |row| row.get(0),
        )?;

        if node_count == 0 {
            tx.execute(
                "UPDATE jobs SET root_kind = ?1, root_remote_id = ?2 WHERE id = ?3",
                params![job.root_kind.to_db_string(), job.root_remote_id, job.id],
            )?;
            tx.execute(
                "INSERT INTO nodes (job_id, node_key, parent_id, kind, remote_id, parent_remote_id,
                 cursor, depth, state, discovered_at)
                 VALUES (?1, ?2, NULL, ?3, ?4, NULL, 1, 0, ?5, ?6)",
                params![
                    job.id,
                    node_key(job.root_kind, &job.root_remote_id, 1),
                    job.root_kind.to_db_string(),
                    job.root_remote_id,
                    NodeState::Pending.to_db_string(),
                    now
                ],
            )?;
            tracing::info!(
                "Seeded job {} with root {} {}",
                job.id,
                job.root_kind,
                job.root_remote_id
            );
        }

        tx.commit()?;

        let stored = self.get_job(&job.id)?;
        if stored.root_kind != job.root_kind || stored.root_remote_id != job.root_remote_id {
            tracing::warn!(
                "Job {} was created with root {} {}, ignoring configured root {} {} (use --fresh to restart)",
                job.id,
                stored.root_kind,
                stored.root_remote_id,
                job.root_kind,
                job.root_remote_id
            );
        }

        let nodes = self.nodes(&job.id, None)?;
        Ok(ProgressSnapshot { job: stored, nodes })
    }

    fn recover(&mut self, job_id: &str, max_node_attempts: u32) -> StorageResult<RecoveryReport> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let reset_in_progress = tx.execute(
            "UPDATE nodes SET state = ?1 WHERE job_id = ?2 AND state = ?3",
            params![
                NodeState::Pending.to_db_string(),
                job_id,
                NodeState::InProgress.to_db_string()
            ],
        )?;

        let revived_abandoned = tx.execute(
            "UPDATE nodes SET state = ?1 WHERE job_id = ?2 AND state = ?3 AND attempt_count < ?4",
            params![
                NodeState::Pending.to_db_string(),
                job_id,
                NodeState::Abandoned.to_db_string(),
                max_node_attempts
            ],
        )?;

        tx.commit()?;

        Ok(RecoveryReport {
            reset_in_progress,
            revived_abandoned,
        })
    }

    fn get_node(&self, job_id: &str, node_id: i64) -> StorageResult<HierarchyNode> {
        fetch_node(&self.conn, job_id, node_id)
    }

    fn find_node(&self, job_id: &str, node: &NodeRef) -> StorageResult<Option<HierarchyNode>> {
        let found = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM nodes WHERE job_id = ?1 AND node_key = ?2",
                    NODE_COLUMNS
                ),
                params![job_id, node.key()],
                node_from_row,
            )
            .optional()?;

        Ok(found)
    }

    fn nodes(&self, job_id: &str, state: Option<NodeState>) -> StorageResult<Vec<HierarchyNode>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM nodes WHERE job_id = ?1 AND (?2 IS NULL OR state = ?2) ORDER BY id ASC",
            NODE_COLUMNS
        ))?;

        let nodes = stmt
            .query_map(
                params![job_id, state.map(|s| s.to_db_string())],
                node_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(nodes)
    }

    fn count_children(
        &self,
        job_id: &str,
        kind: NodeKind,
        parent_remote_id: &str,
    ) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM nodes WHERE job_id = ?1 AND kind = ?2 AND parent_remote_id = ?3",
            params![job_id, kind.to_db_string(), parent_remote_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ===== Scheduling =====

    fn next_pending(
        &mut self,
        job_id: &str,
        retry_delay: Duration,
    ) -> StorageResult<Option<HierarchyNode>> {
        let cutoff = timestamp(Utc::now() - retry_delay);
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let requeued = tx.execute(
            "UPDATE nodes SET state = ?1 WHERE job_id = ?2 AND state = ?3
             AND (last_attempt_at IS NULL OR last_attempt_at <= ?4)",
            params![
                NodeState::Pending.to_db_string(),
                job_id,
                NodeState::Failed.to_db_string(),
                cutoff
            ],
        )?;
        if requeued > 0 {
            tracing::debug!("Requeued {} failed nodes in job {}", requeued, job_id);
        }

        let node = tx
            .query_row(
                &format!(
                    "SELECT {} FROM nodes WHERE job_id = ?1 AND state = ?2
                     ORDER BY depth ASC, id ASC LIMIT 1",
                    NODE_COLUMNS
                ),
                params![job_id, NodeState::Pending.to_db_string()],
                node_from_row,
            )
            .optional()?;

        tx.commit()?;
        Ok(node)
    }

    fn next_retry_at(
        &self,
        job_id: &str,
        retry_delay: Duration,
    ) -> StorageResult<Option<DateTime<Utc>>> {
        let earliest: Option<String> = self.conn.query_row(
            "SELECT MIN(COALESCE(last_attempt_at, '')) FROM nodes WHERE job_id = ?1 AND state = ?2",
            params![job_id, NodeState::Failed.to_db_string()],
            |row| row.get(0),
        )?;

        Ok(earliest.map(|s| match s.parse::<DateTime<Utc>>() {
            Ok(at) => at + retry_delay,
            Err(_) => Utc::now(),
        }))
    }

    // ===== Transitions =====

    fn mark_in_progress(&mut self, job_id: &str, node_id: i64) -> StorageResult<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let node = fetch_node(&tx, job_id, node_id)?;
        require_state(&node, NodeState::Pending, NodeState::InProgress)?;

        tx.execute(
            "UPDATE nodes SET state = ?1, last_attempt_at = ?2 WHERE id = ?3",
            params![
                NodeState::InProgress.to_db_string(),
                timestamp(Utc::now()),
                node_id
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn mark_done(
        &mut self,
        job_id: &str,
        node_id: i64,
        discovered: &[DiscoveredNode],
    ) -> StorageResult<usize> {
        let now = timestamp(Utc::now());
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let node = fetch_node(&tx, job_id, node_id)?;
        require_state(&node, NodeState::InProgress, NodeState::Done)?;

        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(completed_seq), 0) + 1 FROM nodes WHERE job_id = ?1",
            params![job_id],
            |row| row.get(0),
        )?;

        tx.execute(
            "UPDATE nodes SET state = ?1, completed_seq = ?2, failure_kind = NULL, last_error = NULL
             WHERE id = ?3",
            params![NodeState::Done.to_db_string(), seq, node_id],
        )?;

        // Children first, so the next-page decision below knows whether this
        // page revealed anything new
        let (children, next_pages): (Vec<&DiscoveredNode>, Vec<&DiscoveredNode>) = discovered
            .iter()
            .partition(|found| found.relation == Relation::Child);

        let mut new_children = 0;
        let mut inserted = 0;
        for found in children.into_iter().chain(next_pages) {
            let (parent_id, parent_remote_id, depth) = match found.relation {
                Relation::Child => (Some(node.id), Some(node.remote_id.clone()), node.depth + 1),
                Relation::NextPage => (node.parent_id, node.parent_remote_id.clone(), node.depth),
            };
            let key = node_key(found.kind, &found.remote_id, found.cursor);

            let added = tx.execute(
                "INSERT OR IGNORE INTO nodes (job_id, node_key, parent_id, kind, remote_id,
                 parent_remote_id, cursor, depth, state, discovered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    job_id,
                    key,
                    parent_id,
                    found.kind.to_db_string(),
                    found.remote_id,
                    parent_remote_id,
                    found.cursor,
                    depth,
                    NodeState::Pending.to_db_string(),
                    now
                ],
            )?;
            inserted += added;

            match found.relation {
                Relation::Child => new_children += added,
                Relation::NextPage if added == 0 && new_children > 0 => {
                    let requeued = tx.execute(
                        "UPDATE nodes SET state = ?1, completed_seq = NULL
                         WHERE job_id = ?2 AND node_key = ?3 AND state = ?4",
                        params![
                            NodeState::Pending.to_db_string(),
                            job_id,
                            key,
                            NodeState::Done.to_db_string()
                        ],
                    )?;
                    if requeued > 0 {
                        tracing::debug!(
                            "Re-queued {} after {} new children on {}",
                            key,
                            new_children,
                            node.key()
                        );
                    }
                }
                Relation::NextPage => {}
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    fn mark_failed(
        &mut self,
        job_id: &str,
        node_id: i64,
        kind: FailureKind,
        reason: &str,
        max_node_attempts: u32,
    ) -> StorageResult<NodeState> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let node = fetch_node(&tx, job_id, node_id)?;
        require_state(&node, NodeState::InProgress, NodeState::Failed)?;

        let attempts = node.attempt_count + 1;
        let state = if attempts >= max_node_attempts {
            NodeState::Abandoned
        } else {
            NodeState::Failed
        };

        tx.execute(
            "UPDATE nodes SET state = ?1, attempt_count = ?2, failure_kind = ?3, last_error = ?4,
             last_attempt_at = ?5 WHERE id = ?6",
            params![
                state.to_db_string(),
                attempts,
                kind.to_db_string(),
                reason,
                timestamp(Utc::now()),
                node_id
            ],
        )?;

        tx.commit()?;
        Ok(state)
    }

    fn rescrape(&mut self, job_id: &str, node_id: i64) -> StorageResult<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let node = fetch_node(&tx, job_id, node_id)?;
        require_state(&node, NodeState::Done, NodeState::Pending)?;

        tx.execute(
            "UPDATE nodes SET state = ?1, completed_seq = NULL WHERE id = ?2",
            params![NodeState::Pending.to_db_string(), node_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn refresh_listings(&mut self, job_id: &str) -> StorageResult<usize> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let requeued = tx.execute(
            "UPDATE nodes SET state = ?1, completed_seq = NULL
             WHERE job_id = ?2 AND state = ?3 AND cursor = 1 AND kind IN (?4, ?5)",
            params![
                NodeState::Pending.to_db_string(),
                job_id,
                NodeState::Done.to_db_string(),
                NodeKind::Board.to_db_string(),
                NodeKind::Forum.to_db_string()
            ],
        )?;
        tx.commit()?;

        tracing::info!("Re-queued {} listing pages of job {}", requeued, job_id);
        Ok(requeued)
    }

    fn reset_job(&mut self, job_id: &str) -> StorageResult<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let removed = tx.execute("DELETE FROM nodes WHERE job_id = ?1", params![job_id])?;
        tx.commit()?;

        tracing::info!("Cleared {} nodes of job {}", removed, job_id);
        Ok(())
    }

    // ===== Statistics =====

    fn stats(&self, job_id: &str) -> StorageResult<JobStats> {
        let mut stmt = self
            .conn
            .prepare("SELECT state, COUNT(*) FROM nodes WHERE job_id = ?1 GROUP BY state")?;

        let mut counts = HashMap::new();
        let rows = stmt.query_map(params![job_id], |row| {
            Ok((parse_state(row, 0)?, row.get::<_, i64>(1)?))
        })?;

        for row in rows {
            let (state, count) = row?;
            counts.insert(state, count as u64);
        }

        Ok(JobStats::from_counts(job_id, &counts))
    }

    // ===== Run Management =====

    fn create_run(&mut self, job_id: &str, config_hash: &str) -> StorageResult<i64> {
        let now = timestamp(Utc::now());
        self.conn.execute(
            "INSERT INTO runs (job_id, started_at, config_hash, status) VALUES (?1, ?2, ?3, ?4)",
            params![job_id, now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> StorageResult<()> {
        let now = timestamp(Utc::now());
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2, error_message = ?3 WHERE id = ?4",
            params![status.to_db_string(), now, error_message, run_id],
        )?;

        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn latest_run(&self, job_id: &str) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                "SELECT id, job_id, started_at, finished_at, config_hash, status, error_message
                 FROM runs WHERE job_id = ?1 ORDER BY id DESC LIMIT 1",
                params![job_id],
                |row| {
                    Ok(RunRecord {
                        id: row.get(0)?,
                        job_id: row.get(1)?,
                        started_at: row.get(2)?,
                        finished_at: row.get(3)?,
                        config_hash: row.get(4)?,
                        status: RunStatus::from_db_string(&row.get::<_, String>(5)?)
                            .unwrap_or(RunStatus::Running),
                        error_message: row.get(6)?,
                    })
                },
            )
            .optional()?;

        Ok(run)
    }
}

/// Initializes or opens a database at the given path
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(Connection)` - Successfully opened/created database
/// * `Err(rusqlite::Error)` - Failed to open database
pub fn init_database(path: &Path) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open(path)?;

    // FULL sync: a committed transition must survive power loss, not just a crash
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = FULL;
        PRAGMA foreign_keys = ON;
    ",
    )?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    initialize_schema(&conn)?;

    Ok(conn)
}
