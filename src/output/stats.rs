//! Job statistics
//!
//! This module provides per-job node counts for progress logging and
//! external reporting.

use crate::state::NodeState;
use crate::storage::RunRecord;
use std::collections::HashMap;
use std::fmt;

/// Node counts of one job, by state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobStats {
    pub job_id: String,
    pub pending: u64,
    pub in_progress: u64,
    pub done: u64,
    pub failed: u64,
    pub abandoned: u64,
}

impl JobStats {
    /// Builds stats from a state -> count map
    pub fn from_counts(job_id: &str, counts: &HashMap<NodeState, u64>) -> Self {
        let get = |state| counts.get(&state).copied().unwrap_or(0);
        Self {
            job_id: job_id.to_string(),
            pending: get(NodeState::Pending),
            in_progress: get(NodeState::InProgress),
            done: get(NodeState::Done),
            failed: get(NodeState::Failed),
            abandoned: get(NodeState::Abandoned),
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.in_progress + self.done + self.failed + self.abandoned
    }

    /// Nodes that still need work
    pub fn remaining(&self) -> u64 {
        self.pending + self.in_progress + self.failed
    }

    pub fn count(&self, state: NodeState) -> u64 {
        match state {
            NodeState::Pending => self.pending,
            NodeState::InProgress => self.in_progress,
            NodeState::Done => self.done,
            NodeState::Failed => self.failed,
            NodeState::Abandoned => self.abandoned,
        }
    }
}

impl fmt::Display for JobStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{Done:{}, Pending:{}, Failed:{}, Abandoned:{}}}",
            self.done, self.pending, self.failed, self.abandoned
        )
    }
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
/// * `last_run` - The job's most recent run, if any
pub fn print_statistics(stats: &JobStats, last_run: Option<&RunRecord>) {
    println!("=== Job {} ===\n", stats.job_id);

    println!("Nodes by State:");
    for state in NodeState::all_states() {
        let count = stats.count(state);
        let percentage = if stats.total() > 0 {
            (count as f64 / stats.total() as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", state, count, percentage);
    }
    println!("  total: {}", stats.total());
    println!();

    match last_run {
        Some(run) => {
            println!("Last Run:");
            println!("  Id: {}", run.id);
            println!("  Started: {}", run.started_at);
            if let Some(finished) = &run.finished_at {
                println!("  Finished: {}", finished);
            }
            println!("  Status: {}", run.status.to_db_string());
            if let Some(error) = &run.error_message {
                println!("  Error: {}", error);
            }
        }
        None => println!("No runs recorded"),
    }
    println!();

    if stats.abandoned > 0 {
        println!(
            "Warning: {} nodes abandoned; raise max-node-attempts and rerun to retry them",
            stats.abandoned
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_counts() {
        let mut counts = HashMap::new();
        counts.insert(NodeState::Done, 5);
        counts.insert(NodeState::Failed, 1);

        let stats = JobStats::from_counts("forum-14", &counts);
        assert_eq!(stats.done, 5);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.total(), 6);
        assert_eq!(stats.remaining(), 1);
    }

    #[test]
    fn test_display() {
        let stats = JobStats {
            job_id: "forum-14".to_string(),
            done: 5,
            ..JobStats::default()
        };
        assert_eq!(stats.to_string(), "{Done:5, Pending:0, Failed:0, Abandoned:0}");
    }
}
