//! Hierarchy nodes, jobs and progress snapshots

use crate::state::{FailureKind, NodeKind, NodeState};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A logical archive target: one forum section and everything below it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlJob {
    pub id: String,
    pub root_kind: NodeKind,
    pub root_remote_id: String,
    pub created_at: DateTime<Utc>,
}

/// Describes a job before it exists in the progress store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefinition {
    pub id: String,
    pub root_kind: NodeKind,
    pub root_remote_id: String,
}

impl JobDefinition {
    /// A job rooted at the first listing page of a forum section
    pub fn forum(id: impl Into<String>, forum_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            root_kind: NodeKind::Forum,
            root_remote_id: forum_id.into(),
        }
    }

    /// A job rooted at the board index, covering every forum it lists
    pub fn board(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            root_kind: NodeKind::Board,
            root_remote_id: BOARD_REMOTE_ID.to_string(),
        }
    }
}

/// Remote identifier of the single board index node
pub const BOARD_REMOTE_ID: &str = "index";

/// One addressable unit of crawl work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyNode {
    pub id: i64,
    pub job_id: String,
    pub parent_id: Option<i64>,
    pub kind: NodeKind,

    /// Identifier of the forum/thread on the remote site
    pub remote_id: String,

    /// Remote identifier of the enclosing entity (forum of a thread, thread of a post page)
    pub parent_remote_id: Option<String>,

    /// 1-based page number within a paginated listing
    pub cursor: u32,

    /// Distance from the job root; next-page siblings share their origin's depth
    pub depth: u32,

    pub state: NodeState,
    pub attempt_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub failure_kind: Option<FailureKind>,
    pub last_error: Option<String>,

    /// Position in the job's completion order, set when the node reaches Done
    pub completed_seq: Option<i64>,
}

impl HierarchyNode {
    /// Stable key used to deduplicate discoveries within a job
    pub fn key(&self) -> String {
        node_key(self.kind, &self.remote_id, self.cursor)
    }
}

/// Builds the deduplication key for a node
pub fn node_key(kind: NodeKind, remote_id: &str, cursor: u32) -> String {
    format!("{}:{}:{}", kind.to_db_string(), remote_id, cursor)
}

/// Names a node by what it is rather than by its row id
///
/// Written `kind:remote_id[:page]`, e.g. `thread:900` or `post_page:900:2`.
/// The page defaults to 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    pub kind: NodeKind,
    pub remote_id: String,
    pub cursor: u32,
}

impl NodeRef {
    pub fn key(&self) -> String {
        node_key(self.kind, &self.remote_id, self.cursor)
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl FromStr for NodeRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let kind_str = parts.next().unwrap_or_default();
        let kind = NodeKind::from_db_string(kind_str).ok_or_else(|| {
            format!(
                "unknown node kind '{}' (expected board, forum, thread or post_page)",
                kind_str
            )
        })?;

        let remote_id = match parts.next() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(format!("'{}' is missing a remote id", s)),
        };

        let cursor = match parts.next() {
            None => 1,
            Some(page) => match page.parse::<u32>() {
                Ok(n) if n >= 1 => n,
                _ => return Err(format!("invalid page '{}' in '{}'", page, s)),
            },
        };

        if parts.next().is_some() {
            return Err(format!("too many ':' separated parts in '{}'", s));
        }

        Ok(Self {
            kind,
            remote_id,
            cursor,
        })
    }
}

/// How a discovered node relates to the node whose parse revealed it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// One level further down the hierarchy
    Child,

    /// The next page of the same listing, a sibling at the same depth
    NextPage,
}

/// A node revealed by parsing, not yet persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredNode {
    pub kind: NodeKind,
    pub remote_id: String,
    pub cursor: u32,
    pub relation: Relation,
}

impl DiscoveredNode {
    pub fn child(kind: NodeKind, remote_id: impl Into<String>, cursor: u32) -> Self {
        Self {
            kind,
            remote_id: remote_id.into(),
            cursor,
            relation: Relation::Child,
        }
    }

    pub fn next_page(kind: NodeKind, remote_id: impl Into<String>, cursor: u32) -> Self {
        Self {
            kind,
            remote_id: remote_id.into(),
            cursor,
            relation: Relation::NextPage,
        }
    }
}

/// The durable view of every node of a job, read at startup to resume
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub job: CrawlJob,
    pub nodes: Vec<HierarchyNode>,
}

impl ProgressSnapshot {
    /// Counts nodes by state
    pub fn counts(&self) -> HashMap<NodeState, u64> {
        let mut counts = HashMap::new();
        for node in &self.nodes {
            *counts.entry(node.state).or_insert(0) += 1;
        }
        counts
    }

    /// Returns the root node: the first page of the job's root kind
    ///
    /// Next-page siblings of the root also have no parent, so the kind,
    /// remote id and cursor are all checked.
    pub fn root(&self) -> Option<&HierarchyNode> {
        self.nodes.iter().find(|n| {
            n.kind == self.job.root_kind
                && n.remote_id == self.job.root_remote_id
                && n.cursor == 1
                && n.depth == 0
        })
    }

    /// Returns true if every node is Done or Abandoned
    pub fn is_finished(&self) -> bool {
        self.nodes.iter().all(|n| n.state.is_terminal())
    }

    /// Returns the direct children of a node, in id order
    pub fn children_of(&self, node_id: i64) -> Vec<&HierarchyNode> {
        let mut children: Vec<_> = self
            .nodes
            .iter()
            .filter(|n| n.parent_id == Some(node_id))
            .collect();
        children.sort_by_key(|n| n.id);
        children
    }
}
