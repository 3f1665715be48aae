//! State module for tracking crawl progress
//!
//! This module provides the data model shared by the progress store and the
//! crawl engine.
//!
//! # Components
//!
//! - `NodeState`: Lifecycle of a hierarchy node (pending, in progress, done, failed, abandoned)
//! - `NodeKind`: Board index, forum listing page, thread, or page of posts
//! - `HierarchyNode` / `ProgressSnapshot`: The persisted crawl tree of a job

mod node;
mod node_state;

// Re-export main types
pub use node::{
    node_key, CrawlJob, DiscoveredNode, HierarchyNode, JobDefinition, NodeRef, ProgressSnapshot,
    Relation, BOARD_REMOTE_ID,
};
pub use node_state::{FailureKind, NodeKind, NodeState};
