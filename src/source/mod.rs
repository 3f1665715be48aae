//! Source module: turning fetched pages into entities and new work
//!
//! This module handles:
//! - Mapping a hierarchy node to the URL that serves it
//! - Parsing a fetched page into one entity
//! - Reporting the child and next-page nodes the page reveals

mod entity;
mod vbulletin;

pub use entity::{
    BoardIndex, Entity, ForumPage, ForumSummary, Post, PostPage, ThreadRecord, ThreadSummary,
};
pub use vbulletin::VBulletinSource;

use crate::crawler::RawPage;
use crate::state::{DiscoveredNode, HierarchyNode};
use thiserror::Error;
use url::Url;

/// A page could not be turned into an entity
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("No target URL for node {node}: {reason}")]
    Target { node: String, reason: String },

    #[error("Malformed page for node {node}: {reason}")]
    Malformed { node: String, reason: String },

    #[error("Invalid selector '{selector}': {reason}")]
    Selector { selector: String, reason: String },
}

impl ParseError {
    pub fn malformed(node: &HierarchyNode, reason: impl Into<String>) -> Self {
        Self::Malformed {
            node: node.key(),
            reason: reason.into(),
        }
    }
}

/// Everything one parse produced
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed {
    pub entity: Entity,
    pub discovered: Vec<DiscoveredNode>,
}

/// Site-specific knowledge the crawl engine delegates to
///
/// Implementations must be pure with respect to crawl state: they never
/// touch the progress store or the archive, and they signal errors instead
/// of dropping content.
pub trait Source: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// The URL that serves a node
    fn target(&self, node: &HierarchyNode) -> Result<Url, ParseError>;

    /// Parses a fetched page, dispatching on the node's kind
    fn parse(&self, raw: &RawPage, node: &HierarchyNode) -> Result<Parsed, ParseError>;
}
