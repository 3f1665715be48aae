/// Node state definitions for tracking crawl progress
///
/// This module defines the lifecycle states of a hierarchy node, the kinds of
/// nodes the crawler walks, and the reason tags recorded on failure.
use std::fmt;

/// Represents the current state of a node in the crawl process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    // ===== Active States =====
    /// Node is waiting to be fetched
    Pending,

    /// Node is currently being fetched, parsed and written
    InProgress,

    // ===== Terminal Success States =====
    /// Node was fetched, its entity written and its children recorded
    Done,

    // ===== Retryable Error States =====
    /// Last attempt failed; the node re-enters Pending after the retry delay
    Failed,

    // ===== Terminal Error States =====
    /// Node hit the attempt ceiling and is no longer scheduled
    Abandoned,
}

impl NodeState {
    /// Returns true if this node still needs work in the current run
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress | Self::Failed)
    }

    /// Returns true if no further processing is scheduled for this node
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Abandoned)
    }

    /// Returns true if this represents a successful completion
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Returns true if this represents an error state
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed | Self::Abandoned)
    }

    /// Converts the node state to a database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
        }
    }

    /// Parses a node state from a database string representation
    ///
    /// Returns None if the string doesn't match any known state.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }

    /// Returns all possible node states
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Pending,
            Self::InProgress,
            Self::Done,
            Self::Failed,
            Self::Abandoned,
        ]
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// The kind of unit a node represents in the forum hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// The board index listing every forum section
    Board,

    /// One listing page of a forum section
    Forum,

    /// A thread's landing page (metadata and page count)
    Thread,

    /// One page of posts within a thread
    PostPage,
}

impl NodeKind {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Board => "board",
            Self::Forum => "forum",
            Self::Thread => "thread",
            Self::PostPage => "post_page",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "board" => Some(Self::Board),
            "forum" => Some(Self::Forum),
            "thread" => Some(Self::Thread),
            "post_page" => Some(Self::PostPage),
            _ => None,
        }
    }

    /// Returns true for kinds whose parse can discover child nodes
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Board | Self::Forum | Self::Thread)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Why the last attempt on a node failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Fetch retries were exhausted on timeouts, 5xx, resets or 429s
    TransientFetch,

    /// Non-retryable response (4xx) or an unbuildable target
    PermanentFetch,

    /// The response arrived but could not be parsed
    Parse,
}

impl FailureKind {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::TransientFetch => "transient_fetch",
            Self::PermanentFetch => "permanent_fetch",
            Self::Parse => "parse",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "transient_fetch" => Some(Self::TransientFetch),
            "permanent_fetch" => Some(Self::PermanentFetch),
            "parse" => Some(Self::Parse),
            _ => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
