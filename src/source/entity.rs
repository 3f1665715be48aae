//! Parsed forum entities
//!
//! Entities carry only what the remote page says, never the time they were
//! fetched, so writing the same page twice produces identical records.

use crate::state::NodeKind;
use serde::{Deserialize, Serialize};

/// The parsed content of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Board(BoardIndex),
    Forum(ForumPage),
    Thread(ThreadRecord),
    PostPage(PostPage),
}

impl Entity {
    pub fn node_kind(&self) -> NodeKind {
        match self {
            Self::Board(_) => NodeKind::Board,
            Self::Forum(_) => NodeKind::Forum,
            Self::Thread(_) => NodeKind::Thread,
            Self::PostPage(_) => NodeKind::PostPage,
        }
    }

    /// Stable identifier, unique within the entity's kind
    pub fn id(&self) -> String {
        match self {
            Self::Board(board) => board.board_id.clone(),
            Self::Forum(page) => format!("{}:{}", page.forum_id, page.page),
            Self::Thread(thread) => thread.id.clone(),
            Self::PostPage(page) => format!("{}:{}", page.thread_id, page.page),
        }
    }

    /// Identifier of the enclosing entity, if any
    pub fn parent_id(&self) -> Option<&str> {
        match self {
            Self::Board(_) | Self::Forum(_) => None,
            Self::Thread(thread) => Some(&thread.forum_id),
            Self::PostPage(page) => Some(&page.thread_id),
        }
    }
}

/// The board index: every forum section the board lists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardIndex {
    pub board_id: String,
    pub forums: Vec<ForumSummary>,
}

/// A forum row as shown on the board index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForumSummary {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub thread_count: Option<u64>,
    pub post_count: Option<u64>,
}

/// One listing page of a forum section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForumPage {
    pub forum_id: String,
    pub page: u32,
    pub name: Option<String>,
    pub threads: Vec<ThreadSummary>,
}

/// A thread row as shown on a forum listing page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    pub replies: Option<u64>,
    pub views: Option<u64>,
}

/// Thread metadata taken from its first page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub id: String,
    pub forum_id: String,
    pub title: String,
    pub author: Option<String>,
    pub page_count: u32,
}

/// The posts shown on one page of a thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostPage {
    pub thread_id: String,
    pub page: u32,
    pub posts: Vec<Post>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub author: Option<String>,

    /// Timestamp text exactly as the forum renders it
    pub timestamp: Option<String>,

    /// Post body with quoted blocks removed
    pub content: String,

    pub attachments: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_ids() {
        let forum = Entity::Forum(ForumPage {
            forum_id: "14".to_string(),
            page: 2,
            name: None,
            threads: vec![],
        });
        assert_eq!(forum.id(), "14:2");
        assert_eq!(forum.parent_id(), None);
        assert_eq!(forum.node_kind(), NodeKind::Forum);

        let page = Entity::PostPage(PostPage {
            thread_id: "900".to_string(),
            page: 3,
            posts: vec![],
        });
        assert_eq!(page.id(), "900:3");
        assert_eq!(page.parent_id(), Some("900"));
    }

    #[test]
    fn test_board_entity() {
        let board = Entity::Board(BoardIndex {
            board_id: "index".to_string(),
            forums: vec![],
        });
        assert_eq!(board.id(), "index");
        assert_eq!(board.parent_id(), None);
        assert_eq!(board.node_kind(), NodeKind::Board);
        assert_eq!(serde_json::to_value(&board).unwrap()["kind"], "board");
    }

    #[test]
    fn test_serialized_with_kind_tag() {
        let thread = Entity::Thread(ThreadRecord {
            id: "900".to_string(),
            forum_id: "14".to_string(),
            title: "T206 Wagner".to_string(),
            author: Some("collector".to_string()),
            page_count: 2,
        });

        let json = serde_json::to_value(&thread).unwrap();
        assert_eq!(json["kind"], "thread");
        assert_eq!(json["page_count"], 2);
    }
}
