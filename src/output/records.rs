//! JSON record writer for parsed entities
//!
//! Layout under the archive root:
//! - `boards/{board_id}.json`
//! - `forums/{forum_id}/{page}.json`
//! - `threads/{forum_id}/{thread_id}.json`
//! - `posts/{thread_id}/{page}.json`
//!
//! Each record is written to a temporary file in its target directory,
//! synced, then renamed over the final path, so a reader sees either the old
//! record or the new one and never a partial file.

use crate::source::Entity;
use crate::storage::StorageResult;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Persists entities as one JSON file per stable identifier
#[derive(Debug, Clone)]
pub struct RecordWriter {
    root: PathBuf,
}

impl RecordWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns where an entity is stored
    pub fn path_for(&self, entity: &Entity) -> PathBuf {
        let (namespace, parent, file) = match entity {
            Entity::Board(board) => {
                return self
                    .root
                    .join("boards")
                    .join(format!("{}.json", sanitize_segment(&board.board_id)));
            }
            Entity::Forum(page) => ("forums", page.forum_id.as_str(), page.page.to_string()),
            Entity::Thread(thread) => ("threads", thread.forum_id.as_str(), thread.id.clone()),
            Entity::PostPage(page) => ("posts", page.thread_id.as_str(), page.page.to_string()),
        };

        self.root
            .join(namespace)
            .join(sanitize_segment(parent))
            .join(format!("{}.json", sanitize_segment(&file)))
    }

    /// Writes an entity, replacing any earlier record with the same identifier
    ///
    /// # Arguments
    ///
    /// * `entity` - The entity to persist
    ///
    /// # Returns
    ///
    /// * `Ok(PathBuf)` - The record's final path
    /// * `Err(StorageError)` - Serialization or filesystem failure
    pub fn write(&self, entity: &Entity) -> StorageResult<PathBuf> {
        let path = self.path_for(entity);
        let Some(dir) = path.parent() else {
            return Err(std::io::Error::other("record path has no parent directory").into());
        };
        std::fs::create_dir_all(dir)?;

        let mut content = serde_json::to_vec_pretty(entity)?;
        content.push(b'\n');

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&content)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;

        tracing::trace!("Wrote {} {} to {}", entity.node_kind(), entity.id(), path.display());
        Ok(path)
    }
}

/// Makes a remote identifier safe to use as one path segment
fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{BoardIndex, ForumPage, ForumSummary, Post, PostPage, ThreadRecord};

    fn thread() -> Entity {
        Entity::Thread(ThreadRecord {
            id: "900".to_string(),
            forum_id: "14".to_string(),
            title: "T206 Wagner".to_string(),
            author: Some("collector".to_string()),
            page_count: 1,
        })
    }

    #[test]
    fn test_layout() {
        let writer = RecordWriter::new("/archive");

        let forum = Entity::Forum(ForumPage {
            forum_id: "14".to_string(),
            page: 2,
            name: None,
            threads: vec![],
        });
        assert_eq!(writer.path_for(&forum), PathBuf::from("/archive/forums/14/2.json"));
        assert_eq!(writer.path_for(&thread()), PathBuf::from("/archive/threads/14/900.json"));

        let posts = Entity::PostPage(PostPage {
            thread_id: "900".to_string(),
            page: 3,
            posts: vec![],
        });
        assert_eq!(writer.path_for(&posts), PathBuf::from("/archive/posts/900/3.json"));

        let board = Entity::Board(BoardIndex {
            board_id: "index".to_string(),
            forums: vec![ForumSummary {
                id: "14".to_string(),
                name: "Pre-War".to_string(),
                description: None,
                thread_count: Some(10),
                post_count: Some(200),
            }],
        });
        assert_eq!(writer.path_for(&board), PathBuf::from("/archive/boards/index.json"));
    }

    #[test]
    fn test_sanitize_segment() {
        assert_eq!(sanitize_segment("14"), "14");
        assert_eq!(sanitize_segment("../../etc"), ".._.._etc");
        assert_eq!(sanitize_segment(".."), "_");
        assert_eq!(sanitize_segment(""), "_");
        assert_eq!(sanitize_segment("a/b c"), "a_b_c");
    }

    #[test]
    fn test_write_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RecordWriter::new(dir.path());

        let path = writer.write(&thread()).unwrap();
        let first = std::fs::read(&path).unwrap();

        writer.write(&thread()).unwrap();
        let second = std::fs::read(&path).unwrap();

        assert_eq!(first, second);

        // No temporary files left behind
        let entries = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_rewrite_overwrites_by_identifier() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RecordWriter::new(dir.path());

        let page = |content: &str| {
            Entity::PostPage(PostPage {
                thread_id: "900".to_string(),
                page: 1,
                posts: vec![Post {
                    id: "5001".to_string(),
                    author: None,
                    timestamp: None,
                    content: content.to_string(),
                    attachments: vec![],
                }],
            })
        };

        writer.write(&page("first")).unwrap();
        let path = writer.write(&page("edited")).unwrap();

        let stored: Entity = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(stored, page("edited"));
    }
}
