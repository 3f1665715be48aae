//! vBulletin HTML source
//!
//! Understands the four page shapes of a vBulletin 3/4 board:
//! - the board index at the base URL, listing every forum section
//! - `forumdisplay.php?f={id}&page={n}`: thread listing of a forum section
//! - `showthread.php?t={id}`: first page of a thread, giving its page count
//! - `showthread.php?t={id}&page={n}`: one page of posts

use crate::crawler::RawPage;
use crate::source::{
    BoardIndex, Entity, ForumPage, ForumSummary, ParseError, Parsed, Post, PostPage, Source,
    ThreadRecord, ThreadSummary,
};
use crate::state::{DiscoveredNode, HierarchyNode, NodeKind};
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// CSS selectors used by the parser, compiled once
struct Selectors {
    title: Selector,
    board_table: Selector,
    forum_cell: Selector,
    forum_link: Selector,
    forum_description: Selector,
    cell: Selector,
    threads_table: Selector,
    row: Selector,
    thread_title: Selector,
    author_cell_link: Selector,
    stat_cell: Selector,
    next_link: Selector,
    page_nav: Selector,
    breadcrumb: Selector,
    post: Selector,
    username: Selector,
    date: Selector,
    content: Selector,
    image: Selector,
}

impl Selectors {
    fn new() -> Result<Self, ParseError> {
        Ok(Self {
            title: compile("title")?,
            board_table: compile("table.tborder")?,
            forum_cell: compile("td.alt1Active")?,
            forum_link: compile("a[href*=\"forumdisplay.php\"]")?,
            forum_description: compile("div.smallfont")?,
            cell: compile("td")?,
            threads_table: compile("table#threadslist")?,
            row: compile("tr")?,
            thread_title: compile("a[id^=\"thread_title_\"]")?,
            author_cell_link: compile("td.alt2 a")?,
            stat_cell: compile("td.alt1")?,
            next_link: compile("div.pagenav a[rel=\"next\"]")?,
            page_nav: compile("div.pagenav")?,
            breadcrumb: compile(".navbar a[href*=\"forumdisplay.php\"]")?,
            post: compile("div[id^=\"post_\"]")?,
            username: compile("div.username_container a, a.bigusername")?,
            date: compile("div.date")?,
            content: compile("div.postcontent, div[id^=\"post_message_\"]")?,
            image: compile("img[src]")?,
        })
    }
}

fn compile(css: &str) -> Result<Selector, ParseError> {
    Selector::parse(css).map_err(|e| ParseError::Selector {
        selector: css.to_string(),
        reason: format!("{:?}", e),
    })
}

/// Source implementation for vBulletin boards
pub struct VBulletinSource {
    base_url: Url,
    selectors: Selectors,
}

impl VBulletinSource {
    /// Creates a source rooted at the board's base URL
    ///
    /// # Arguments
    ///
    /// * `base_url` - URL of the board, e.g. `https://www.net54baseball.com`
    ///
    /// # Returns
    ///
    /// * `Ok(VBulletinSource)` - Ready to build targets and parse pages
    /// * `Err(ArchiveError)` - The base URL is invalid
    pub fn new(base_url: &str) -> crate::Result<Self> {
        let mut base_url = Url::parse(base_url)?;

        // join() replaces the last path segment unless the path ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            base_url,
            selectors: Selectors::new()?,
        })
    }

    fn page_url(&self, script: &str, key: &str, id: &str, page: u32) -> Result<Url, ParseError> {
        let mut url = self.base_url.join(script).map_err(|e| ParseError::Target {
            node: id.to_string(),
            reason: e.to_string(),
        })?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair(key, id);
            if page > 1 {
                query.append_pair("page", &page.to_string());
            }
        }

        Ok(url)
    }

    /// Forum rows of the board index, in page order
    ///
    /// The thread and post counts are the first two numeric cells after the
    /// forum's name cell.
    fn parse_board(&self, doc: &Html, node: &HierarchyNode) -> Result<Parsed, ParseError> {
        let s = &self.selectors;
        let mut forums: Vec<ForumSummary> = Vec::new();

        for table in doc.select(&s.board_table) {
            for row in table.select(&s.row) {
                let Some(name_cell) = row.select(&s.forum_cell).next() else {
                    continue;
                };
                let Some(link) = name_cell.select(&s.forum_link).next() else {
                    continue;
                };
                let href = link.value().attr("href").unwrap_or_default();
                let Some(id) = self.forum_id_from_href(href) else {
                    continue;
                };
                if forums.iter().any(|f| f.id == id) {
                    continue;
                }

                let counts: Vec<u64> = row
                    .select(&s.cell)
                    .skip_while(|cell| *cell != name_cell)
                    .skip(1)
                    .filter_map(parse_count)
                    .take(2)
                    .collect();

                forums.push(ForumSummary {
                    id,
                    name: collapse_text(link),
                    description: name_cell
                        .select(&s.forum_description)
                        .next()
                        .map(collapse_text)
                        .filter(|d| !d.is_empty()),
                    thread_count: counts.first().copied(),
                    post_count: counts.get(1).copied(),
                });
            }
        }

        if forums.is_empty() {
            return Err(ParseError::malformed(node, "board index lists no forums"));
        }

        tracing::debug!("Parsed {} forums from the board index", forums.len());

        let discovered = forums
            .iter()
            .map(|f| DiscoveredNode::child(NodeKind::Forum, f.id.clone(), 1))
            .collect();

        Ok(Parsed {
            entity: Entity::Board(BoardIndex {
                board_id: node.remote_id.clone(),
                forums,
            }),
            discovered,
        })
    }

    fn parse_forum(&self, doc: &Html, node: &HierarchyNode) -> Result<Parsed, ParseError> {
        let s = &self.selectors;
        let table = doc
            .select(&s.threads_table)
            .next()
            .ok_or_else(|| ParseError::malformed(node, "no table#threadslist on forum page"))?;

        let mut threads: Vec<ThreadSummary> = Vec::new();
        for row in table.select(&s.row) {
            let Some(link) = row.select(&s.thread_title).next() else {
                continue;
            };
            let Some(id) = numeric_suffix(link.value().id(), "thread_title_") else {
                continue;
            };
            if threads.iter().any(|t| t.id == id) {
                continue;
            }

            let stats: Vec<ElementRef<'_>> = row.select(&s.stat_cell).collect();
            let (replies, views) = match stats.as_slice() {
                [.., replies, views] => (parse_count(*replies), parse_count(*views)),
                _ => (None, None),
            };

            threads.push(ThreadSummary {
                id,
                title: collapse_text(link),
                author: row.select(&s.author_cell_link).next().map(collapse_text),
                replies,
                views,
            });
        }

        let mut discovered: Vec<DiscoveredNode> = threads
            .iter()
            .map(|t| DiscoveredNode::child(NodeKind::Thread, t.id.clone(), 1))
            .collect();

        if self.has_next_page(doc) {
            discovered.push(DiscoveredNode::next_page(
                NodeKind::Forum,
                node.remote_id.clone(),
                node.cursor + 1,
            ));
        }

        tracing::debug!(
            "Parsed {} threads from forum {} page {}",
            threads.len(),
            node.remote_id,
            node.cursor
        );

        Ok(Parsed {
            entity: Entity::Forum(ForumPage {
                forum_id: node.remote_id.clone(),
                page: node.cursor,
                name: self.page_title(doc),
                threads,
            }),
            discovered,
        })
    }

    fn parse_thread(&self, raw: &RawPage, doc: &Html, node: &HierarchyNode) -> Result<Parsed, ParseError> {
        let posts = self.parse_posts(raw, doc);
        if posts.is_empty() {
            return Err(ParseError::malformed(node, "thread page contains no posts"));
        }

        let forum_id = match &node.parent_remote_id {
            Some(id) => id.clone(),
            None => self
                .breadcrumb_forum(doc)
                .ok_or_else(|| ParseError::malformed(node, "thread has no enclosing forum"))?,
        };

        let page_count = doc
            .select(&self.selectors.page_nav)
            .find_map(|nav| parse_page_count(&collapse_text(nav)))
            .unwrap_or(1);

        let discovered = (1..=page_count)
            .map(|page| DiscoveredNode::child(NodeKind::PostPage, node.remote_id.clone(), page))
            .collect();

        Ok(Parsed {
            entity: Entity::Thread(ThreadRecord {
                id: node.remote_id.clone(),
                forum_id,
                title: self.page_title(doc).unwrap_or_default(),
                author: posts.first().and_then(|p| p.author.clone()),
                page_count,
            }),
            discovered,
        })
    }

    fn parse_post_page(&self, raw: &RawPage, doc: &Html, node: &HierarchyNode) -> Result<Parsed, ParseError> {
        let posts = self.parse_posts(raw, doc);
        if posts.is_empty() {
            return Err(ParseError::malformed(node, "post page contains no posts"));
        }

        let mut discovered = Vec::new();
        if self.has_next_page(doc) {
            discovered.push(DiscoveredNode::next_page(
                NodeKind::PostPage,
                node.remote_id.clone(),
                node.cursor + 1,
            ));
        }

        tracing::debug!(
            "Parsed {} posts from thread {} page {}",
            posts.len(),
            node.remote_id,
            node.cursor
        );

        Ok(Parsed {
            entity: Entity::PostPage(PostPage {
                thread_id: node.remote_id.clone(),
                page: node.cursor,
                posts,
            }),
            discovered,
        })
    }

    fn parse_posts(&self, raw: &RawPage, doc: &Html) -> Vec<Post> {
        let s = &self.selectors;
        let mut posts: Vec<Post> = Vec::new();

        for container in doc.select(&s.post) {
            let Some(id) = numeric_suffix(container.value().id(), "post_") else {
                continue;
            };

            let content = container
                .select(&s.content)
                .next()
                .map(|el| {
                    let mut lines = Vec::new();
                    collect_unquoted_text(el, &mut lines);
                    lines.join("\n")
                })
                .unwrap_or_default();

            let attachments = container
                .select(&s.image)
                .filter_map(|img| img.value().attr("src"))
                .filter(|src| src.contains("attachment.php") || src.contains("images/attach"))
                .map(|src| match raw.url.join(src) {
                    Ok(url) => url.to_string(),
                    Err(_) => src.to_string(),
                })
                .collect();

            posts.push(Post {
                id,
                author: container.select(&s.username).next().map(collapse_text),
                timestamp: container.select(&s.date).next().map(collapse_text),
                content,
                attachments,
            });
        }

        posts
    }

    fn has_next_page(&self, doc: &Html) -> bool {
        doc.select(&self.selectors.next_link).next().is_some()
    }

    fn page_title(&self, doc: &Html) -> Option<String> {
        doc.select(&self.selectors.title)
            .next()
            .map(collapse_text)
            .filter(|s| !s.is_empty())
    }

    /// Forum id from the last forumdisplay link in the breadcrumb
    fn breadcrumb_forum(&self, doc: &Html) -> Option<String> {
        doc.select(&self.selectors.breadcrumb)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| self.forum_id_from_href(href))
            .last()
    }

    /// `forumdisplay.php?f=14&...` -> `14`
    fn forum_id_from_href(&self, href: &str) -> Option<String> {
        let url = self.base_url.join(href).ok()?;
        url.query_pairs()
            .find(|(k, _)| k == "f")
            .map(|(_, v)| v.into_owned())
            .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
    }
}

impl Source for VBulletinSource {
    fn name(&self) -> &str {
        "vbulletin"
    }

    fn target(&self, node: &HierarchyNode) -> Result<Url, ParseError> {
        match node.kind {
            NodeKind::Board => Ok(self.base_url.clone()),
            NodeKind::Forum => self.page_url("forumdisplay.php", "f", &node.remote_id, node.cursor),
            NodeKind::Thread => self.page_url("showthread.php", "t", &node.remote_id, 1),
            NodeKind::PostPage => {
                self.page_url("showthread.php", "t", &node.remote_id, node.cursor)
            }
        }
    }

    fn parse(&self, raw: &RawPage, node: &HierarchyNode) -> Result<Parsed, ParseError> {
        let doc = Html::parse_document(&raw.body);

        match node.kind {
            NodeKind::Board => self.parse_board(&doc, node),
            NodeKind::Forum => self.parse_forum(&doc, node),
            NodeKind::Thread => self.parse_thread(raw, &doc, node),
            NodeKind::PostPage => self.parse_post_page(raw, &doc, node),
        }
    }
}

/// `thread_title_123` -> `123`; anything non-numeric is rejected
fn numeric_suffix(id: Option<&str>, prefix: &str) -> Option<String> {
    let digits = id?.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(digits.to_string())
}

fn collapse_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_count(el: ElementRef<'_>) -> Option<u64> {
    collapse_text(el).replace(',', "").parse().ok()
}

/// Finds `y` in "Page x of y"
fn parse_page_count(text: &str) -> Option<u32> {
    let words: Vec<&str> = text.split_whitespace().collect();
    words.windows(4).find_map(|w| match w {
        ["Page", _, "of", total] => total.replace(',', "").parse().ok(),
        _ => None,
    })
}

/// Text lines of a post body, skipping `div.quote` blocks
fn collect_unquoted_text(el: ElementRef<'_>, lines: &mut Vec<String>) {
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            let line = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if !line.is_empty() {
                lines.push(line);
            }
        } else if let Some(child) = ElementRef::wrap(child) {
            let element = child.value();
            if element.name() == "div" && element.classes().any(|c| c == "quote") {
                continue;
            }
            collect_unquoted_text(child, lines);
        }
    }
}
