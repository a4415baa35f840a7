//! Data model for one run: the simplified document and the book assembled from it.
//!
//! The EPUB writer consumes [Book]; the resolver produces [ResourcePart]s.

use crate::tree::ContentTree;
use chrono::{DateTime, Utc};

/// Output of the simplifier: article title, main content, and whatever metadata the page
/// carried.
pub struct Document {
    pub title: String,
    pub content: ContentTree,
    pub author: Option<String>,
    pub language: Option<String>,
}

/// One embedded resource, fetched and re-addressed into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePart {
    /// Manifest id, unique within the book.
    pub id: String,
    /// Container-local path relative to the package document (e.g. `images/pic1.png`).
    pub path: String,
    pub media_type: String,
    pub data: Vec<u8>,
}

/// One chapter in reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub id: String,
    pub title: String,
    pub path: String,
    /// Well-formed XHTML body content (no `<html>`/`<body>` wrapper).
    pub body: String,
}

/// Navigation entry pointing at a chapter by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub title: String,
    pub chapter_id: String,
}

/// The root aggregate written to one container.
#[derive(Debug, Clone)]
pub struct Book {
    pub identifier: String,
    pub title: String,
    pub language: String,
    pub author: String,
    pub modified: DateTime<Utc>,
    pub chapters: Vec<Chapter>,
    pub resources: Vec<ResourcePart>,
    /// Chapter ids in reading order.
    pub spine: Vec<String>,
    pub toc: Vec<TocEntry>,
}

impl Book {
    pub fn new(
        identifier: impl Into<String>,
        title: impl Into<String>,
        language: impl Into<String>,
        author: impl Into<String>,
    ) -> Self {
        Book {
            identifier: identifier.into(),
            title: title.into(),
            language: language.into(),
            author: author.into(),
            modified: Utc::now(),
            chapters: Vec::new(),
            resources: Vec::new(),
            spine: Vec::new(),
            toc: Vec::new(),
        }
    }

    /// Append a chapter and reference it from both spine and toc. Returns its id.
    pub fn add_chapter(&mut self, title: impl Into<String>, body: impl Into<String>) -> String {
        let n = self.chapters.len() + 1;
        let id = format!("chapter-{}", n);
        let title = title.into();
        self.chapters.push(Chapter {
            id: id.clone(),
            title: title.clone(),
            path: format!("chapter-{}.xhtml", n),
            body: body.into(),
        });
        self.spine.push(id.clone());
        self.toc.push(TocEntry {
            title,
            chapter_id: id.clone(),
        });
        id
    }

    pub fn add_resources(&mut self, parts: impl IntoIterator<Item = ResourcePart>) {
        self.resources.extend(parts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chapters_are_referenced_once_in_creation_order() {
        let mut book = Book::new("urn:test", "Title", "en", "Someone");
        let first = book.add_chapter("One", "<p>1</p>");
        let second = book.add_chapter("Two", "<p>2</p>");
        assert_eq!(first, "chapter-1");
        assert_eq!(second, "chapter-2");
        assert_eq!(book.spine, vec!["chapter-1", "chapter-2"]);
        let toc_ids: Vec<&str> = book.toc.iter().map(|t| t.chapter_id.as_str()).collect();
        assert_eq!(toc_ids, vec!["chapter-1", "chapter-2"]);
        assert_eq!(book.toc[1].title, "Two");
        assert_eq!(book.chapters[0].path, "chapter-1.xhtml");
    }
}
