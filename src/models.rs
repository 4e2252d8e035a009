//! Core data types flowing through the indexing and search pipeline.

use serde::Serialize;

/// One searchable unit produced by the extractor: a page, or a section of a
/// page addressed as `page#anchor`.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: String,
    pub title: Option<String>,
    pub body: String,
    pub priority: i64,
}

/// A page as recorded in a generation, used for change detection.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedPage {
    pub path: String,
    pub section: String,
    pub title: Option<String>,
    pub checksum: String,
}

/// A single search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchItem {
    pub path: String,
    pub title: Option<String>,
    /// Highlighted snippet, or `None` when the content store has no text
    /// for this document.
    pub excerpt: Option<String>,
    pub section: String,
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResults {
    pub items: Vec<SearchItem>,
    pub pages: u32,
    pub page: u32,
    pub per_page: u32,
}
