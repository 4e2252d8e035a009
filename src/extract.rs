//! Markup to text extraction.
//!
//! An [`Extractor`] is compiled once from an [`ExtractConfig`] and turns the
//! raw bytes of a rendered HTML page into one primary [`Document`] plus an
//! optional sub-document for every id-bearing element matched by a section
//! selector.
//!
//! Parsing is tolerant: html5ever repairs malformed markup and the repair is
//! lossy. Nothing is ever serialized back, so that loss is acceptable.
//!
//! Ignore rules are evaluated per node during the walk. A node is skipped
//! when *it* matches an ignored tag or ignore selector; its descendants are
//! skipped only because the walk never descends into it.

use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::HashSet;

use crate::config::ExtractConfig;
use crate::error::{Error, Result};
use crate::models::Document;

/// Rank of a primary page document.
pub const PAGE_PRIORITY: i64 = 10;
/// Rank of a section sub-document. Always below [`PAGE_PRIORITY`].
pub const SECTION_PRIORITY: i64 = 5;

/// Compiled extraction rules.
#[derive(Debug, Clone)]
pub struct Extractor {
    content_selectors: Vec<Selector>,
    section_selectors: Vec<Selector>,
    ignore: Vec<Selector>,
    ignored_tags: Vec<String>,
    title_cleanup: Option<Regex>,
}

impl Extractor {
    pub fn new(config: &ExtractConfig) -> Result<Self> {
        Ok(Self {
            content_selectors: compile_selectors(&config.content_selectors)?,
            section_selectors: compile_selectors(&config.section_selectors)?,
            ignore: compile_selectors(&config.ignore)?,
            ignored_tags: config
                .ignored_tags
                .iter()
                .map(|t| t.to_ascii_lowercase())
                .collect(),
            title_cleanup: config
                .title_cleanup
                .as_deref()
                .map(Regex::new)
                .transpose()?,
        })
    }

    /// Extracts the page at `path` and its section sub-documents.
    ///
    /// The first returned document is always the page itself.
    pub fn extract(&self, path: &str, source: &[u8]) -> Result<Vec<Document>> {
        let markup = String::from_utf8_lossy(source);
        let html = Html::parse_document(&markup);
        let root = html.root_element();

        let head = child_element(root, "head").ok_or_else(|| {
            Error::MalformedDocument(format!("{}: document has no <head>", path))
        })?;
        let title = child_element(head, "title").map(|t| self.clean_title(&element_text(t)));

        let mut body = String::new();
        for selector in &self.content_selectors {
            for el in html.select(selector) {
                self.walk(el, None, &mut body);
            }
        }

        let mut docs = vec![Document {
            path: path.to_string(),
            title,
            body: body.trim_end().to_string(),
            priority: PAGE_PRIORITY,
        }];

        let mut seen_ids = HashSet::new();
        for selector in &self.section_selectors {
            for el in html.select(selector) {
                let Some(id) = el.value().attr("id") else {
                    continue;
                };
                if !seen_ids.insert(id.to_string()) {
                    continue;
                }
                let heading = el.children().find_map(ElementRef::wrap);
                let mut section_body = String::new();
                self.walk(el, heading, &mut section_body);
                docs.push(Document {
                    path: format!("{}#{}", path, id),
                    title: heading.map(element_text),
                    body: section_body.trim_end().to_string(),
                    priority: SECTION_PRIORITY,
                });
            }
        }

        Ok(docs)
    }

    fn clean_title(&self, raw: &str) -> String {
        let Some(pattern) = &self.title_cleanup else {
            return raw.to_string();
        };
        match pattern.captures(raw).and_then(|caps| caps.get(1)) {
            Some(m) => m.as_str().to_string(),
            None => raw.to_string(),
        }
    }

    fn is_ignored(&self, el: ElementRef<'_>) -> bool {
        let name = el.value().name();
        if self.ignored_tags.iter().any(|t| t == name) {
            return true;
        }
        self.ignore.iter().any(|sel| sel.matches(&el))
    }

    /// Appends the text of `el` and its non-ignored descendants to `buf`.
    /// `skip` excludes one direct child (a section's heading).
    fn walk(&self, el: ElementRef<'_>, skip: Option<ElementRef<'_>>, buf: &mut String) {
        if self.is_ignored(el) {
            return;
        }
        for child in el.children() {
            match child.value() {
                Node::Text(text) => buf.push_str(text),
                Node::Element(_) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        if skip.is_some_and(|s| s.id() == child_el.id()) {
                            continue;
                        }
                        self.walk(child_el, None, buf);
                    }
                }
                _ => {}
            }
        }
    }
}

fn compile_selectors(selectors: &[String]) -> Result<Vec<Selector>> {
    selectors
        .iter()
        .map(|s| {
            Selector::parse(s).map_err(|e| Error::InvalidSelector {
                selector: s.clone(),
                message: e.to_string(),
            })
        })
        .collect()
}

fn child_element<'a>(parent: ElementRef<'a>, name: &str) -> Option<ElementRef<'a>> {
    parent
        .children()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == name)
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect()
}
