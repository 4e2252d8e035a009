//! Search facade over the live generation.
//!
//! Relevance comes from FTS5 `bm25` with the title column weighted above
//! the content column. Excerpts are regenerated from the content store for
//! every hit, so changing how excerpts look never requires re-indexing.

use sqlx::Row;

use crate::error::Result;
use crate::generation::{Generation, IndexRoot};
use crate::highlight::{self, ExcerptOptions};
use crate::models::{SearchItem, SearchResults};

/// `bm25` column weights: title, content.
const TITLE_WEIGHT: f64 = 10.0;
const CONTENT_WEIGHT: f64 = 1.0;

/// Scores closer than this count as equal relevance for the stable sort.
const SCORE_PRECISION: i32 = 4;

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    /// Exact section filter.
    pub section: Option<String>,
    /// 1-based page number.
    pub page: u32,
    pub per_page: u32,
    pub excerpt: ExcerptOptions,
    /// Break relevance ties by priority, then path, both descending. Keeps a
    /// page ahead of its own sections.
    pub stable: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            section: None,
            page: 1,
            per_page: 20,
            excerpt: ExcerptOptions::default(),
            stable: false,
        }
    }
}

/// Runs `request` against the generation `root` currently points at.
///
/// An index root that was never built is initialized empty. Unknown
/// sections, blank queries and out-of-range pages yield no items.
pub async fn search(root: &IndexRoot, request: &SearchRequest) -> Result<SearchResults> {
    let generation = root.open_current().await?;
    let results = search_generation(&generation, request).await;
    generation.close().await;
    results
}

pub async fn search_generation(
    generation: &Generation,
    request: &SearchRequest,
) -> Result<SearchResults> {
    let page = request.page.max(1);
    let per_page = request.per_page.max(1);
    let mut results = SearchResults {
        items: Vec::new(),
        pages: 0,
        page,
        per_page,
    };

    let terms = highlight::query_terms(&request.query);
    if terms.is_empty() {
        return Ok(results);
    }
    let expr = match_expression(&terms);
    let section = request.section.as_deref();

    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM documents_fts
        JOIN documents d ON d.id = documents_fts.rowid
        WHERE documents_fts MATCH ?1 AND (?2 IS NULL OR d.section = ?2)
        "#,
    )
    .bind(&expr)
    .bind(section)
    .fetch_one(generation.pool())
    .await?;

    results.pages = (total as u64).div_ceil(per_page as u64) as u32;
    if total == 0 || page > results.pages {
        return Ok(results);
    }

    let score = format!("bm25(documents_fts, {:.1}, {:.1})", TITLE_WEIGHT, CONTENT_WEIGHT);
    let order = if request.stable {
        format!(
            "ROUND({}, {}), d.priority DESC, d.path DESC",
            score, SCORE_PRECISION
        )
    } else {
        score
    };
    let sql = format!(
        r#"
        SELECT d.path, d.section, d.title
        FROM documents_fts
        JOIN documents d ON d.id = documents_fts.rowid
        WHERE documents_fts MATCH ?1 AND (?2 IS NULL OR d.section = ?2)
        ORDER BY {}
        LIMIT ?3 OFFSET ?4
        "#,
        order
    );

    let rows = sqlx::query(&sql)
        .bind(&expr)
        .bind(section)
        .bind(per_page as i64)
        .bind(((page - 1) as i64) * per_page as i64)
        .fetch_all(generation.pool())
        .await?;

    let store = generation.content_store();
    for row in &rows {
        let path: String = row.get("path");
        let section: String = row.get("section");
        let excerpt = store
            .get(&path, &section, true)?
            .and_then(|text| highlight::highlight(&text, &terms, &request.excerpt));
        results.items.push(SearchItem {
            path,
            title: row.get("title"),
            excerpt,
            section,
        });
    }

    Ok(results)
}

/// Quotes every term so query syntax never reaches FTS5. Terms are joined
/// by implicit AND.
fn match_expression(terms: &[String]) -> String {
    terms
        .iter()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractConfig;
    use crate::extract::Extractor;
    use tempfile::TempDir;

    async fn seeded(tmp: &TempDir, pages: &[(&str, &str, &str)]) -> IndexRoot {
        let root = IndexRoot::new(tmp.path());
        let staged = root.stage(false).await.unwrap();
        let extractor = Extractor::new(&ExtractConfig {
            section_selectors: vec!["div".to_string()],
            ..ExtractConfig::default()
        })
        .unwrap();
        let mut tx = staged.begin().await.unwrap();
        for (path, section, html) in pages {
            tx.index_document(&extractor, path, html.as_bytes(), section)
                .await
                .unwrap();
        }
        tx.commit().await.unwrap();
        root.promote(staged).await.unwrap();
        root
    }

    fn html(title: &str, body: &str) -> String {
        format!(
            "<html><head><title>{}</title></head><body>{}</body></html>",
            title, body
        )
    }

    #[test]
    fn match_expression_quotes_terms() {
        let terms = vec!["foo".to_string(), "or".to_string()];
        assert_eq!(match_expression(&terms), "\"foo\" \"or\"");
    }

    #[tokio::test]
    async fn uninitialized_root_returns_empty() {
        let tmp = TempDir::new().unwrap();
        let root = IndexRoot::new(tmp.path().join("fresh"));
        let results = search(&root, &SearchRequest::new("anything")).await.unwrap();
        assert!(results.items.is_empty());
        assert_eq!(results.pages, 0);
        assert!(root.current_id().unwrap().is_some());
    }

    #[tokio::test]
    async fn filters_by_section_and_excerpts_from_store() {
        let tmp = TempDir::new().unwrap();
        let a = html("Alpha", "shared word here");
        let b = html("Beta", "shared word there");
        let root = seeded(&tmp, &[("a", "one", a.as_str()), ("b", "two", b.as_str())]).await;

        let all = search(&root, &SearchRequest::new("shared")).await.unwrap();
        assert_eq!(all.items.len(), 2);

        let request = SearchRequest {
            section: Some("two".to_string()),
            ..SearchRequest::new("shared")
        };
        let only = search(&root, &request).await.unwrap();
        assert_eq!(only.items.len(), 1);
        assert_eq!(only.items[0].path, "b");
        assert_eq!(only.items[0].section, "two");
        assert_eq!(
            only.items[0].excerpt.as_deref(),
            Some("<strong class=\"match term0\">shared</strong> word there")
        );

        let request = SearchRequest {
            section: Some("missing".to_string()),
            ..SearchRequest::new("shared")
        };
        assert!(search(&root, &request).await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn paginates() {
        let tmp = TempDir::new().unwrap();
        let docs: Vec<(String, String)> = (0..5)
            .map(|i| (format!("p{}", i), html(&format!("P{}", i), "common text")))
            .collect();
        let pages: Vec<(&str, &str, &str)> = docs
            .iter()
            .map(|(p, h)| (p.as_str(), "s", h.as_str()))
            .collect();
        let root = seeded(&tmp, &pages).await;

        let request = SearchRequest {
            per_page: 2,
            page: 3,
            ..SearchRequest::new("common")
        };
        let results = search(&root, &request).await.unwrap();
        assert_eq!(results.pages, 3);
        assert_eq!(results.page, 3);
        assert_eq!(results.items.len(), 1);

        let beyond = SearchRequest {
            page: 9,
            ..request
        };
        let results = search(&root, &beyond).await.unwrap();
        assert!(results.items.is_empty());
        assert_eq!(results.pages, 3);
    }

    #[tokio::test]
    async fn terms_are_anded_and_syntax_is_inert() {
        let tmp = TempDir::new().unwrap();
        let a = html("A", "red apple");
        let b = html("B", "red cherry");
        let root = seeded(&tmp, &[("a", "s", a.as_str()), ("b", "s", b.as_str())]).await;

        let results = search(&root, &SearchRequest::new("red apple")).await.unwrap();
        assert_eq!(results.items.len(), 1);
        assert_eq!(results.items[0].path, "a");

        let odd = search(&root, &SearchRequest::new("apple AND (\"* NEAR")).await;
        assert!(odd.is_ok());
    }

    #[tokio::test]
    async fn title_matches_rank_first() {
        let tmp = TempDir::new().unwrap();
        let body_hit = html("Other", "mentions kernel once among many other words here");
        let title_hit = html("Kernel", "unrelated words");
        let root = seeded(
            &tmp,
            &[("body", "s", body_hit.as_str()), ("title", "s", title_hit.as_str())],
        )
        .await;

        let results = search(&root, &SearchRequest::new("kernel")).await.unwrap();
        assert_eq!(results.items[0].path, "title");
        // Title-only hits have no excerpt.
        assert_eq!(results.items[0].excerpt, None);
    }

    #[tokio::test]
    async fn stable_sort_returns_every_hit() {
        let tmp = TempDir::new().unwrap();
        let page = html("Guide", "<div id=\"install\"><h2>Install</h2> install steps</div>");
        let root = seeded(&tmp, &[("guide", "s", page.as_str())]).await;

        let request = SearchRequest {
            stable: true,
            ..SearchRequest::new("install")
        };
        let results = search(&root, &request).await.unwrap();
        let paths: Vec<&str> = results.items.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths.len(), 2);
        assert!(paths.contains(&"guide"));
        assert!(paths.contains(&"guide#install"));
    }

    #[tokio::test]
    async fn stable_sort_breaks_ties_by_priority_then_path() {
        let tmp = TempDir::new().unwrap();
        let twin = html("Twin", "twin words");
        let guide = "<html><head></head><body><div id=\"install\">install steps</div></body></html>";
        let root = seeded(
            &tmp,
            &[
                ("a", "s", twin.as_str()),
                ("b", "s", twin.as_str()),
                ("guide", "s", guide),
            ],
        )
        .await;

        let request = SearchRequest {
            stable: true,
            ..SearchRequest::new("twin")
        };
        let results = search(&root, &request).await.unwrap();
        let paths: Vec<&str> = results.items.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["b", "a"]);

        let request = SearchRequest {
            stable: true,
            ..SearchRequest::new("install")
        };
        let results = search(&root, &request).await.unwrap();
        let paths: Vec<&str> = results.items.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["guide", "guide#install"]);
    }

    #[tokio::test]
    async fn accent_insensitive_hits_keep_excerpts() {
        let tmp = TempDir::new().unwrap();
        let menu = html("Menu", "Un café noir");
        let root = seeded(&tmp, &[("menu", "s", menu.as_str())]).await;

        let results = search(&root, &SearchRequest::new("cafe")).await.unwrap();
        assert_eq!(results.items.len(), 1);
        assert_eq!(
            results.items[0].excerpt.as_deref(),
            Some("Un <strong class=\"match term0\">café</strong> noir")
        );
    }
}
