use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::extract::Extractor;
use crate::generation::IndexRoot;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Root directory holding the generations and the `cur` pointer.
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
    /// Shared secret required by the write endpoints. Writes are rejected
    /// while unset.
    #[serde(default)]
    pub secret: Option<String>,
    /// Seconds a superseded generation stays on disk for searches that
    /// resolved it before promotion.
    #[serde(default = "default_retire_grace_secs")]
    pub retire_grace_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            secret: None,
            retire_grace_secs: default_retire_grace_secs(),
        }
    }
}

impl IndexConfig {
    pub fn root(&self) -> IndexRoot {
        IndexRoot::new(&self.path).with_retire_grace(Duration::from_secs(self.retire_grace_secs))
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/index")
}

fn default_retire_grace_secs() -> u64 {
    crate::generation::RETIRE_GRACE.as_secs()
}

/// Extraction rules. Built once into an [`Extractor`] and passed by value.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ExtractConfig {
    #[serde(default = "default_content_selectors")]
    pub content_selectors: Vec<String>,
    #[serde(default)]
    pub section_selectors: Vec<String>,
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,
    #[serde(default = "default_ignored_tags")]
    pub ignored_tags: Vec<String>,
    #[serde(default)]
    pub title_cleanup: Option<String>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            content_selectors: default_content_selectors(),
            section_selectors: Vec::new(),
            ignore: default_ignore(),
            ignored_tags: default_ignored_tags(),
            title_cleanup: None,
        }
    }
}

fn default_content_selectors() -> Vec<String> {
    vec!["body".to_string()]
}

fn default_ignore() -> Vec<String> {
    vec![".nocontent".to_string()]
}

fn default_ignored_tags() -> Vec<String> {
    ["script", "noscript", "style", "head"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexerConfig {
    /// Glob patterns over document paths (e.g. `sitemap`, `api/**`) that
    /// are never indexed.
    #[serde(default = "default_docs_to_ignore")]
    pub docs_to_ignore: Vec<String>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            docs_to_ignore: default_docs_to_ignore(),
        }
    }
}

fn default_docs_to_ignore() -> Vec<String> {
    vec!["sitemap".to_string(), "search".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_surround")]
    pub surround: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            per_page: default_per_page(),
            max_chars: default_max_chars(),
            surround: default_surround(),
        }
    }
}

fn default_per_page() -> u32 {
    20
}
fn default_max_chars() -> usize {
    300
}
fn default_surround() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5001".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.search.per_page < 1 {
        anyhow::bail!("search.per_page must be >= 1");
    }

    if config.search.max_chars == 0 {
        anyhow::bail!("search.max_chars must be > 0");
    }

    // Surface selector and pattern errors at load time rather than mid-build.
    Extractor::new(&config.extract).with_context(|| "Invalid [extract] section")?;
    crate::differ::build_globset(&config.indexer.docs_to_ignore)
        .with_context(|| "Invalid indexer.docs_to_ignore")?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.index.path, PathBuf::from("./data/index"));
        assert_eq!(config.extract.content_selectors, vec!["body"]);
        assert_eq!(config.search.per_page, 20);
        assert!(config.index.secret.is_none());
        assert_eq!(config.index.retire_grace_secs, 600);
    }

    #[test]
    fn rejects_zero_per_page() {
        let err = parse_config("[search]\nper_page = 0\n").unwrap_err();
        assert!(err.to_string().contains("per_page"));
    }

    #[test]
    fn rejects_bad_selector() {
        let err = parse_config("[extract]\ncontent_selectors = [\"div[\"]\n").unwrap_err();
        assert!(err.to_string().contains("[extract]"));
    }

    #[test]
    fn parses_full_config() {
        let config = parse_config(
            r#"
[index]
path = "/srv/index"
secret = "s3cret"
retire_grace_secs = 5

[extract]
content_selectors = ["section.document"]
ignore = [".nocontent", "a.headerlink"]
title_cleanup = "^(.*?)\\s+–"

[indexer]
docs_to_ignore = ["genindex"]

[server]
bind = "0.0.0.0:8080"
"#,
        )
        .unwrap();
        assert_eq!(config.index.secret.as_deref(), Some("s3cret"));
        assert_eq!(config.index.retire_grace_secs, 5);
        assert_eq!(config.index.root().path(), Path::new("/srv/index"));
        assert_eq!(config.extract.ignore.len(), 2);
        assert_eq!(config.indexer.docs_to_ignore, vec!["genindex"]);
        assert_eq!(config.server.bind, "0.0.0.0:8080");
    }
}
