//! Multi-source tree configuration.
//!
//! A JSON document groups source directories that share defaults:
//!
//! ```json
//! {
//!   "groups": [
//!     {
//!       "defaults": { "section": "docs", "content_selectors": ["section.document"] },
//!       "sources": [
//!         { "path": "html" },
//!         { "path": "api", "section": "api", "ignore": [".sig"] }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! Each source expands to a [`ResolvedSource`]: its section, absolute path
//! and effective extraction config (source override, else group default,
//! else the global `[extract]` table).

use serde::Deserialize;
use std::path::{Component, Path, PathBuf};

use crate::config::{ExtractConfig, IndexerConfig};
use crate::error::{Error, Result};

pub const DEFAULT_SECTION: &str = "generic";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourceConfig {
    #[serde(default)]
    pub groups: Vec<SourceGroup>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourceGroup {
    #[serde(default)]
    pub defaults: SourceSettings,
    #[serde(default)]
    pub sources: Vec<Source>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Source {
    pub path: PathBuf,
    #[serde(flatten)]
    pub settings: SourceSettings,
}

/// Optional per-group or per-source overrides.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourceSettings {
    pub section: Option<String>,
    pub content_selectors: Option<Vec<String>>,
    pub section_selectors: Option<Vec<String>>,
    pub ignore: Option<Vec<String>>,
    pub ignored_tags: Option<Vec<String>>,
    pub title_cleanup: Option<String>,
    pub docs_to_ignore: Option<Vec<String>>,
}

/// One source directory with everything needed to index it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSource {
    pub section: String,
    pub path: PathBuf,
    pub extract: ExtractConfig,
    pub docs_to_ignore: Vec<String>,
}

impl SourceConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// A configuration indexing one directory into one section.
    pub fn single(path: impl Into<PathBuf>, section: &str) -> Self {
        Self {
            groups: vec![SourceGroup {
                defaults: SourceSettings {
                    section: Some(section.to_string()),
                    ..SourceSettings::default()
                },
                sources: vec![Source {
                    path: path.into(),
                    settings: SourceSettings::default(),
                }],
            }],
        }
    }

    /// Expands every source against `base_dir` and the global defaults.
    pub fn resolve(
        &self,
        base_dir: &Path,
        extract: &ExtractConfig,
        indexer: &IndexerConfig,
    ) -> Vec<ResolvedSource> {
        let mut resolved = Vec::new();
        for group in &self.groups {
            for source in &group.sources {
                let over = &source.settings;
                let def = &group.defaults;
                resolved.push(ResolvedSource {
                    section: pick(&over.section, &def.section)
                        .unwrap_or_else(|| DEFAULT_SECTION.to_string()),
                    path: base_dir.join(&source.path),
                    extract: ExtractConfig {
                        content_selectors: pick(&over.content_selectors, &def.content_selectors)
                            .unwrap_or_else(|| extract.content_selectors.clone()),
                        section_selectors: pick(&over.section_selectors, &def.section_selectors)
                            .unwrap_or_else(|| extract.section_selectors.clone()),
                        ignore: pick(&over.ignore, &def.ignore)
                            .unwrap_or_else(|| extract.ignore.clone()),
                        ignored_tags: pick(&over.ignored_tags, &def.ignored_tags)
                            .unwrap_or_else(|| extract.ignored_tags.clone()),
                        title_cleanup: pick(&over.title_cleanup, &def.title_cleanup)
                            .or_else(|| extract.title_cleanup.clone()),
                    },
                    docs_to_ignore: pick(&over.docs_to_ignore, &def.docs_to_ignore)
                        .unwrap_or_else(|| indexer.docs_to_ignore.clone()),
                });
            }
        }
        resolved
    }
}

impl SourceConfig {
    /// Like [`SourceConfig::resolve`], but every source path must stay
    /// inside `base_dir`. Used for configurations received from clients.
    pub fn resolve_within(
        &self,
        base_dir: &Path,
        extract: &ExtractConfig,
        indexer: &IndexerConfig,
    ) -> Result<Vec<ResolvedSource>> {
        for source in self.groups.iter().flat_map(|g| &g.sources) {
            let escapes = source.path.components().any(|c| {
                matches!(
                    c,
                    Component::RootDir | Component::Prefix(_) | Component::ParentDir
                )
            });
            if escapes {
                return Err(Error::Config(format!(
                    "source path must be relative to the uploaded tree: {}",
                    source.path.display()
                )));
            }
        }
        Ok(self.resolve(base_dir, extract, indexer))
    }
}

fn pick<T: Clone>(first: &Option<T>, second: &Option<T>) -> Option<T> {
    first.as_ref().or(second.as_ref()).cloned()
}
