//! Checksum-based change detection between a source tree and a generation.

use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::error::Result;

const CHUNK_SIZE: usize = 16 * 1024;

/// Checksum recorded for a source that cannot be read. Never equal to a
/// real digest, so the document is simply re-indexed (and then fails or
/// succeeds on its own).
pub const UNREADABLE_CHECKSUM: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// What a build has to do for one section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffPlan {
    /// New and changed documents: path → source file.
    pub to_index: BTreeMap<String, PathBuf>,
    /// Indexed paths whose source file disappeared.
    pub to_delete: BTreeSet<String>,
    pub unchanged: BTreeSet<String>,
}

impl DiffPlan {
    pub fn is_empty(&self) -> bool {
        self.to_index.is_empty() && self.to_delete.is_empty()
    }
}

/// Compares `indexed` (path → checksum) against `sources` (path → file).
///
/// Hashes every source file that is already indexed, so call it off the
/// async runtime for large trees.
pub fn diff(indexed: &BTreeMap<String, String>, sources: &BTreeMap<String, PathBuf>) -> DiffPlan {
    let mut plan = DiffPlan::default();

    for (path, checksum) in indexed {
        match sources.get(path) {
            None => {
                plan.to_delete.insert(path.clone());
            }
            Some(file) if file_checksum(file) != *checksum => {
                plan.to_index.insert(path.clone(), file.clone());
            }
            Some(_) => {
                plan.unchanged.insert(path.clone());
            }
        }
    }

    for (path, file) in sources {
        if !indexed.contains_key(path) {
            plan.to_index.insert(path.clone(), file.clone());
        }
    }

    plan
}

/// Hex SHA-256 of raw source bytes.
pub fn checksum_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hex SHA-256 of a file, read in fixed-size chunks. Unreadable files hash
/// to [`UNREADABLE_CHECKSUM`].
pub fn file_checksum(path: &Path) -> String {
    fn hash(path: &Path) -> std::io::Result<String> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }
    hash(path).unwrap_or_else(|_| UNREADABLE_CHECKSUM.to_string())
}

/// Lists the HTML documents below `base` as document path → file.
///
/// Dot-directories are skipped. Paths matching `ignore` are left out.
pub fn find_all_documents(base: &Path, ignore: &GlobSet) -> Result<BTreeMap<String, PathBuf>> {
    let mut docs = BTreeMap::new();

    let walker = WalkDir::new(base)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden_dir(e));
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file = entry.path();
        if file.extension().and_then(|e| e.to_str()) != Some("html") {
            continue;
        }
        let relative = file.strip_prefix(base).unwrap_or(file);
        let path = filename_to_path(relative);
        if ignore.is_match(&path) {
            continue;
        }
        docs.insert(path, file.to_path_buf());
    }

    Ok(docs)
}

fn is_hidden_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir() && entry.file_name().to_string_lossy().starts_with('.')
}

/// Maps a file path relative to the tree root to its document path:
/// `a/b/index.html` → `a/b`, `a/c.html` → `a/c`, `index.html` → `index`.
pub fn filename_to_path(relative: &Path) -> String {
    let joined = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if let Some(stripped) = joined.strip_suffix("/index.html") {
        return stripped.to_string();
    }
    joined
        .strip_suffix(".html")
        .map(str::to_string)
        .unwrap_or(joined)
}

pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| crate::error::Error::Config(format!("bad glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| crate::error::Error::Config(e.to_string()))
}
