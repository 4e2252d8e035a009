//! Side cache of plain extracted text.
//!
//! Blobs live under `<generation>/content/<digest>` where the digest is the
//! SHA-256 of `path \0 section`. Addressing by key rather than by content
//! means the search path can fetch the text for a hit without knowing its
//! checksum.

use regex::{Captures, Regex};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::Result;

/// Directory name of the content store inside a generation.
pub const CONTENT_DIR: &str = "content";

#[derive(Debug, Clone)]
pub struct ContentStore {
    dir: PathBuf,
}

impl ContentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of the blob for `(path, section)`. The file may not exist.
    pub fn blob_path(&self, path: &str, section: &str) -> PathBuf {
        self.dir.join(content_key(path, section))
    }

    pub fn put(&self, path: &str, section: &str, text: &str) -> Result<()> {
        let blob = self.blob_path(path, section);
        if let Some(parent) = blob.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(blob, text.as_bytes())?;
        Ok(())
    }

    pub fn remove(&self, path: &str, section: &str) -> Result<()> {
        match std::fs::remove_file(self.blob_path(path, section)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads the stored text. A missing blob is `Ok(None)`.
    pub fn get(&self, path: &str, section: &str, normalize: bool) -> Result<Option<String>> {
        let bytes = match std::fs::read(self.blob_path(path, section)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let text = String::from_utf8_lossy(&bytes).into_owned();
        Ok(Some(if normalize {
            normalize_text(&text)
        } else {
            text
        }))
    }
}

/// Hex SHA-256 of `path \0 section`.
pub fn content_key(path: &str, section: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update([0u8]);
    hasher.update(section.as_bytes());
    hex::encode(hasher.finalize())
}

/// Collapses whitespace runs: two or more newlines become a paragraph break,
/// one newline stays a newline, anything else becomes a single space.
/// Leading and trailing newlines are stripped.
pub fn normalize_text(text: &str) -> String {
    static WS: OnceLock<Regex> = OnceLock::new();
    let ws = WS.get_or_init(|| Regex::new(r"\s+").expect("static regex"));

    let collapsed = ws.replace_all(text, |caps: &Captures| {
        match caps[0].matches('\n').count() {
            0 => " ",
            1 => "\n",
            _ => "\n\n",
        }
    });
    collapsed.trim_matches('\n').to_string()
}
