//! Error kinds surfaced by the indexing and search pipeline.
//!
//! Per-document failures ([`Error::MalformedDocument`]) are caught by the
//! tree indexer and reported as progress events. Everything else aborts the
//! build that raised it, and the staged generation is discarded.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the library.
#[derive(Debug, Error)]
pub enum Error {
    /// The markup lacks a structural node the extractor requires.
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    /// A transaction was requested while another one is still live on the
    /// same generation.
    #[error("a writer is already open on generation {0}")]
    WriterBusy(String),

    /// A CSS selector from the extraction config failed to parse.
    #[error("invalid selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },

    /// The title cleanup pattern failed to compile.
    #[error("invalid title cleanup pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// A generation archive could not be read or written.
    #[error("archive error: {0}")]
    Archive(String),

    /// The index root or one of its generations is unusable.
    #[error("index at {path} is not usable: {message}")]
    Index { path: PathBuf, message: String },

    /// Source or application configuration is invalid.
    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<zip::result::ZipError> for Error {
    fn from(e: zip::result::ZipError) -> Self {
        Error::Archive(e.to_string())
    }
}

impl From<walkdir::Error> for Error {
    fn from(e: walkdir::Error) -> Self {
        match e.into_io_error() {
            Some(io) => Error::Io(io),
            None => Error::Io(std::io::Error::other("filesystem loop detected")),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
