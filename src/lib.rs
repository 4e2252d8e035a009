//! # Site Search
//!
//! Versioned full-text search over trees of rendered HTML.
//!
//! Pages are extracted into plain-text documents, written into an
//! immutable index generation (SQLite FTS5 plus a content store of the
//! extracted text) and published by atomically swapping a `cur` pointer.
//! Searches always read whatever generation the pointer resolves to, so a
//! build never disturbs them.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────┐   ┌───────────┐   ┌─────────────┐
//! │ HTML tree  │──▶│  Differ  │──▶│ Extractor │──▶│ Transaction │
//! │ (sources)  │   │ checksum │   │  scraper  │   │ FTS5+content│
//! └────────────┘   └──────────┘   └───────────┘   └──────┬──────┘
//!                                                        │ promote
//!                        ┌───────────────┐        ┌──────▼──────┐
//!   CLI / HTTP ─────────▶│ Search facade │───────▶│ cur ──▶ gen │
//!                        └───────────────┘        └─────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`sources`] | JSON multi-source configuration |
//! | [`extract`] | HTML to document extraction |
//! | [`content`] | Plain-text content store |
//! | [`generation`] | Generation lifecycle and the `cur` pointer |
//! | [`transaction`] | Batched document mutations |
//! | [`differ`] | Source listing and checksum diffing |
//! | [`indexer`] | Tree indexing orchestration |
//! | [`progress`] | Build progress events |
//! | [`archive`] | Generation zip archives |
//! | [`highlight`] | Excerpt fragmenting and highlighting |
//! | [`search`] | Search facade |
//! | [`server`] | HTTP server |
//! | [`db`] | Engine storage connection |
//! | [`migrate`] | Engine schema |

pub mod archive;
pub mod config;
pub mod content;
pub mod db;
pub mod differ;
pub mod error;
pub mod extract;
pub mod generation;
pub mod highlight;
pub mod indexer;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod search;
pub mod server;
pub mod sources;
pub mod transaction;

pub use error::{Error, Result};
