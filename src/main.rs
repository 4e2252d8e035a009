//! # Site Search CLI (`sidx`)
//!
//! Builds versioned full-text indexes from rendered HTML trees and serves
//! ranked, excerpted search over them.
//!
//! ## Usage
//!
//! ```bash
//! sidx --config ./config/sidx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sidx index-folder <dir>` | Index one HTML tree into one section |
//! | `sidx index-tree <sources.json>` | Index every source of a JSON source configuration |
//! | `sidx search "<query>"` | Search the live index |
//! | `sidx put-index <archive.zip>` | Replace the live index with an exported generation |
//! | `sidx wipe` | Remove every generation |
//! | `sidx serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Incrementally index a built site
//! sidx index-folder ./site/_build/html --section docs
//!
//! # Build a fresh index into an archive, without touching the live one
//! sidx index-tree ./search-sources.json --archive ./index.zip
//!
//! # Query it
//! sidx search "install" --section docs --fragmenter sentence
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use site_search::config::{self, Config};
use site_search::generation::IndexRoot;
use site_search::highlight::{ExcerptOptions, Fragmenter};
use site_search::indexer::{self, IndexTarget};
use site_search::progress::ProgressMode;
use site_search::search::{self, SearchRequest};
use site_search::sources::{ResolvedSource, SourceConfig};
use site_search::{archive, server};

/// Site Search: versioned full-text indexes over rendered HTML.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file at the default location means built-in defaults.
#[derive(Parser)]
#[command(name = "sidx", version, about = "Versioned full-text search over rendered HTML")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sidx.toml")]
    config: PathBuf,

    /// Progress output for builds: `off`, `human` or `json` (stderr).
    /// Defaults to `human` on a terminal, else `off`.
    #[arg(long, global = true)]
    progress: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index one directory of HTML pages into one section.
    IndexFolder {
        /// Root of the rendered HTML tree.
        folder: PathBuf,

        /// Section the documents belong to.
        #[arg(long, default_value = site_search::sources::DEFAULT_SECTION)]
        section: String,

        /// Rebuild from an empty generation instead of applying deltas.
        #[arg(long)]
        full: bool,

        /// Write the result to this zip archive instead of the live index.
        #[arg(long)]
        archive: Option<PathBuf>,
    },

    /// Index every source listed in a JSON source configuration.
    IndexTree {
        /// JSON source configuration.
        sources: PathBuf,

        /// Directory source paths are relative to. Defaults to the
        /// directory holding the configuration file.
        #[arg(long)]
        base: Option<PathBuf>,

        #[arg(long)]
        full: bool,

        #[arg(long)]
        archive: Option<PathBuf>,
    },

    /// Search the live index.
    Search {
        query: String,

        /// Only return documents of this section.
        #[arg(long)]
        section: Option<String>,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long)]
        per_page: Option<u32>,

        /// Excerpt strategy: `context` or `sentence`.
        #[arg(long, default_value = "context")]
        fragmenter: String,

        /// Break relevance ties by priority, then path.
        #[arg(long)]
        stable: bool,

        /// Print the raw JSON result.
        #[arg(long)]
        json: bool,
    },

    /// Replace the live index with a generation archive.
    PutIndex {
        archive: PathBuf,
    },

    /// Remove the index pointer and every generation.
    Wipe,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = load(&cli.config)?;
    let progress = match cli.progress.as_deref() {
        None => ProgressMode::default_for_tty(),
        Some("off") => ProgressMode::Off,
        Some("human") => ProgressMode::Human,
        Some("json") => ProgressMode::Json,
        Some(other) => bail!("Unknown progress mode: {}. Use off, human, or json.", other),
    };
    let root = cfg.index.root();

    match cli.command {
        Commands::IndexFolder {
            folder,
            section,
            full,
            archive,
        } => {
            let sources = SourceConfig::single(folder, &section).resolve(
                Path::new("."),
                &cfg.extract,
                &cfg.indexer,
            );
            run_index(&sources, &root, full, archive.as_deref(), progress).await?;
        }
        Commands::IndexTree {
            sources,
            base,
            full,
            archive,
        } => {
            let source_config = SourceConfig::load(&sources)
                .with_context(|| format!("Failed to read sources: {}", sources.display()))?;
            let base = base.unwrap_or_else(|| {
                sources
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("."))
            });
            let resolved = source_config.resolve(&base, &cfg.extract, &cfg.indexer);
            run_index(&resolved, &root, full, archive.as_deref(), progress).await?;
        }
        Commands::Search {
            query,
            section,
            page,
            per_page,
            fragmenter,
            stable,
            json,
        } => {
            let fragmenter: Fragmenter = fragmenter.parse().map_err(anyhow::Error::msg)?;
            let request = SearchRequest {
                query,
                section,
                page,
                per_page: per_page.unwrap_or(cfg.search.per_page),
                excerpt: ExcerptOptions {
                    fragmenter,
                    max_chars: cfg.search.max_chars,
                    surround: cfg.search.surround,
                },
                stable,
            };
            let results = search::search(&root, &request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.items.is_empty() {
                println!("No results.");
            } else {
                for item in &results.items {
                    println!(
                        "{} [{}] {}",
                        item.path,
                        item.section,
                        item.title.as_deref().unwrap_or("")
                    );
                    if let Some(excerpt) = &item.excerpt {
                        println!("    {}", excerpt);
                    }
                }
                println!("Page {} of {}", results.page, results.pages);
            }
        }
        Commands::PutIndex { archive } => {
            let file = std::fs::File::open(&archive)
                .with_context(|| format!("Failed to open archive: {}", archive.display()))?;
            let id = archive::replace_from_archive(&root, file).await?;
            println!("Index replaced (generation {}).", id);
        }
        Commands::Wipe => {
            root.wipe()?;
            println!("Index wiped.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

/// Loads `path`, falling back to defaults when the file does not exist.
fn load(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        Ok(Config::default())
    }
}

async fn run_index(
    sources: &[ResolvedSource],
    root: &IndexRoot,
    full: bool,
    archive: Option<&Path>,
    progress: ProgressMode,
) -> anyhow::Result<()> {
    let target = match (archive, full) {
        (Some(out), _) => IndexTarget::Archive(out),
        (None, true) => IndexTarget::Rebuild(root),
        (None, false) => IndexTarget::InPlace(root),
    };
    let reporter = progress.reporter();
    let summary = indexer::index_tree(sources, target, reporter.as_ref()).await?;

    println!(
        "Indexed {}, removed {}, failed {}.",
        summary.indexed, summary.removed, summary.failed
    );
    match (&summary.generation, archive) {
        (Some(id), _) => println!("Live generation: {}", id),
        (None, Some(out)) => println!("Archive written: {}", out.display()),
        (None, None) => {}
    }
    Ok(())
}
