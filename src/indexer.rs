//! Tree indexing orchestration.
//!
//! Coordinates the full build flow: source listing → checksum diff →
//! extraction → one transaction → promotion (or export). The live
//! generation keeps serving searches until promotion succeeds; any error
//! before that drops the staged generation, which deletes it.
//!
//! Per-document extraction failures are reported as
//! [`IndexEvent::Failed`] and skipped. They never abort the build.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{info, warn};

use crate::archive;
use crate::differ::{self, DiffPlan};
use crate::error::{Error, Result};
use crate::extract::Extractor;
use crate::generation::{IndexRoot, StagedGeneration};
use crate::progress::{IndexEvent, ProgressReporter};
use crate::sources::ResolvedSource;

/// Where a build publishes its result.
#[derive(Debug, Clone, Copy)]
pub enum IndexTarget<'a> {
    /// Copy the live generation, apply the deltas, promote.
    InPlace(&'a IndexRoot),
    /// Index everything into an empty generation, promote.
    Rebuild(&'a IndexRoot),
    /// Index everything into a pointer-less generation and write it as a zip
    /// archive at this path. Nothing live is touched.
    Archive(&'a Path),
}

/// Counters of a finished build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexSummary {
    pub indexed: u64,
    pub removed: u64,
    pub failed: u64,
    /// Id of the promoted generation; `None` for exports.
    pub generation: Option<String>,
}

/// Sources sharing a section, merged into one listing so that two sources
/// of the same section never delete each other's documents.
struct SectionWork {
    section: String,
    /// Document path → index of the source (and extractor) it came from.
    origin: HashMap<String, usize>,
    plan: DiffPlan,
}

pub async fn index_tree(
    sources: &[ResolvedSource],
    target: IndexTarget<'_>,
    reporter: &dyn ProgressReporter,
) -> Result<IndexSummary> {
    let summary = match target {
        IndexTarget::InPlace(root) => {
            let staged = root.stage(true).await?;
            let summary = build(&staged, sources, reporter).await?;
            let id = staged.id().to_string();
            root.promote(staged).await?;
            IndexSummary {
                generation: Some(id),
                ..summary
            }
        }
        IndexTarget::Rebuild(root) => {
            let staged = root.stage(false).await?;
            let summary = build(&staged, sources, reporter).await?;
            let id = staged.id().to_string();
            root.promote(staged).await?;
            IndexSummary {
                generation: Some(id),
                ..summary
            }
        }
        IndexTarget::Archive(out) => {
            let scratch = tempfile::tempdir()?;
            let export_root = IndexRoot::new(scratch.path());
            let staged = export_root.stage(false).await?;
            let summary = build(&staged, sources, reporter).await?;
            staged.close().await;

            let dir = staged.dir().to_path_buf();
            let out = out.to_path_buf();
            tokio::task::spawn_blocking(move || archive::pack_dir(&dir, &out))
                .await
                .map_err(|e| Error::Io(std::io::Error::other(e)))??;
            export_root.discard(staged);
            summary
        }
    };

    reporter.report(&IndexEvent::Done {
        indexed: summary.indexed,
        removed: summary.removed,
        failed: summary.failed,
    });
    info!(
        indexed = summary.indexed,
        removed = summary.removed,
        failed = summary.failed,
        "Build finished"
    );
    Ok(summary)
}

/// Diffs every section against `staged` and applies the result in one
/// transaction.
async fn build(
    staged: &StagedGeneration,
    sources: &[ResolvedSource],
    reporter: &dyn ProgressReporter,
) -> Result<IndexSummary> {
    let extractors = sources
        .iter()
        .map(|s| Extractor::new(&s.extract))
        .collect::<Result<Vec<_>>>()?;
    let work = plan(staged, sources).await?;
    apply(staged, &extractors, &work, reporter).await
}

/// Lists every section's sources and diffs them against `staged`.
async fn plan(
    staged: &StagedGeneration,
    sources: &[ResolvedSource],
) -> Result<Vec<SectionWork>> {
    let mut work = Vec::new();
    for (section, members) in group_by_section(sources) {
        let mut listing = BTreeMap::new();
        let mut origin = HashMap::new();
        for idx in members {
            let source = &sources[idx];
            let ignore = differ::build_globset(&source.docs_to_ignore)?;
            let base = source.path.clone();
            let docs =
                tokio::task::spawn_blocking(move || differ::find_all_documents(&base, &ignore))
                    .await
                    .map_err(|e| Error::Io(std::io::Error::other(e)))??;
            for (path, file) in docs {
                origin.insert(path.clone(), idx);
                listing.insert(path, file);
            }
        }

        let indexed: BTreeMap<String, String> = staged
            .indexed_pages(Some(&section))
            .await?
            .into_iter()
            .map(|p| (p.path, p.checksum))
            .collect();
        let plan = tokio::task::spawn_blocking(move || differ::diff(&indexed, &listing))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;

        info!(
            section = %section,
            to_index = plan.to_index.len(),
            to_delete = plan.to_delete.len(),
            unchanged = plan.unchanged.len(),
            "Computed diff"
        );
        work.push(SectionWork {
            section,
            origin,
            plan,
        });
    }
    Ok(work)
}

/// Applies planned work in one transaction. Documents that cannot be read
/// or extracted are reported and skipped.
async fn apply(
    staged: &StagedGeneration,
    extractors: &[Extractor],
    work: &[SectionWork],
    reporter: &dyn ProgressReporter,
) -> Result<IndexSummary> {
    let mut summary = IndexSummary::default();
    let mut tx = staged.begin().await?;

    for item in work {
        for (path, file) in &item.plan.to_index {
            let extractor = &extractors[item.origin[path]];
            let source = match tokio::fs::read(file).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    fail(reporter, &mut summary, &item.section, path, e.to_string());
                    continue;
                }
            };
            match tx
                .index_document(extractor, path, &source, &item.section)
                .await
            {
                Ok(docs) => {
                    summary.indexed += 1;
                    for doc in docs {
                        reporter.report(&IndexEvent::Indexed {
                            section: item.section.clone(),
                            path: doc.path,
                        });
                    }
                }
                Err(Error::MalformedDocument(msg)) => {
                    fail(reporter, &mut summary, &item.section, path, msg);
                }
                Err(e) => return Err(e),
            }
        }

        for path in &item.plan.to_delete {
            tx.remove_document(path, &item.section).await?;
            summary.removed += 1;
            reporter.report(&IndexEvent::Removed {
                section: item.section.clone(),
                path: path.clone(),
            });
        }
    }

    tx.commit().await?;
    Ok(summary)
}

fn fail(
    reporter: &dyn ProgressReporter,
    summary: &mut IndexSummary,
    section: &str,
    path: &str,
    error: String,
) {
    warn!(section = %section, path = %path, error = %error, "Skipping document");
    summary.failed += 1;
    reporter.report(&IndexEvent::Failed {
        section: section.to_string(),
        path: path.to_string(),
        error,
    });
}

/// Source indices grouped by section, in first-seen order.
fn group_by_section(sources: &[ResolvedSource]) -> Vec<(String, Vec<usize>)> {
    let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
    for (idx, source) in sources.iter().enumerate() {
        match groups.iter_mut().find(|(s, _)| *s == source.section) {
            Some((_, members)) => members.push(idx),
            None => groups.push((source.section.clone(), vec![idx])),
        }
    }
    groups
}
