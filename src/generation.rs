//! Immutable index generations behind an atomically swapped pointer.
//!
//! Layout of an index root:
//!
//! ```text
//! <root>/cur               symlink → <generation-id>
//! <root>/<generation-id>/  index.sqlite + content/<digest>
//! ```
//!
//! Builders never touch the generation `cur` resolves to. They work on a
//! [`StagedGeneration`] (empty, or a deep copy of current) and publish it
//! with [`IndexRoot::promote`], which creates a fresh link next to `cur` and
//! renames it over the old one. Readers therefore resolve either the old or
//! the new generation, never a missing or half-built one.
//!
//! A superseded generation is only marked retired on promotion. It stays on
//! disk for the retire grace period, so a search that resolved it just
//! before the swap still finds its content store, and is reclaimed by a
//! later promotion.
//!
//! Builds against one root must be serialized by the caller. Searches need
//! no locking at all.

use sqlx::{Row, SqlitePool};
use std::io::ErrorKind;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::content::{ContentStore, CONTENT_DIR};
use crate::db;
use crate::error::{Error, Result};
use crate::migrate;
use crate::models::IndexedPage;

/// Name of the pointer selecting the live generation.
pub const POINTER: &str = "cur";

/// Present inside a generation directory until it is promoted.
pub const STAGING_MARKER: &str = ".staging";

/// Present inside a generation directory once the pointer moved off it.
pub const RETIRED_MARKER: &str = ".retired";

/// Staged generations untouched for longer than this count as leaked.
const STALE_STAGING: Duration = Duration::from_secs(6 * 60 * 60);

/// Default time a retired generation is kept for in-flight readers.
pub const RETIRE_GRACE: Duration = Duration::from_secs(10 * 60);

const OPEN_ATTEMPTS: u32 = 3;

/// An index root directory.
#[derive(Debug, Clone)]
pub struct IndexRoot {
    root: PathBuf,
    retire_grace: Duration,
}

/// An opened generation: engine storage plus content store.
#[derive(Debug)]
pub struct Generation {
    id: String,
    dir: PathBuf,
    pool: SqlitePool,
    writer_open: Arc<AtomicBool>,
}

/// A generation that is not (yet) referenced by the pointer.
///
/// Dropping it without promotion deletes its directory, so an aborted or
/// cancelled build never leaves a half-written generation behind.
#[derive(Debug)]
pub struct StagedGeneration {
    generation: Generation,
    armed: bool,
}

impl IndexRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            retire_grace: RETIRE_GRACE,
        }
    }

    /// Sets how long superseded generations survive their retirement.
    pub fn with_retire_grace(mut self, grace: Duration) -> Self {
        self.retire_grace = grace;
        self
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    fn pointer_path(&self) -> PathBuf {
        self.root.join(POINTER)
    }

    /// Id of the generation the pointer resolves to, if any.
    pub fn current_id(&self) -> Result<Option<String>> {
        match std::fs::read_link(self.pointer_path()) {
            Ok(target) => {
                let id = target
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .ok_or_else(|| Error::Index {
                        path: self.root.clone(),
                        message: format!("pointer has no target: {}", target.display()),
                    })?;
                Ok(Some(id))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Creates an empty, initialized generation and points `cur` at it if
    /// no pointer exists yet. Returns the current generation id.
    pub async fn ensure(&self) -> Result<String> {
        if let Some(id) = self.current_id()? {
            return Ok(id);
        }
        let staged = self.stage(false).await?;
        let id = staged.id().to_string();
        self.promote(staged).await?;
        info!(root = ?self.root, generation = %id, "Initialized empty index");
        Ok(id)
    }

    /// Opens the generation serving reads, initializing an empty index
    /// first if the root has none.
    ///
    /// A promotion racing the open retires the generation just resolved; the
    /// pointer is then re-read and the new generation opened instead.
    pub async fn open_current(&self) -> Result<Generation> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let id = self.ensure().await?;
            let dir = self.root.join(&id);
            let opened = match dir.is_dir() {
                true => Generation::open(id.clone(), dir).await,
                false => Err(Error::Index {
                    path: self.root.clone(),
                    message: format!("pointer resolves to missing generation {}", id),
                }),
            };
            match opened {
                Err(e)
                    if attempts < OPEN_ATTEMPTS
                        && self.current_id()?.as_deref() != Some(id.as_str()) =>
                {
                    debug!(error = %e, "Generation retired while opening, retrying");
                }
                other => return other,
            }
        }
    }

    /// Allocates a new generation. With `copy_from_current` it starts as a
    /// deep copy of the live generation; otherwise it starts empty.
    pub async fn stage(&self, copy_from_current: bool) -> Result<StagedGeneration> {
        std::fs::create_dir_all(&self.root)?;

        let id = Uuid::new_v4().to_string();
        let dir = self.root.join(&id);

        let source = match copy_from_current {
            true => self.current_id()?.map(|cur| self.root.join(cur)),
            false => None,
        };

        // Arm cleanup before the first write into the directory.
        std::fs::create_dir(&dir)?;
        let cleanup = DirGuard(Some(dir.clone()));
        std::fs::write(dir.join(STAGING_MARKER), b"")?;

        if let Some(src) = source {
            let dst = dir.clone();
            tokio::task::spawn_blocking(move || copy_dir_recursive(&src, &dst))
                .await
                .map_err(|e| Error::Io(std::io::Error::other(e)))??;
        }

        let pool = db::connect(&dir).await?;
        migrate::run_migrations(&pool).await?;
        cleanup.disarm();

        info!(generation = %id, copied = copy_from_current, "Staged generation");
        Ok(StagedGeneration {
            generation: Generation {
                id,
                dir,
                pool,
                writer_open: Arc::new(AtomicBool::new(false)),
            },
            armed: true,
        })
    }

    /// Atomically points `cur` at `staged`, then retires the superseded
    /// generation and reclaims those whose grace period ran out. Both steps
    /// are best-effort.
    pub async fn promote(&self, mut staged: StagedGeneration) -> Result<()> {
        staged.generation.pool.close().await;

        let previous = self.current_id()?;
        let id = staged.generation.id.clone();

        let tmp_link = self.root.join(format!("{}.{}.tmp", POINTER, Uuid::new_v4()));
        match std::fs::remove_file(staged.generation.dir.join(STAGING_MARKER)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        make_pointer(&id, &tmp_link)?;
        if let Err(e) = std::fs::rename(&tmp_link, self.pointer_path()) {
            let _ = std::fs::remove_file(&tmp_link);
            return Err(e.into());
        }
        staged.armed = false;
        info!(generation = %id, previous = ?previous, "Promoted generation");

        if let Some(prev) = previous.filter(|p| *p != id) {
            self.retire(&prev);
        }
        self.reclaim(&id);
        Ok(())
    }

    /// Drops a staged generation without publishing it.
    pub fn discard(&self, staged: StagedGeneration) {
        drop(staged);
    }

    /// Removes the pointer and every generation under the root.
    pub fn wipe(&self) -> Result<()> {
        match std::fs::remove_file(self.pointer_path()) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        for id in self.generation_ids()? {
            std::fs::remove_dir_all(self.root.join(&id))?;
        }
        info!(root = ?self.root, "Wiped index");
        Ok(())
    }

    fn retire(&self, id: &str) {
        match std::fs::write(self.root.join(id).join(RETIRED_MARKER), b"") {
            Ok(()) => debug!(generation = %id, "Retired generation"),
            Err(e) => warn!(generation = %id, error = %e, "Failed to retire generation"),
        }
    }

    /// Removes every generation but `current`, except those still being
    /// staged by a concurrent build and those retired within the grace
    /// period. Unmarked directories are leftovers of failed cleanups.
    fn reclaim(&self, current: &str) {
        let Ok(ids) = self.generation_ids() else {
            return;
        };
        for id in ids.into_iter().filter(|id| id != current) {
            if self.marker_younger_than(&id, STAGING_MARKER, STALE_STAGING)
                || self.marker_younger_than(&id, RETIRED_MARKER, self.retire_grace)
            {
                continue;
            }
            match std::fs::remove_dir_all(self.root.join(&id)) {
                Ok(()) => debug!(generation = %id, "Reclaimed generation"),
                Err(e) => warn!(generation = %id, error = %e, "Failed to reclaim generation"),
            }
        }
    }

    fn marker_younger_than(&self, id: &str, marker: &str, limit: Duration) -> bool {
        std::fs::metadata(self.root.join(id).join(marker))
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.elapsed().ok())
            .is_some_and(|age| age < limit)
    }

    fn generation_ids(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type()?.is_dir() && Uuid::parse_str(&name).is_ok() {
                ids.push(name);
            }
        }
        Ok(ids)
    }
}

impl Generation {
    async fn open(id: String, dir: PathBuf) -> Result<Self> {
        let pool = db::connect(&dir).await?;
        Ok(Self {
            id,
            dir,
            pool,
            writer_open: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn content_store(&self) -> ContentStore {
        ContentStore::new(self.dir.join(CONTENT_DIR))
    }

    /// Claims the single writer slot. Released by [`WriterSlot`]'s drop.
    pub(crate) fn claim_writer(&self) -> Result<WriterSlot> {
        if self
            .writer_open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::WriterBusy(self.id.clone()));
        }
        Ok(WriterSlot(self.writer_open.clone()))
    }

    /// Pages (not section sub-documents) recorded in this generation,
    /// optionally restricted to one section.
    pub async fn indexed_pages(&self, section: Option<&str>) -> Result<Vec<IndexedPage>> {
        let rows = sqlx::query(
            r#"
            SELECT path, section, title, checksum
            FROM documents
            WHERE parent IS NULL AND (?1 IS NULL OR section = ?1)
            ORDER BY section, path
            "#,
        )
        .bind(section)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| IndexedPage {
                path: row.get("path"),
                section: row.get("section"),
                title: row.get("title"),
                checksum: row.get("checksum"),
            })
            .collect())
    }

    /// Number of documents (pages and sections) in this generation.
    pub async fn document_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Closes the engine storage, flushing it to disk.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl StagedGeneration {
    pub fn generation(&self) -> &Generation {
        &self.generation
    }
}

impl Deref for StagedGeneration {
    type Target = Generation;

    fn deref(&self) -> &Generation {
        &self.generation
    }
}

impl Drop for StagedGeneration {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_dir_all(&self.generation.dir) {
            Ok(()) => info!(generation = %self.generation.id, "Discarded staged generation"),
            Err(e) => warn!(
                generation = %self.generation.id,
                error = %e,
                "Failed to discard staged generation"
            ),
        }
    }
}

/// Holds the writer slot of a generation until dropped.
#[derive(Debug)]
pub(crate) struct WriterSlot(Arc<AtomicBool>);

impl Drop for WriterSlot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Removes a half-initialized directory unless disarmed.
struct DirGuard(Option<PathBuf>);

impl DirGuard {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for DirGuard {
    fn drop(&mut self) {
        if let Some(dir) = self.0.take() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}

#[cfg(unix)]
fn make_pointer(target: &str, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn make_pointer(target: &str, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(src) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
