//! Zip packaging of a single generation.
//!
//! An archive holds one generation's directory with relative paths
//! preserved: `index.sqlite` plus `content/<digest>` blobs.

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use tracing::info;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

use crate::db::DB_FILE;
use crate::error::{Error, Result};
use crate::generation::{IndexRoot, RETIRED_MARKER, STAGING_MARKER};
use crate::{db, migrate};

/// Writes every file below `dir` into a zip archive at `out`.
pub fn pack_dir(dir: &Path, out: &Path) -> Result<()> {
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut zip = zip::ZipWriter::new(File::create(out)?);
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        if entry.depth() == 1
            && (entry.file_name() == STAGING_MARKER || entry.file_name() == RETIRED_MARKER)
        {
            continue;
        }
        let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if entry.file_type().is_dir() {
            zip.add_directory(name, options)?;
        } else {
            zip.start_file(name, options)?;
            std::io::copy(&mut File::open(entry.path())?, &mut zip)?;
        }
    }

    zip.finish()?;
    Ok(())
}

/// Extracts every entry of a zip archive into `dest`. Entries that would
/// escape `dest` are rejected.
pub fn unpack<R: Read + Seek>(reader: R, dest: &Path) -> Result<()> {
    let mut archive = zip::ZipArchive::new(reader)?;
    unpack_entries(&mut archive, dest)
}

/// Like [`unpack`], but rejects archives that carry no engine storage.
pub fn unpack_generation<R: Read + Seek>(reader: R, dest: &Path) -> Result<()> {
    let mut archive = zip::ZipArchive::new(reader)?;
    if !archive.file_names().any(|name| name == DB_FILE) {
        return Err(Error::Archive(format!("archive contains no {}", DB_FILE)));
    }
    unpack_entries(&mut archive, dest)
}

fn unpack_entries<R: Read + Seek>(archive: &mut zip::ZipArchive<R>, dest: &Path) -> Result<()> {
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| Error::Archive(format!("unsafe path in archive: {}", entry.name())))?;
        let target = dest.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&target)?;
        std::io::copy(&mut entry, &mut file)?;
    }

    Ok(())
}

/// Replaces the live index with the generation packed in `reader`.
///
/// The archive is unpacked into an empty staged generation and checked for
/// a usable schema before promotion. A corrupt archive leaves the current
/// generation untouched.
pub async fn replace_from_archive<R>(root: &IndexRoot, reader: R) -> Result<String>
where
    R: Read + Seek + Send + 'static,
{
    let staged = root.stage(false).await?;
    staged.close().await;

    let dest = staged.dir().to_path_buf();
    tokio::task::spawn_blocking(move || unpack_generation(reader, &dest))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))??;

    let pool = db::connect(staged.dir()).await?;
    let usable = migrate::has_schema(&pool).await;
    pool.close().await;
    if !usable? {
        return Err(Error::Archive("archive does not hold a search index".to_string()));
    }

    let id = staged.id().to_string();
    root.promote(staged).await?;
    info!(generation = %id, "Replaced index from archive");
    Ok(id)
}
