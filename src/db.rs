use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;

use crate::error::Result;

/// File name of the engine storage inside a generation directory.
pub const DB_FILE: &str = "index.sqlite";

/// Opens the engine storage of a generation.
///
/// The rollback journal (not WAL) keeps each generation self-contained in a
/// single file once its pool is closed, so it can be copied or archived.
///
/// The directory must already exist; the database file is created on first
/// open.
pub async fn connect(generation_dir: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(generation_dir.join(DB_FILE))
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
