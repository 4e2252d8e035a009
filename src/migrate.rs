use sqlx::SqlitePool;

use crate::error::Result;

/// Creates the fixed index schema. Safe to run against an existing
/// generation.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // `parent` is NULL for pages and holds the page path for section
    // sub-documents, so re-indexing a page can drop its stale sections.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY,
            path TEXT NOT NULL,
            section TEXT NOT NULL,
            parent TEXT,
            title TEXT,
            checksum TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 0,
            UNIQUE(path, section)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='documents_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE documents_fts USING fts5(
                title,
                content
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_parent ON documents(section, parent)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Whether `pool` holds a usable index schema.
pub async fn has_schema(pool: &SqlitePool) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('documents', 'documents_fts')",
    )
    .fetch_one(pool)
    .await?;
    Ok(count == 2)
}
