//! All-or-nothing batches of document mutations against one generation.
//!
//! Engine mutations are invisible to searches until [`IndexTransaction::commit`].
//! Content store writes land immediately, which is harmless: a batch only
//! ever runs against a staged generation, and a failed batch discards that
//! generation as a whole.

use sqlx::{Row, Sqlite, Transaction};
use tracing::debug;

use crate::content::ContentStore;
use crate::differ::checksum_bytes;
use crate::error::Result;
use crate::extract::Extractor;
use crate::generation::{Generation, WriterSlot};
use crate::models::Document;

/// The single live writer of a generation.
pub struct IndexTransaction<'g> {
    generation: &'g Generation,
    tx: Transaction<'static, Sqlite>,
    content: ContentStore,
    _slot: WriterSlot,
}

impl Generation {
    /// Opens the writer of this generation. Fails with
    /// [`Error::WriterBusy`](crate::error::Error::WriterBusy) while another
    /// transaction is live.
    pub async fn begin(&self) -> Result<IndexTransaction<'_>> {
        let slot = self.claim_writer()?;
        let tx = self.pool().begin().await?;
        Ok(IndexTransaction {
            generation: self,
            tx,
            content: self.content_store(),
            _slot: slot,
        })
    }
}

impl<'g> IndexTransaction<'g> {
    pub fn generation(&self) -> &'g Generation {
        self.generation
    }

    /// Extracts `source` and replaces every document stored for `path` in
    /// `section` (the page and any stale sub-documents) with the result.
    ///
    /// On extraction failure nothing is changed and the error is returned,
    /// leaving the batch usable.
    pub async fn index_document(
        &mut self,
        extractor: &Extractor,
        path: &str,
        source: &[u8],
        section: &str,
    ) -> Result<Vec<Document>> {
        let checksum = checksum_bytes(source);
        let docs = extractor.extract(path, source)?;

        self.remove_document(path, section).await?;

        for doc in &docs {
            let parent = (doc.path != path).then_some(path);
            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO documents (path, section, parent, title, checksum, priority)
                VALUES (?, ?, ?, ?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(&doc.path)
            .bind(section)
            .bind(parent)
            .bind(&doc.title)
            .bind(&checksum)
            .bind(doc.priority)
            .fetch_one(&mut *self.tx)
            .await?;

            let searchable = match &doc.title {
                Some(title) => format!("{}\n{}", title, doc.body),
                None => doc.body.clone(),
            };
            sqlx::query("INSERT INTO documents_fts (rowid, title, content) VALUES (?, ?, ?)")
                .bind(id)
                .bind(&doc.title)
                .bind(&searchable)
                .execute(&mut *self.tx)
                .await?;

            self.content.put(&doc.path, section, &doc.body)?;
        }

        debug!(path = %path, section = %section, documents = docs.len(), "Indexed document");
        Ok(docs)
    }

    /// Removes the page at `path` and its sub-documents. Absence is not an
    /// error.
    pub async fn remove_document(&mut self, path: &str, section: &str) -> Result<()> {
        let rows = sqlx::query(
            "SELECT id, path FROM documents WHERE section = ? AND (path = ? OR parent = ?)",
        )
        .bind(section)
        .bind(path)
        .bind(path)
        .fetch_all(&mut *self.tx)
        .await?;

        for row in &rows {
            let id: i64 = row.get("id");
            sqlx::query("DELETE FROM documents_fts WHERE rowid = ?")
                .bind(id)
                .execute(&mut *self.tx)
                .await?;
            sqlx::query("DELETE FROM documents WHERE id = ?")
                .bind(id)
                .execute(&mut *self.tx)
                .await?;
            let doc_path: String = row.get("path");
            self.content.remove(&doc_path, section)?;
        }

        self.content.remove(path, section)?;
        Ok(())
    }

    /// Durably applies the batch.
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    /// Abandons the batch. Equivalent to dropping the transaction.
    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractConfig;
    use crate::error::Error;
    use crate::generation::IndexRoot;
    use tempfile::TempDir;

    const PAGE: &[u8] = b"<html><head><title>Guide</title></head><body>\
        <div id=\"install\"><h2>Install</h2>Run the installer</div>\
        <div id=\"usage\"><h2>Usage</h2>Call it</div></body></html>";

    fn sectioned() -> Extractor {
        Extractor::new(&ExtractConfig {
            section_selectors: vec!["div".to_string()],
            ..ExtractConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn index_then_commit_is_visible() {
        let tmp = TempDir::new().unwrap();
        let root = IndexRoot::new(tmp.path());
        let staged = root.stage(false).await.unwrap();

        let mut tx = staged.begin().await.unwrap();
        let docs = tx.index_document(&sectioned(), "guide", PAGE, "docs").await.unwrap();
        assert_eq!(docs.len(), 3);
        tx.commit().await.unwrap();

        assert_eq!(staged.document_count().await.unwrap(), 3);
        let pages = staged.indexed_pages(Some("docs")).await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].path, "guide");
        assert_eq!(pages[0].checksum, checksum_bytes(PAGE));

        let store = staged.content_store();
        assert_eq!(
            store.get("guide#install", "docs", false).unwrap().as_deref(),
            Some("Run the installer")
        );
    }

    #[tokio::test]
    async fn reindex_drops_stale_sections() {
        let tmp = TempDir::new().unwrap();
        let root = IndexRoot::new(tmp.path());
        let staged = root.stage(false).await.unwrap();
        let extractor = sectioned();

        let mut tx = staged.begin().await.unwrap();
        tx.index_document(&extractor, "guide", PAGE, "docs").await.unwrap();
        tx.index_document(
            &extractor,
            "guide",
            b"<html><head></head><body><div id=\"install\"><h2>Install</h2>Again</div></body></html>",
            "docs",
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(staged.document_count().await.unwrap(), 2);
        assert_eq!(staged.content_store().get("guide#usage", "docs", false).unwrap(), None);
    }

    #[tokio::test]
    async fn remove_document_clears_engine_and_store() {
        let tmp = TempDir::new().unwrap();
        let root = IndexRoot::new(tmp.path());
        let staged = root.stage(false).await.unwrap();

        let mut tx = staged.begin().await.unwrap();
        tx.index_document(&sectioned(), "guide", PAGE, "docs").await.unwrap();
        tx.remove_document("guide", "docs").await.unwrap();
        tx.remove_document("never-indexed", "docs").await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(staged.document_count().await.unwrap(), 0);
        assert_eq!(staged.content_store().get("guide", "docs", false).unwrap(), None);
    }

    #[tokio::test]
    async fn sections_are_independent() {
        let tmp = TempDir::new().unwrap();
        let root = IndexRoot::new(tmp.path());
        let staged = root.stage(false).await.unwrap();
        let extractor = Extractor::new(&ExtractConfig::default()).unwrap();

        let mut tx = staged.begin().await.unwrap();
        tx.index_document(&extractor, "index", PAGE, "a").await.unwrap();
        tx.index_document(&extractor, "index", PAGE, "b").await.unwrap();
        tx.remove_document("index", "a").await.unwrap();
        tx.commit().await.unwrap();

        let pages = staged.indexed_pages(None).await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].section, "b");
    }

    #[tokio::test]
    async fn uncommitted_batch_is_invisible() {
        let tmp = TempDir::new().unwrap();
        let root = IndexRoot::new(tmp.path());
        let staged = root.stage(false).await.unwrap();
        let extractor = Extractor::new(&ExtractConfig::default()).unwrap();

        let mut tx = staged.begin().await.unwrap();
        tx.index_document(&extractor, "index", PAGE, "a").await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(staged.document_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn one_writer_per_generation() {
        let tmp = TempDir::new().unwrap();
        let root = IndexRoot::new(tmp.path());
        let staged = root.stage(false).await.unwrap();

        let tx = staged.begin().await.unwrap();
        assert!(matches!(staged.begin().await, Err(Error::WriterBusy(_))));
        tx.commit().await.unwrap();
        assert!(staged.begin().await.is_ok());
    }
}
