mod model;
mod search;

pub use model::{ChunkRecord, FileRecord, FileStatus, IndexStats, NewFile};
pub use search::sanitize_fts_query;

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use crate::{Error, Result};

/// Durable, single-writer, write-ahead-logged metadata store (spec.md §4.A).
/// Each public operation below is a single transaction.
#[derive(Clone)]
pub struct MetadataIndex {
    pool: SqlitePool,
}

impl MetadataIndex {
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&pool)
            .await?;

        sqlx::migrate!().run(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn now_unix() -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// Init(meta) (spec.md §4.D): `Conflict` if an `active` row exists with the same
    /// id; replaces any `pending` row with the same id (its chunks cascade).
    pub async fn create_file(&self, meta: NewFile) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let existing_status: Option<String> =
            sqlx::query_scalar("SELECT status FROM files WHERE id = ?")
                .bind(&meta.id)
                .fetch_optional(&mut *tx)
                .await?;

        match existing_status.as_deref() {
            Some("active") => {
                return Err(Error::conflict(format!(
                    "file already exists and is active: {}",
                    meta.id
                )));
            }
            Some("pending") => {
                sqlx::query("DELETE FROM files WHERE id = ?")
                    .bind(&meta.id)
                    .execute(&mut *tx)
                    .await?;
            }
            Some(_) | None => {}
        }

        sqlx::query(
            "INSERT INTO files (id, name, size, mime_type, iv, salt, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, 'pending', ?)",
        )
        .bind(&meta.id)
        .bind(&meta.name)
        .bind(meta.size)
        .bind(&meta.mime_type)
        .bind(&meta.iv)
        .bind(&meta.salt)
        .bind(Self::now_unix())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn list_files(
        &self,
        status: FileStatus,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<FileRecord>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(
            "SELECT * FROM files WHERE status = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(status.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let files = rows
            .iter()
            .map(FileRecord::from_row)
            .collect::<Result<Vec<_>>>()?;

        Ok((files, total))
    }

    pub async fn search_files(&self, query: &str, status: FileStatus) -> Result<Vec<FileRecord>> {
        let fts_query = sanitize_fts_query(query);

        let rows = sqlx::query(
            "SELECT files.* FROM files
             JOIN files_fts ON files.rowid = files_fts.rowid
             WHERE files_fts MATCH ? AND files.status = ?
             ORDER BY files.created_at DESC",
        )
        .bind(&fts_query)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(FileRecord::from_row).collect()
    }

    pub async fn get_file(&self, id: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query("SELECT * FROM files WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(FileRecord::from_row).transpose()
    }

    pub async fn get_chunk(&self, file_id: &str, idx: i64) -> Result<Option<ChunkRecord>> {
        let row = sqlx::query("SELECT * FROM chunks WHERE file_id = ? AND idx = ?")
            .bind(file_id)
            .bind(idx)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(ChunkRecord::from_row).transpose()
    }

    pub async fn get_chunks(&self, file_id: &str) -> Result<Vec<ChunkRecord>> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE file_id = ? ORDER BY idx ASC")
            .bind(file_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(ChunkRecord::from_row).collect()
    }

    /// Returns the stored chunk indices in ascending order, for the resumable-upload
    /// discovery endpoint (spec.md §4.D `Discover-Chunks`).
    pub async fn discover_chunk_indices(&self, file_id: &str) -> Result<Vec<i64>> {
        let rows: Vec<i64> =
            sqlx::query_scalar("SELECT idx FROM chunks WHERE file_id = ? ORDER BY idx ASC")
                .bind(file_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    /// Overwrites any prior chunk at `(fileId, idx)` (spec.md §4.A `putChunk`).
    pub async fn put_chunk(
        &self,
        file_id: &str,
        idx: i64,
        message_id: &str,
        channel_id: &str,
        size: i64,
        url: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO chunks (file_id, idx, message_id, channel_id, size, url)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(file_id, idx) DO UPDATE SET
                message_id = excluded.message_id,
                channel_id = excluded.channel_id,
                size = excluded.size,
                url = excluded.url",
        )
        .bind(file_id)
        .bind(idx)
        .bind(message_id)
        .bind(channel_id)
        .bind(size)
        .bind(url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Deletes and returns the chunk at `(fileId, idx)`, if any — used by the upload
    /// engine's idempotent-overwrite path to learn which external record to sweep
    /// (spec.md §4.D `Chunk-Upload`).
    pub async fn take_chunk(&self, file_id: &str, idx: i64) -> Result<Option<ChunkRecord>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM chunks WHERE file_id = ? AND idx = ?")
            .bind(file_id)
            .bind(idx)
            .fetch_optional(&mut *tx)
            .await?;
        let record = row.as_ref().map(ChunkRecord::from_row).transpose()?;

        if record.is_some() {
            sqlx::query("DELETE FROM chunks WHERE file_id = ? AND idx = ?")
                .bind(file_id)
                .bind(idx)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(record)
    }

    pub async fn update_chunk_url(&self, file_id: &str, idx: i64, url: &str) -> Result<()> {
        sqlx::query("UPDATE chunks SET url = ? WHERE file_id = ? AND idx = ?")
            .bind(url)
            .bind(file_id)
            .bind(idx)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_status(&self, id: &str, status: FileStatus) -> Result<()> {
        let result = sqlx::query("UPDATE files SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("file not found: {id}")));
        }
        Ok(())
    }

    /// Deletes the file row (cascading to its chunks) and returns both, so the
    /// caller can schedule external cleanup of the collected message ids.
    pub async fn delete_file_cascade(
        &self,
        id: &str,
    ) -> Result<Option<(FileRecord, Vec<ChunkRecord>)>> {
        let mut tx = self.pool.begin().await?;

        let file_row = sqlx::query("SELECT * FROM files WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(file_row) = file_row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let file = FileRecord::from_row(&file_row)?;

        let chunk_rows = sqlx::query("SELECT * FROM chunks WHERE file_id = ? ORDER BY idx ASC")
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;
        let chunks = chunk_rows
            .iter()
            .map(ChunkRecord::from_row)
            .collect::<Result<Vec<_>>>()?;

        sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some((file, chunks)))
    }

    pub async fn list_pending_file_ids(&self) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM files WHERE status = 'pending'")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    pub async fn vacuum(&self) -> Result<()> {
        sqlx::query("PRAGMA optimize;").execute(&self.pool).await?;
        sqlx::query("VACUUM;").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let row = sqlx::query(
            "SELECT
                (SELECT COUNT(*) FROM files WHERE status = 'active') AS active_files,
                (SELECT COUNT(*) FROM files WHERE status = 'trashed') AS trashed_files,
                (SELECT COUNT(*) FROM files WHERE status = 'pending') AS pending_files,
                (SELECT COUNT(*) FROM chunks) AS total_chunks,
                (SELECT COALESCE(SUM(size), 0) FROM files WHERE status IN ('active', 'trashed')) AS total_bytes",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(IndexStats {
            active_files: row.try_get("active_files")?,
            trashed_files: row.try_get("trashed_files")?,
            pending_files: row.try_get("pending_files")?,
            total_chunks: row.try_get("total_chunks")?,
            total_bytes: row.try_get("total_bytes")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_temp() -> (MetadataIndex, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        let index = MetadataIndex::open(&path).await.unwrap();
        (index, dir)
    }

    fn new_file(id: &str) -> NewFile {
        NewFile {
            id: id.to_string(),
            name: format!("{id}.bin"),
            size: 0,
            mime_type: None,
            iv: None,
            salt: None,
        }
    }

    #[tokio::test]
    async fn create_file_conflicts_with_active_id() {
        let (index, _dir) = open_temp().await;
        index.create_file(new_file("a")).await.unwrap();
        index.set_status("a", FileStatus::Active).await.unwrap();

        let err = index.create_file(new_file("a")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn re_init_overwrites_pending_row() {
        let (index, _dir) = open_temp().await;
        index.create_file(new_file("a")).await.unwrap();
        index
            .put_chunk("a", 0, "msg1", "chan1", 10, "https://example/1")
            .await
            .unwrap();

        index.create_file(new_file("a")).await.unwrap();

        let chunks = index.get_chunks("a").await.unwrap();
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn put_chunk_overwrites_existing_pair() {
        let (index, _dir) = open_temp().await;
        index.create_file(new_file("a")).await.unwrap();
        index
            .put_chunk("a", 0, "msg1", "chan1", 10, "https://example/1")
            .await
            .unwrap();
        index
            .put_chunk("a", 0, "msg2", "chan1", 20, "https://example/2")
            .await
            .unwrap();

        let chunks = index.get_chunks("a").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].message_id, "msg2");
        assert_eq!(chunks[0].size, 20);
    }

    #[tokio::test]
    async fn take_chunk_removes_and_returns_row() {
        let (index, _dir) = open_temp().await;
        index.create_file(new_file("a")).await.unwrap();
        index
            .put_chunk("a", 0, "msg1", "chan1", 10, "https://example/1")
            .await
            .unwrap();

        let taken = index.take_chunk("a", 0).await.unwrap();
        assert_eq!(taken.unwrap().message_id, "msg1");
        assert!(index.take_chunk("a", 0).await.unwrap().is_none());
        assert!(index.get_chunks("a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_file_cascade_removes_chunks() {
        let (index, _dir) = open_temp().await;
        index.create_file(new_file("a")).await.unwrap();
        index
            .put_chunk("a", 0, "msg1", "chan1", 10, "https://example/1")
            .await
            .unwrap();
        index.set_status("a", FileStatus::Active).await.unwrap();

        let (file, chunks) = index.delete_file_cascade("a").await.unwrap().unwrap();
        assert_eq!(file.id, "a");
        assert_eq!(chunks.len(), 1);
        assert!(index.get_file("a").await.unwrap().is_none());

        assert!(index.delete_file_cascade("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn discover_chunk_indices_sorted() {
        let (index, _dir) = open_temp().await;
        index.create_file(new_file("a")).await.unwrap();
        for idx in [2, 0, 1] {
            index
                .put_chunk("a", idx, "m", "c", 1, "https://example")
                .await
                .unwrap();
        }
        assert_eq!(index.discover_chunk_indices("a").await.unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn search_matches_prefix_and_is_quote_safe() {
        let (index, _dir) = open_temp().await;
        index
            .create_file(NewFile {
                name: "quarterly report.pdf".to_string(),
                ..new_file("a")
            })
            .await
            .unwrap();
        index.set_status("a", FileStatus::Active).await.unwrap();

        let results = index
            .search_files("quar\"ter", FileStatus::Active)
            .await
            .unwrap();
        assert!(results.is_empty());

        let results = index.search_files("quar", FileStatus::Active).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
    }

    #[tokio::test]
    async fn list_files_orders_by_created_at_desc_with_total() {
        let (index, _dir) = open_temp().await;
        for id in ["a", "b", "c"] {
            index.create_file(new_file(id)).await.unwrap();
            index.set_status(id, FileStatus::Active).await.unwrap();
        }

        let (files, total) = index.list_files(FileStatus::Active, 2, 0).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(files.len(), 2);
    }
}
