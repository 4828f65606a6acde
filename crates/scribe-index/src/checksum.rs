//! Durable per-file index state in the `file_index_state` table.

use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::SqlitePool;

use crate::error::Result;

/// Last successful index pass over one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIndexState {
    pub file_path: String,
    /// blake3 hex of the whole file.
    pub checksum: String,
    /// Unix seconds.
    pub indexed_at: i64,
    pub chunk_count: usize,
}

#[derive(Debug, Clone)]
pub struct ChecksumStore {
    pool: SqlitePool,
}

type StateRow = (String, String, i64, i64);

impl ChecksumStore {
    /// Wrap a pool that already ran the workspace migrations.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get(&self, file_path: &str) -> Result<Option<FileIndexState>> {
        let row: Option<StateRow> = sqlx::query_as(
            "SELECT file_path, checksum, indexed_at, chunk_count \
             FROM file_index_state WHERE file_path = ?",
        )
        .bind(file_path)
        .fetch_optional(&self.pool)
        .await?;
        row.map(state_from_row).transpose()
    }

    /// Insert or replace the state for `state.file_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn put(&self, state: &FileIndexState) -> Result<()> {
        let chunk_count = i64::try_from(state.chunk_count)?;
        sqlx::query(
            "INSERT INTO file_index_state (file_path, checksum, indexed_at, chunk_count) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(file_path) DO UPDATE SET \
               checksum = excluded.checksum, \
               indexed_at = excluded.indexed_at, \
               chunk_count = excluded.chunk_count",
        )
        .bind(&state.file_path)
        .bind(&state.checksum)
        .bind(state.indexed_at)
        .bind(chunk_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns `true` if a row was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete(&self, file_path: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM file_index_state WHERE file_path = ?")
            .bind(file_path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All tracked files ordered by path.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list(&self) -> Result<Vec<FileIndexState>> {
        let rows: Vec<StateRow> = sqlx::query_as(
            "SELECT file_path, checksum, indexed_at, chunk_count \
             FROM file_index_state ORDER BY file_path",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(state_from_row).collect()
    }
}

fn state_from_row((file_path, checksum, indexed_at, chunk_count): StateRow) -> Result<FileIndexState> {
    Ok(FileIndexState {
        file_path,
        checksum,
        indexed_at,
        chunk_count: usize::try_from(chunk_count)?,
    })
}

/// Whole-file checksum used for change detection.
#[must_use]
pub fn file_checksum(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use scribe_memory::sqlite::SqliteStore;

    use super::*;

    async fn test_store() -> ChecksumStore {
        let sqlite = SqliteStore::new(":memory:").await.unwrap();
        ChecksumStore::new(sqlite.pool().clone())
    }

    fn state(path: &str, checksum: &str, chunks: usize) -> FileIndexState {
        FileIndexState {
            file_path: path.into(),
            checksum: checksum.into(),
            indexed_at: 1_700_000_000,
            chunk_count: chunks,
        }
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let store = test_store().await;
        assert!(store.get("nope.md").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_then_get() {
        let store = test_store().await;
        let s = state("a.md", "abc", 3);
        store.put(&s).await.unwrap();
        assert_eq!(store.get("a.md").await.unwrap(), Some(s));
    }

    #[tokio::test]
    async fn put_overwrites_existing() {
        let store = test_store().await;
        store.put(&state("a.md", "old", 1)).await.unwrap();
        store.put(&state("a.md", "new", 4)).await.unwrap();
        let got = store.get("a.md").await.unwrap().unwrap();
        assert_eq!(got.checksum, "new");
        assert_eq!(got.chunk_count, 4);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_and_list() {
        let store = test_store().await;
        store.put(&state("b.md", "x", 1)).await.unwrap();
        store.put(&state("a.md", "y", 2)).await.unwrap();

        let paths: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.file_path)
            .collect();
        assert_eq!(paths, ["a.md", "b.md"]);

        assert!(store.delete("a.md").await.unwrap());
        assert!(!store.delete("a.md").await.unwrap());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[test]
    fn checksum_changes_on_single_byte() {
        assert_ne!(file_checksum(b"hello"), file_checksum(b"hellp"));
        assert_eq!(file_checksum(b"hello"), file_checksum(b"hello"));
    }

    #[test]
    fn unix_now_is_positive() {
        assert!(unix_now() > 1_600_000_000);
    }
}
