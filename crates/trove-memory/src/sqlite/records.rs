use chrono::{DateTime, SecondsFormat, Utc};

use super::SqliteStore;
use crate::error::MemoryError;
use crate::types::FileRecord;

type RecordRow = (String, String, String, String);

impl SqliteStore {
    /// Insert or replace the record for `record.file_path` in one statement.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn upsert_file_record(&self, record: &FileRecord) -> Result<(), MemoryError> {
        let chunk_ids = serde_json::to_string(&record.chunk_ids)?;
        sqlx::query(
            "INSERT INTO file_records (file_path, fingerprint, chunk_ids, indexed_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(file_path) DO UPDATE SET \
             fingerprint = excluded.fingerprint, \
             chunk_ids = excluded.chunk_ids, \
             indexed_at = excluded.indexed_at",
        )
        .bind(&record.file_path)
        .bind(&record.fingerprint)
        .bind(chunk_ids)
        .bind(record.indexed_at.to_rfc3339_opts(SecondsFormat::Micros, true))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the query fails or a stored row is corrupt.
    pub async fn file_record(&self, file_path: &str) -> Result<Option<FileRecord>, MemoryError> {
        let row: Option<RecordRow> = sqlx::query_as(
            "SELECT file_path, fingerprint, chunk_ids, indexed_at \
             FROM file_records WHERE file_path = ?",
        )
        .bind(file_path)
        .fetch_optional(&self.pool)
        .await?;

        row.map(decode_record).transpose()
    }

    /// All records ordered by path.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored row is corrupt.
    pub async fn file_records(&self) -> Result<Vec<FileRecord>, MemoryError> {
        let rows: Vec<RecordRow> = sqlx::query_as(
            "SELECT file_path, fingerprint, chunk_ids, indexed_at \
             FROM file_records ORDER BY file_path ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(decode_record).collect()
    }

    /// Returns `true` when a record was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete_file_record(&self, file_path: &str) -> Result<bool, MemoryError> {
        let result = sqlx::query("DELETE FROM file_records WHERE file_path = ?")
            .bind(file_path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn decode_record(
    (file_path, fingerprint, chunk_ids, indexed_at): RecordRow,
) -> Result<FileRecord, MemoryError> {
    let chunk_ids: Vec<String> = serde_json::from_str(&chunk_ids)?;
    let indexed_at = DateTime::parse_from_rfc3339(&indexed_at)
        .map_err(|source| MemoryError::Timestamp {
            value: indexed_at.clone(),
            source,
        })?
        .with_timezone(&Utc);
    Ok(FileRecord {
        file_path,
        fingerprint,
        chunk_ids,
        indexed_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteStore {
        SqliteStore::new(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn upsert_then_load() {
        let store = test_store().await;
        let record = FileRecord::new("src/lib.rs", "abc", vec!["x:1".into(), "x:0".into()]);
        store.upsert_file_record(&record).await.unwrap();

        let loaded = store.file_record("src/lib.rs").await.unwrap().unwrap();
        assert_eq!(loaded.fingerprint, "abc");
        assert_eq!(loaded.chunk_ids, vec!["x:0", "x:1"]);
        assert_eq!(
            loaded.indexed_at.timestamp_micros(),
            record.indexed_at.timestamp_micros()
        );
    }

    #[tokio::test]
    async fn upsert_replaces_existing() {
        let store = test_store().await;
        store
            .upsert_file_record(&FileRecord::new("a.md", "v1", vec!["a:0".into()]))
            .await
            .unwrap();
        store
            .upsert_file_record(&FileRecord::new("a.md", "v2", vec![]))
            .await
            .unwrap();

        let all = store.file_records().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].fingerprint, "v2");
        assert!(all[0].chunk_ids.is_empty());
    }

    #[tokio::test]
    async fn records_ordered_by_path() {
        let store = test_store().await;
        for path in ["c.txt", "a.txt", "b.txt"] {
            store
                .upsert_file_record(&FileRecord::new(path, "fp", vec![]))
                .await
                .unwrap();
        }
        let paths: Vec<_> = store
            .file_records()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.file_path)
            .collect();
        assert_eq!(paths, vec!["a.txt", "b.txt", "c.txt"]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = test_store().await;
        store
            .upsert_file_record(&FileRecord::new("a.md", "v1", vec![]))
            .await
            .unwrap();
        assert!(store.delete_file_record("a.md").await.unwrap());
        assert!(!store.delete_file_record("a.md").await.unwrap());
        assert!(store.file_record("a.md").await.unwrap().is_none());
    }
}
