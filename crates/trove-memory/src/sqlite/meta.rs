use super::SqliteStore;
use crate::error::MemoryError;
use crate::types::IndexMeta;

impl SqliteStore {
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn index_meta(&self) -> Result<Option<IndexMeta>, MemoryError> {
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT model, dimension FROM index_meta WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(model, dimension)| {
            Ok::<_, MemoryError>(IndexMeta {
                model,
                dimension: usize::try_from(dimension)?,
            })
        })
        .transpose()
    }

    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn set_index_meta(&self, meta: &IndexMeta) -> Result<(), MemoryError> {
        sqlx::query(
            "INSERT INTO index_meta (id, model, dimension) VALUES (1, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET model = excluded.model, dimension = excluded.dimension",
        )
        .bind(&meta.model)
        .bind(i64::try_from(meta.dimension)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn meta_absent_then_set() {
        let store = SqliteStore::new(":memory:").await.unwrap();
        assert!(store.index_meta().await.unwrap().is_none());

        let meta = IndexMeta {
            model: "text-embedding-3-small".into(),
            dimension: 1536,
        };
        store.set_index_meta(&meta).await.unwrap();
        assert_eq!(store.index_meta().await.unwrap(), Some(meta));
    }
}
