//! Durable [`VectorStore`] in the same `SQLite` database as the file records.
//!
//! Vectors are stored as little-endian `f32` blobs and scored in process.

use std::collections::HashMap;

use sqlx::SqlitePool;

use crate::vector_store::{
    BoxFuture, ScoredVectorPoint, VectorFilter, VectorPoint, VectorStore, VectorStoreError,
    cosine_similarity, matches_filter, rank,
};

#[derive(Debug, Clone)]
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn vector_size(&self, collection: &str) -> Result<Option<u64>, sqlx::Error> {
        let size: Option<i64> =
            sqlx::query_scalar("SELECT vector_size FROM vector_collections WHERE name = ?")
                .bind(collection)
                .fetch_optional(&self.pool)
                .await?;
        Ok(size.and_then(|s| u64::try_from(s).ok()))
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

impl VectorStore for SqliteVectorStore {
    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let size = i64::try_from(vector_size)
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            sqlx::query(
                "INSERT INTO vector_collections (name, vector_size) VALUES (?, ?) \
                 ON CONFLICT(name) DO NOTHING",
            )
            .bind(&collection)
            .bind(size)
            .execute(&self.pool)
            .await
            .map_err(|e| VectorStoreError::Collection(e.to_string()))?;

            let existing = self
                .vector_size(&collection)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            if existing != Some(vector_size) {
                return Err(VectorStoreError::Collection(format!(
                    "collection {collection} has vector size {existing:?}, requested {vector_size}"
                )));
            }
            Ok(())
        })
    }

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let size = self
                .vector_size(&collection)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(size.is_some())
        })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            sqlx::query("DELETE FROM vector_collections WHERE name = ?")
                .bind(&collection)
                .execute(&self.pool)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(())
        })
    }

    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if points.is_empty() {
                return Ok(());
            }
            let vector_size = self
                .vector_size(&collection)
                .await
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?
                .ok_or_else(|| {
                    VectorStoreError::Upsert(format!("collection {collection} not found"))
                })?;
            if let Some(bad) = points
                .iter()
                .find(|p| p.vector.len() as u64 != vector_size)
            {
                return Err(VectorStoreError::Upsert(format!(
                    "point {} has {} dimensions, collection expects {vector_size}",
                    bad.id,
                    bad.vector.len()
                )));
            }

            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            for p in &points {
                let payload = serde_json::to_string(&p.payload)
                    .map_err(|e| VectorStoreError::Serialization(e.to_string()))?;
                sqlx::query(
                    "INSERT INTO vector_points (collection, point_id, vector, payload) \
                     VALUES (?, ?, ?, ?) \
                     ON CONFLICT(collection, point_id) DO UPDATE SET \
                     vector = excluded.vector, payload = excluded.payload",
                )
                .bind(&collection)
                .bind(&p.id)
                .bind(encode_vector(&p.vector))
                .bind(payload)
                .execute(&mut *tx)
                .await
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            }
            tx.commit()
                .await
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            Ok(())
        })
    }

    fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
        filter: Option<VectorFilter>,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let rows: Vec<(i64, String, Vec<u8>, String)> = sqlx::query_as(
                "SELECT seq, point_id, vector, payload FROM vector_points \
                 WHERE collection = ? ORDER BY seq ASC",
            )
            .bind(&collection)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| VectorStoreError::Search(e.to_string()))?;

            let filter = filter.unwrap_or_default();
            let mut scored = Vec::with_capacity(rows.len());
            for (seq, id, blob, payload) in rows {
                let payload: HashMap<String, serde_json::Value> = serde_json::from_str(&payload)
                    .map_err(|e| VectorStoreError::Serialization(e.to_string()))?;
                if !matches_filter(&payload, &filter) {
                    continue;
                }
                scored.push(ScoredVectorPoint {
                    id,
                    score: cosine_similarity(&vector, &decode_vector(&blob)),
                    payload,
                    seq: u64::try_from(seq).unwrap_or_default(),
                });
            }
            Ok(rank(scored, limit))
        })
    }

    fn delete_by_ids(
        &self,
        collection: &str,
        ids: Vec<String>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if ids.is_empty() {
                return Ok(());
            }
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            for id in &ids {
                sqlx::query("DELETE FROM vector_points WHERE collection = ? AND point_id = ?")
                    .bind(&collection)
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            }
            tx.commit()
                .await
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            Ok(())
        })
    }

    fn point_ids(&self, collection: &str) -> BoxFuture<'_, Result<Vec<String>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            sqlx::query_scalar::<_, String>(
                "SELECT point_id FROM vector_points WHERE collection = ? ORDER BY point_id ASC",
            )
            .bind(&collection)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| VectorStoreError::Scroll(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use tempfile::TempDir;

    use super::*;
    use crate::sqlite::SqliteStore;

    async fn store() -> SqliteVectorStore {
        let sqlite = SqliteStore::new(":memory:").await.unwrap();
        SqliteVectorStore::new(sqlite.pool().clone())
    }

    fn point(id: &str, vector: Vec<f32>, file: &str) -> VectorPoint {
        VectorPoint {
            id: id.into(),
            vector,
            payload: HashMap::from([("file_path".into(), serde_json::json!(file))]),
        }
    }

    #[tokio::test]
    async fn upsert_search_roundtrip() {
        let s = store().await;
        s.ensure_collection("chunks", 3).await.unwrap();
        s.upsert(
            "chunks",
            vec![
                point("a", vec![1.0, 0.0, 0.0], "a.rs"),
                point("b", vec![0.0, 1.0, 0.0], "b.rs"),
            ],
        )
        .await
        .unwrap();

        let hits = s.search("chunks", vec![0.0, 1.0, 0.0], 1, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[0].payload["file_path"], "b.rs");
    }

    #[tokio::test]
    async fn ensure_collection_rejects_other_size() {
        let s = store().await;
        s.ensure_collection("chunks", 3).await.unwrap();
        s.ensure_collection("chunks", 3).await.unwrap();
        assert!(s.ensure_collection("chunks", 8).await.is_err());
    }

    #[tokio::test]
    async fn upsert_into_missing_collection_fails() {
        let s = store().await;
        let err = s.upsert("nope", vec![point("a", vec![1.0], "a")]).await;
        assert!(matches!(err, Err(VectorStoreError::Upsert(_))));
    }

    #[tokio::test]
    async fn reupsert_keeps_sequence() {
        let s = store().await;
        s.ensure_collection("chunks", 2).await.unwrap();
        for id in ["x", "y"] {
            s.upsert("chunks", vec![point(id, vec![1.0, 0.0], id)])
                .await
                .unwrap();
        }
        s.upsert("chunks", vec![point("x", vec![1.0, 0.0], "x")])
            .await
            .unwrap();
        let hits = s.search("chunks", vec![1.0, 0.0], 2, None).await.unwrap();
        assert_eq!(hits[0].id, "x");
        assert!(hits[0].seq < hits[1].seq);
    }

    #[tokio::test]
    async fn delete_collection_cascades() {
        let s = store().await;
        s.ensure_collection("chunks", 2).await.unwrap();
        s.upsert("chunks", vec![point("a", vec![1.0, 0.0], "a")])
            .await
            .unwrap();
        s.delete_collection("chunks").await.unwrap();
        assert!(!s.collection_exists("chunks").await.unwrap());
        assert!(s.point_ids("chunks").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trove.db");
        let path = path.to_str().unwrap();
        {
            let sqlite = SqliteStore::new(path).await.unwrap();
            let s = SqliteVectorStore::new(sqlite.pool().clone());
            s.ensure_collection("chunks", 2).await.unwrap();
            s.upsert("chunks", vec![point("a", vec![0.6, 0.8], "a.md")])
                .await
                .unwrap();
            sqlite.close().await;
        }
        let sqlite = SqliteStore::new(path).await.unwrap();
        let s = SqliteVectorStore::new(sqlite.pool().clone());
        assert_eq!(s.point_ids("chunks").await.unwrap(), vec!["a"]);
        let hits = s.search("chunks", vec![0.6, 0.8], 5, None).await.unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    proptest! {
        #[test]
        fn vector_blob_roundtrip(v in proptest::collection::vec(-1.0e6f32..1.0e6, 0..64)) {
            prop_assert_eq!(decode_vector(&encode_vector(&v)), v);
        }
    }
}
