//! Vector rows + `SQLite` file records with per-file atomic replace.
//!
//! Physical rows are keyed by `(chunk id, fingerprint)`, so writing a new
//! version of a file never touches the rows of the committed one. The file
//! record is the commit point: a row is visible to queries only when the
//! record of its file names both its fingerprint and its chunk id. Rows left
//! behind by a crash between the two writes are invisible and reclaimed by
//! [`IndexStore::recover`]. Records and row deletions only change while no
//! query is reading, so a query sees each file either before or after its
//! replacement.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError};

use tokio::sync::{Mutex, RwLock};
use trove_memory::{
    FieldCondition, FileRecord, IndexMeta, SqliteStore, VectorFilter, VectorPoint, VectorStore,
};
use uuid::Uuid;

use crate::chunker::Chunk;
use crate::error::{IndexError, Result};

const CHUNK_COLLECTION: &str = "trove_chunks";
const DELETE_ATTEMPTS: usize = 3;

const KEY_CHUNK_ID: &str = "chunk_id";
const KEY_FINGERPRINT: &str = "fingerprint";
const KEY_TEXT: &str = "text";

/// A chunk together with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub chunk_id: String,
    pub file_path: String,
    pub ordinal: usize,
    pub text: String,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
    pub metadata: BTreeMap<String, String>,
}

/// Restricts a query. Every metadata pair must match; when `file_paths` is
/// set, the chunk must come from one of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    pub metadata: BTreeMap<String, String>,
    pub file_paths: Option<Vec<String>>,
}

impl SearchFilter {
    fn to_vector_filter(&self) -> VectorFilter {
        VectorFilter {
            must: self
                .metadata
                .iter()
                .map(|(k, v)| FieldCondition::text(k.clone(), v.clone()))
                .collect(),
            must_not: Vec::new(),
            should: self
                .file_paths
                .iter()
                .flatten()
                .map(|p| FieldCondition::text("file_path", p.clone()))
                .collect(),
        }
    }

    fn excludes_everything(&self) -> bool {
        self.file_paths.as_ref().is_some_and(Vec::is_empty)
    }
}

/// Result of [`IndexStore::verify_consistency`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Chunk ids named by a record without a stored row.
    pub missing: Vec<String>,
    /// Stored row ids no record refers to.
    pub orphaned: Vec<String>,
}

impl ConsistencyReport {
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty() && self.orphaned.is_empty()
    }
}

/// Result of [`IndexStore::recover`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recovery {
    /// Rows no record referred to, now deleted.
    pub orphaned_rows: usize,
    /// Files whose record named rows that no longer exist. Their records were
    /// removed, so the next pass indexes them as new.
    pub dropped_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub files: usize,
    pub chunks: usize,
    pub model: String,
    pub dimension: Option<usize>,
}

/// Physical row id of a chunk at one file version.
#[must_use]
pub fn point_id(chunk_id: &str, fingerprint: &str) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{chunk_id}@{fingerprint}").as_bytes(),
    )
    .to_string()
}

pub struct IndexStore {
    vectors: Arc<dyn VectorStore>,
    sqlite: SqliteStore,
    model: String,
    collection: String,
    dimension: Mutex<Option<usize>>,
    path_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Writers share it; `recover` takes it exclusively so it never sees rows
    /// of an upsert that has not committed yet.
    maintenance: RwLock<()>,
    /// Queries share it; record writes and the row deletions that follow
    /// them take it exclusively.
    commit: RwLock<()>,
}

impl std::fmt::Debug for IndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexStore")
            .field("model", &self.model)
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

impl IndexStore {
    /// Open the index for `model` and reclaim rows orphaned by an earlier crash.
    ///
    /// # Errors
    ///
    /// [`IndexError::Configuration`] if the index was built with another
    /// model, [`IndexError::Store`] if storage is unavailable.
    pub async fn open(
        vectors: Arc<dyn VectorStore>,
        sqlite: SqliteStore,
        model: impl Into<String>,
    ) -> Result<Self> {
        let model = model.into();
        let meta = sqlite.index_meta().await?;
        if let Some(meta) = &meta {
            if meta.model != model {
                return Err(IndexError::Configuration(format!(
                    "index was built with model {:?}, configured model is {model:?}; \
                     remove the index to rebuild it",
                    meta.model
                )));
            }
            vectors
                .ensure_collection(CHUNK_COLLECTION, meta.dimension as u64)
                .await?;
        }

        let store = Self {
            vectors,
            sqlite,
            model,
            collection: CHUNK_COLLECTION.into(),
            dimension: Mutex::new(meta.map(|m| m.dimension)),
            path_locks: std::sync::Mutex::new(HashMap::new()),
            maintenance: RwLock::new(()),
            commit: RwLock::new(()),
        };
        store.recover().await?;
        Ok(store)
    }

    /// Close the underlying database pool.
    pub async fn close(&self) {
        self.sqlite.close().await;
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn dimension(&self) -> Option<usize> {
        *self.dimension.lock().await
    }

    fn path_lock(&self, file_path: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .path_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(file_path.to_owned()).or_default())
    }

    /// Pin the dimension on first use, reject any other afterwards.
    async fn ensure_dimension(&self, dim: usize) -> Result<()> {
        let mut current = self.dimension.lock().await;
        match *current {
            Some(expected) if expected != dim => Err(IndexError::DimensionMismatch {
                expected,
                actual: dim,
            }),
            Some(_) => Ok(()),
            None => {
                self.vectors
                    .ensure_collection(&self.collection, dim as u64)
                    .await?;
                self.sqlite
                    .set_index_meta(&IndexMeta {
                        model: self.model.clone(),
                        dimension: dim,
                    })
                    .await?;
                tracing::info!(model = %self.model, dimension = dim, "index dimension pinned");
                *current = Some(dim);
                Ok(())
            }
        }
    }

    /// Replace everything stored for `file_path` with `chunks`.
    ///
    /// Writes the new rows, then the record (commit point), then deletes the
    /// rows of the previous version. A failure before the record write leaves
    /// the committed version intact.
    ///
    /// # Errors
    ///
    /// [`IndexError::DimensionMismatch`] for vectors of the wrong size,
    /// [`IndexError::Configuration`] for chunks of another file,
    /// [`IndexError::Store`] if a write before the commit point fails.
    pub async fn upsert_file(
        &self,
        file_path: &str,
        fingerprint: &str,
        chunks: Vec<EmbeddedChunk>,
    ) -> Result<FileRecord> {
        let lock = self.path_lock(file_path);
        let _path_guard = lock.lock().await;
        let _gate = self.maintenance.read().await;

        if let Some(stray) = chunks.iter().find(|c| c.chunk.file_path != file_path) {
            return Err(IndexError::Configuration(format!(
                "chunk {} belongs to {}, not {file_path}",
                stray.chunk.id, stray.chunk.file_path
            )));
        }
        if let Some(first) = chunks.first() {
            let dim = first.vector.len();
            if let Some(bad) = chunks.iter().find(|c| c.vector.len() != dim) {
                return Err(IndexError::DimensionMismatch {
                    expected: dim,
                    actual: bad.vector.len(),
                });
            }
            self.ensure_dimension(dim).await?;
        }

        let previous = self.sqlite.file_record(file_path).await?;

        let chunk_ids: Vec<String> = chunks.iter().map(|c| c.chunk.id.clone()).collect();
        let new_points: HashSet<String> = chunk_ids
            .iter()
            .map(|id| point_id(id, fingerprint))
            .collect();
        let points: Vec<VectorPoint> = chunks
            .into_iter()
            .map(|c| to_point(c, fingerprint))
            .collect();
        if !points.is_empty() {
            self.vectors.upsert(&self.collection, points).await?;
        }

        let record = FileRecord::new(file_path, fingerprint, chunk_ids);
        let _commit = self.commit.write().await;
        self.sqlite.upsert_file_record(&record).await?;

        if let Some(prev) = previous {
            let stale: Vec<String> = prev
                .chunk_ids
                .iter()
                .map(|id| point_id(id, &prev.fingerprint))
                .filter(|id| !new_points.contains(id))
                .collect();
            self.delete_points(file_path, stale).await;
        }

        tracing::debug!(file = %file_path, chunks = record.chunk_ids.len(), "file committed");
        Ok(record)
    }

    /// Remove a file's record and rows. Returns `false` if it was not indexed.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Store`] if the record cannot be read or deleted.
    pub async fn delete_file(&self, file_path: &str) -> Result<bool> {
        let lock = self.path_lock(file_path);
        let _path_guard = lock.lock().await;
        let _gate = self.maintenance.read().await;

        let Some(prev) = self.sqlite.file_record(file_path).await? else {
            return Ok(false);
        };
        let _commit = self.commit.write().await;
        self.sqlite.delete_file_record(file_path).await?;

        let rows: Vec<String> = prev
            .chunk_ids
            .iter()
            .map(|id| point_id(id, &prev.fingerprint))
            .collect();
        self.delete_points(file_path, rows).await;
        tracing::debug!(file = %file_path, "file removed from index");
        Ok(true)
    }

    /// Delete rows that are no longer committed. Failure only over-retains:
    /// the rows are invisible and `recover` reclaims them.
    async fn delete_points(&self, file_path: &str, ids: Vec<String>) {
        if ids.is_empty() {
            return;
        }
        for attempt in 1..=DELETE_ATTEMPTS {
            match self.vectors.delete_by_ids(&self.collection, ids.clone()).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(file = %file_path, attempt, "failed to delete stale rows: {e}");
                }
            }
        }
    }

    /// Nearest committed chunks to `vector`, best first, equal scores in
    /// insertion order.
    ///
    /// # Errors
    ///
    /// [`IndexError::DimensionMismatch`] if `vector` does not match the index.
    pub async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchResult>> {
        let Some(dim) = self.dimension().await else {
            return Ok(Vec::new());
        };
        if vector.len() != dim {
            return Err(IndexError::DimensionMismatch {
                expected: dim,
                actual: vector.len(),
            });
        }
        if top_k == 0 || filter.excludes_everything() {
            return Ok(Vec::new());
        }

        let _commit = self.commit.read().await;
        let vector_filter = filter.to_vector_filter();
        let mut records: HashMap<String, Option<FileRecord>> = HashMap::new();
        let mut limit = top_k.saturating_mul(2);
        loop {
            let hits = self
                .vectors
                .search(
                    &self.collection,
                    vector.to_vec(),
                    limit as u64,
                    Some(vector_filter.clone()),
                )
                .await?;
            let exhausted = hits.len() < limit;

            let mut visible = Vec::with_capacity(top_k);
            for hit in hits {
                let Some(result) = to_result(hit.payload, hit.score) else {
                    continue;
                };
                let path = &result.inner.file_path;
                if !records.contains_key(path) {
                    let record = self.sqlite.file_record(path).await?;
                    records.insert(path.clone(), record);
                }
                let committed = records
                    .get(path)
                    .and_then(Option::as_ref)
                    .is_some_and(|r| {
                        r.fingerprint == result.fingerprint
                            && r.contains_chunk(&result.inner.chunk_id)
                    });
                if committed {
                    visible.push(result.inner);
                    if visible.len() == top_k {
                        return Ok(visible);
                    }
                }
            }
            if exhausted {
                return Ok(visible);
            }
            limit = limit.saturating_mul(2);
        }
    }

    /// # Errors
    ///
    /// Returns [`IndexError::Store`] on read failure.
    pub async fn get_record(&self, file_path: &str) -> Result<Option<FileRecord>> {
        Ok(self.sqlite.file_record(file_path).await?)
    }

    /// All committed records, ordered by path.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Store`] on read failure.
    pub async fn records(&self) -> Result<Vec<FileRecord>> {
        Ok(self.sqlite.file_records().await?)
    }

    async fn referenced_points(&self) -> Result<HashMap<String, String>> {
        let records = self.sqlite.file_records().await?;
        Ok(points_of(&records))
    }

    /// Bring records and rows back in line: drop the record of every file
    /// whose rows are gone (vectors lost with a volatile backend, say), then
    /// delete rows no remaining record refers to.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Store`] if storage is unavailable.
    pub async fn recover(&self) -> Result<Recovery> {
        let _gate = self.maintenance.write().await;
        let stored: HashSet<String> = self
            .vectors
            .point_ids(&self.collection)
            .await?
            .into_iter()
            .collect();
        let mut records = self.sqlite.file_records().await?;

        let _commit = self.commit.write().await;
        let mut dropped_files = Vec::new();
        for record in &records {
            let intact = record
                .chunk_ids
                .iter()
                .all(|id| stored.contains(&point_id(id, &record.fingerprint)));
            if !intact {
                self.sqlite.delete_file_record(&record.file_path).await?;
                tracing::warn!(file = %record.file_path, "record lost its rows, file will be re-indexed");
                dropped_files.push(record.file_path.clone());
            }
        }
        records.retain(|r| !dropped_files.contains(&r.file_path));

        let referenced = points_of(&records);
        let orphans: Vec<String> = stored
            .into_iter()
            .filter(|id| !referenced.contains_key(id))
            .collect();
        let orphaned_rows = orphans.len();
        if orphaned_rows > 0 {
            self.vectors.delete_by_ids(&self.collection, orphans).await?;
            tracing::info!(rows = orphaned_rows, "reclaimed orphaned rows");
        }
        Ok(Recovery {
            orphaned_rows,
            dropped_files,
        })
    }

    /// Compare the chunk ids named by records with the stored rows.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Store`] if storage is unavailable.
    pub async fn verify_consistency(&self) -> Result<ConsistencyReport> {
        let _gate = self.maintenance.write().await;
        let referenced = self.referenced_points().await?;
        let stored: HashSet<String> = self
            .vectors
            .point_ids(&self.collection)
            .await?
            .into_iter()
            .collect();

        let mut missing: Vec<String> = referenced
            .iter()
            .filter(|(point, _)| !stored.contains(*point))
            .map(|(_, chunk_id)| chunk_id.clone())
            .collect();
        let mut orphaned: Vec<String> = stored
            .into_iter()
            .filter(|point| !referenced.contains_key(point))
            .collect();
        missing.sort();
        orphaned.sort();
        Ok(ConsistencyReport { missing, orphaned })
    }

    /// # Errors
    ///
    /// Returns [`IndexError::Store`] on read failure.
    pub async fn stats(&self) -> Result<IndexStats> {
        let records = self.sqlite.file_records().await?;
        Ok(IndexStats {
            files: records.len(),
            chunks: records.iter().map(|r| r.chunk_ids.len()).sum(),
            model: self.model.clone(),
            dimension: self.dimension().await,
        })
    }
}

/// Row id to chunk id for every chunk the records name.
fn points_of(records: &[FileRecord]) -> HashMap<String, String> {
    records
        .iter()
        .flat_map(|r| {
            r.chunk_ids
                .iter()
                .map(|id| (point_id(id, &r.fingerprint), id.clone()))
        })
        .collect()
}

fn to_point(embedded: EmbeddedChunk, fingerprint: &str) -> VectorPoint {
    let EmbeddedChunk { chunk, vector } = embedded;
    let mut payload: HashMap<String, serde_json::Value> = chunk
        .metadata
        .into_iter()
        .map(|(k, v)| (k, serde_json::Value::String(v)))
        .collect();
    payload.insert("file_path".into(), chunk.file_path.into());
    payload.insert("ordinal".into(), chunk.ordinal.to_string().into());
    payload.insert(KEY_CHUNK_ID.into(), chunk.id.clone().into());
    payload.insert(KEY_FINGERPRINT.into(), fingerprint.into());
    payload.insert(KEY_TEXT.into(), chunk.text.into());
    VectorPoint {
        id: point_id(&chunk.id, fingerprint),
        vector,
        payload,
    }
}

struct DecodedHit {
    inner: SearchResult,
    fingerprint: String,
}

fn to_result(payload: HashMap<String, serde_json::Value>, score: f32) -> Option<DecodedHit> {
    let mut metadata: BTreeMap<String, String> = payload
        .into_iter()
        .filter_map(|(k, v)| match v {
            serde_json::Value::String(s) => Some((k, s)),
            _ => None,
        })
        .collect();
    let chunk_id = metadata.remove(KEY_CHUNK_ID)?;
    let fingerprint = metadata.remove(KEY_FINGERPRINT)?;
    let text = metadata.remove(KEY_TEXT)?;
    let file_path = metadata.get("file_path")?.clone();
    let ordinal = metadata.get("ordinal")?.parse().ok()?;
    Some(DecodedHit {
        inner: SearchResult {
            chunk_id,
            file_path,
            ordinal,
            text,
            score,
            metadata,
        },
        fingerprint,
    })
}
