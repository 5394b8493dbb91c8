use chrono::{DateTime, Utc};

/// Committed state of one indexed file.
///
/// `chunk_ids` is kept sorted and free of duplicates; it is the exact set of
/// chunk ids stored for the file at `fingerprint`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub file_path: String,
    pub fingerprint: String,
    pub chunk_ids: Vec<String>,
    pub indexed_at: DateTime<Utc>,
}

impl FileRecord {
    #[must_use]
    pub fn new(
        file_path: impl Into<String>,
        fingerprint: impl Into<String>,
        mut chunk_ids: Vec<String>,
    ) -> Self {
        chunk_ids.sort();
        chunk_ids.dedup();
        Self {
            file_path: file_path.into(),
            fingerprint: fingerprint.into(),
            chunk_ids,
            indexed_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn contains_chunk(&self, chunk_id: &str) -> bool {
        self.chunk_ids
            .binary_search_by(|id| id.as_str().cmp(chunk_id))
            .is_ok()
    }
}

/// Embedding model and vector dimension an index was built with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMeta {
    pub model: String,
    pub dimension: usize,
}
