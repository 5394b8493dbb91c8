//! Per-file change detection against committed fingerprints.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use trove_memory::FileRecord;

/// A discovered file and the fingerprint of its raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub path: String,
    pub bytes: Vec<u8>,
    pub fingerprint: String,
}

impl Document {
    #[must_use]
    pub fn new(path: impl Into<String>, bytes: Vec<u8>) -> Self {
        let fingerprint = fingerprint(&bytes);
        Self {
            path: path.into(),
            bytes,
            fingerprint,
        }
    }

    /// Text used for chunking. Invalid UTF-8 sequences become U+FFFD.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

/// BLAKE3 hex digest of raw bytes.
#[must_use]
pub fn fingerprint(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Paths partitioned by what a pass must do with them. Each list is sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub unchanged: Vec<String>,
    pub modified: Vec<String>,
    pub new: Vec<String>,
    pub deleted: Vec<String>,
}

impl ChangeSet {
    /// Paths that need chunking and embedding, sorted.
    #[must_use]
    pub fn changed(&self) -> Vec<String> {
        let mut out: Vec<String> = self.modified.iter().chain(&self.new).cloned().collect();
        out.sort();
        out
    }

    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.modified.is_empty() && self.new.is_empty() && self.deleted.is_empty()
    }
}

/// Compare discovered documents with persisted records. Pure; no I/O.
#[must_use]
pub fn classify(discovered: &[Document], records: &HashMap<String, FileRecord>) -> ChangeSet {
    let mut set = ChangeSet::default();
    let mut seen: HashSet<&str> = HashSet::with_capacity(discovered.len());

    for doc in discovered {
        if !seen.insert(doc.path.as_str()) {
            continue;
        }
        match records.get(&doc.path) {
            Some(rec) if rec.fingerprint == doc.fingerprint => set.unchanged.push(doc.path.clone()),
            Some(_) => set.modified.push(doc.path.clone()),
            None => set.new.push(doc.path.clone()),
        }
    }

    set.deleted = records
        .keys()
        .filter(|path| !seen.contains(path.as_str()))
        .cloned()
        .collect();

    set.unchanged.sort();
    set.modified.sort();
    set.new.sort();
    set.deleted.sort();
    set
}
