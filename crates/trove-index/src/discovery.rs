//! Walks a directory tree into [`Document`]s, honouring `.gitignore` and
//! include/exclude globs.

use std::path::Path;

use ignore::WalkBuilder;
use ignore::overrides::OverrideBuilder;

use crate::changes::Document;
use crate::error::{IndexError, Result};

/// Bytes inspected for NUL when deciding whether a file is binary.
const SNIFF_LEN: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Globs a file must match; empty admits every file.
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Larger files are skipped.
    pub max_file_size: u64,
    pub include_hidden: bool,
    pub follow_links: bool,
    pub respect_gitignore: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            max_file_size: 1024 * 1024,
            include_hidden: false,
            follow_links: false,
            respect_gitignore: true,
        }
    }
}

/// Collect every text file under `root`, ordered by relative path.
///
/// Paths are relative to `root` with `/` separators. Binary files (a NUL byte
/// near the start), files over `max_file_size` and unreadable entries are
/// skipped. With the `pdf` feature, `.pdf` files contribute their extracted
/// text; without it they are skipped.
///
/// # Blocking I/O note
///
/// Traversal and reads are synchronous; async callers should run this on
/// `tokio::task::spawn_blocking`.
///
/// # Errors
///
/// Returns [`IndexError::Configuration`] if `root` is not a directory or a
/// glob is invalid.
pub fn discover(root: &Path, config: &DiscoveryConfig) -> Result<Vec<Document>> {
    if !root.is_dir() {
        return Err(IndexError::Configuration(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let mut overrides = OverrideBuilder::new(root);
    for glob in &config.include {
        overrides
            .add(glob)
            .map_err(|e| IndexError::Configuration(format!("include glob {glob:?}: {e}")))?;
    }
    for glob in &config.exclude {
        overrides
            .add(&format!("!{glob}"))
            .map_err(|e| IndexError::Configuration(format!("exclude glob {glob:?}: {e}")))?;
    }
    let overrides = overrides
        .build()
        .map_err(|e| IndexError::Configuration(format!("globs: {e}")))?;

    let walker = WalkBuilder::new(root)
        .hidden(!config.include_hidden)
        .follow_links(config.follow_links)
        .git_ignore(config.respect_gitignore)
        .git_exclude(config.respect_gitignore)
        .git_global(false)
        .ignore(config.respect_gitignore)
        .require_git(false)
        .max_filesize(Some(config.max_file_size))
        .overrides(overrides)
        .build();

    let mut documents = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let path = entry.path();
        let Some(rel) = relative_path(root, path) else {
            tracing::warn!(path = %path.display(), "skipping non UTF-8 path");
            continue;
        };
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(file = %rel, "skipping unreadable file: {e}");
                continue;
            }
        };
        let bytes = if is_pdf(path) {
            match pdf_text(&rel, &bytes) {
                Some(text) => text.into_bytes(),
                None => continue,
            }
        } else if is_binary(&bytes) {
            tracing::debug!(file = %rel, "skipping binary file");
            continue;
        } else {
            bytes
        };
        documents.push(Document::new(rel, bytes));
    }

    documents.sort_by(|a, b| a.path.cmp(&b.path));
    tracing::debug!(root = %root.display(), files = documents.len(), "discovery finished");
    Ok(documents)
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

#[cfg(feature = "pdf")]
fn pdf_text(rel: &str, bytes: &[u8]) -> Option<String> {
    match pdf_extract::extract_text_from_mem(bytes) {
        Ok(text) if text.trim().is_empty() => {
            tracing::debug!(file = %rel, "skipping PDF without a text layer");
            None
        }
        Ok(text) => Some(text),
        Err(e) => {
            tracing::warn!(file = %rel, "skipping unreadable PDF: {e}");
            None
        }
    }
}

#[cfg(not(feature = "pdf"))]
fn pdf_text(rel: &str, _bytes: &[u8]) -> Option<String> {
    tracing::debug!(file = %rel, "skipping PDF, built without the pdf feature");
    None
}

fn is_binary(bytes: &[u8]) -> bool {
    bytes[..bytes.len().min(SNIFF_LEN)].contains(&0)
}
