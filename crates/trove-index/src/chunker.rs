//! Boundary-aware chunking: declarations for code, paragraphs for prose,
//! greedily packed under a token ceiling.
//!
//! Chunks partition the decoded text exactly. Concatenating the texts of all
//! chunks of a document yields the document text, byte for byte.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use tree_sitter::Parser;

use crate::changes::Document;
use crate::error::{IndexError, Result};
use crate::languages::{ContentKind, Lang, detect_language};
use crate::tokens::TokenCounter;

/// Chunk size bounds in tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Soft floor. A chunk below it that cannot take the next unit whole is
    /// topped up with that unit's lines. It stays short only when the next
    /// line alone would break the ceiling, or at the end of the document.
    pub min_tokens: usize,
    /// Hard ceiling. No chunk ever counts more.
    pub max_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_tokens: 128,
            max_tokens: 512,
        }
    }
}

impl ChunkerConfig {
    /// # Errors
    ///
    /// Returns [`IndexError::Configuration`] unless `0 < min_tokens <= max_tokens`.
    pub fn validate(&self) -> Result<()> {
        if self.min_tokens == 0 || self.max_tokens == 0 {
            return Err(IndexError::Configuration(
                "chunk token bounds must be positive".into(),
            ));
        }
        if self.min_tokens > self.max_tokens {
            return Err(IndexError::Configuration(format!(
                "chunk_min_tokens ({}) exceeds chunk_max_tokens ({})",
                self.min_tokens, self.max_tokens
            )));
        }
        Ok(())
    }
}

/// How unit boundaries were found for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStrategy {
    Structural,
    /// No declaration or paragraph boundary found; every line is a unit.
    Lines,
}

impl ChunkStrategy {
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Structural => "structural",
            Self::Lines => "lines",
        }
    }
}

/// One token-bounded piece of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub file_path: String,
    pub ordinal: usize,
    pub text: String,
    pub token_count: usize,
    pub metadata: BTreeMap<String, String>,
}

/// Deterministic chunk identity: 16 hex chars of the path hash plus ordinal.
#[must_use]
pub fn chunk_id(file_path: &str, ordinal: usize) -> String {
    let hash = blake3::hash(file_path.as_bytes()).to_hex();
    format!("{}:{ordinal}", &hash[..16])
}

#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
    counter: Arc<dyn TokenCounter>,
}

impl Chunker {
    /// # Errors
    ///
    /// Returns [`IndexError::Configuration`] for invalid bounds.
    pub fn new(config: ChunkerConfig, counter: Arc<dyn TokenCounter>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, counter })
    }

    #[must_use]
    pub fn config(&self) -> ChunkerConfig {
        self.config
    }

    #[must_use]
    pub fn counter(&self) -> &Arc<dyn TokenCounter> {
        &self.counter
    }

    /// Split a document into ordered chunks. Empty documents yield none.
    #[must_use]
    pub fn chunk(&self, doc: &Document) -> Vec<Chunk> {
        if doc.bytes.is_empty() {
            return Vec::new();
        }
        let text = doc.text();
        let lang = detect_language(Path::new(&doc.path));
        let (units, strategy) = self.units(&text, lang, &doc.path);
        let pieces = self.pack(&text, &units);
        let lines = LineIndex::new(&text);

        pieces
            .into_iter()
            .enumerate()
            .map(|(ordinal, range)| {
                let body = &text[range.clone()];
                let token_count = self.counter.count(body);
                let (line_start, line_end) = lines.span(&range);
                let metadata = BTreeMap::from([
                    ("file_path".to_owned(), doc.path.clone()),
                    ("ordinal".to_owned(), ordinal.to_string()),
                    ("language".to_owned(), lang.id().to_owned()),
                    ("kind".to_owned(), lang.kind().id().to_owned()),
                    ("strategy".to_owned(), strategy.id().to_owned()),
                    ("byte_start".to_owned(), range.start.to_string()),
                    ("byte_end".to_owned(), range.end.to_string()),
                    ("line_start".to_owned(), line_start.to_string()),
                    ("line_end".to_owned(), line_end.to_string()),
                    ("token_count".to_owned(), token_count.to_string()),
                ]);
                Chunk {
                    id: chunk_id(&doc.path, ordinal),
                    file_path: doc.path.clone(),
                    ordinal,
                    text: body.to_owned(),
                    token_count,
                    metadata,
                }
            })
            .collect()
    }

    fn units(&self, text: &str, lang: Lang, path: &str) -> (Vec<Range<usize>>, ChunkStrategy) {
        let lines = line_ranges(text, 0..text.len());
        let starts = match lang.kind() {
            ContentKind::Code => declaration_starts(text, &lines, lang),
            ContentKind::Prose => paragraph_starts(text, &lines),
        };

        match starts {
            Some(starts) => (units_from_starts(&lines, &starts, text.len()), ChunkStrategy::Structural),
            None if lines.len() > 1 => {
                tracing::debug!(file = %path, language = %lang, "no structural boundaries, chunking by lines");
                (lines, ChunkStrategy::Lines)
            }
            None => (vec![0..text.len()], ChunkStrategy::Structural),
        }
    }

    /// Greedy packing. Units over the ceiling, or needed to top up a chunk
    /// under the floor, are exploded into lines, and lines over the ceiling
    /// into pieces, all feeding the same accumulator.
    fn pack(&self, text: &str, units: &[Range<usize>]) -> Vec<Range<usize>> {
        let mut acc = Accumulator {
            text,
            counter: self.counter.as_ref(),
            min: self.config.min_tokens,
            max: self.config.max_tokens,
            current: None,
            out: Vec::new(),
        };

        for unit in units {
            if self.fits(&text[unit.clone()]) && !acc.needs_top_up(unit) {
                acc.push(unit.clone());
                continue;
            }
            for line in line_ranges(text, unit.clone()) {
                if self.fits(&text[line.clone()]) {
                    acc.push(line);
                } else {
                    for piece in self.split_line(text, line) {
                        acc.push(piece);
                    }
                }
            }
        }
        acc.finish()
    }

    fn fits(&self, text: &str) -> bool {
        self.counter.count(text) <= self.config.max_tokens
    }

    /// Cut an over-long line into pieces within the ceiling, preferring to cut
    /// right after the last whitespace that keeps the piece in bounds.
    fn split_line(&self, text: &str, line: Range<usize>) -> Vec<Range<usize>> {
        let mut pieces = Vec::new();
        let mut start = line.start;
        while start < line.end {
            let rest = &text[start..line.end];
            if self.fits(rest) {
                pieces.push(start..line.end);
                break;
            }
            let fit = self.longest_fitting_prefix(rest);
            let cut = rest[..fit]
                .char_indices()
                .filter(|&(i, c)| i > 0 && c.is_whitespace())
                .last()
                .map_or(fit, |(i, c)| i + c.len_utf8());
            pieces.push(start..start + cut);
            start += cut;
        }
        pieces
    }

    /// Byte length of the longest char-aligned prefix within the ceiling.
    /// At least one char, so splitting always progresses.
    fn longest_fitting_prefix(&self, s: &str) -> usize {
        let ends: Vec<usize> = s
            .char_indices()
            .skip(1)
            .map(|(i, _)| i)
            .chain(std::iter::once(s.len()))
            .collect();
        let fitting = ends.partition_point(|&end| self.fits(&s[..end]));
        if fitting == 0 {
            ends[0]
        } else {
            ends[fitting - 1]
        }
    }
}

struct Accumulator<'a> {
    text: &'a str,
    counter: &'a dyn TokenCounter,
    min: usize,
    max: usize,
    current: Option<Range<usize>>,
    out: Vec<Range<usize>>,
}

impl Accumulator<'_> {
    /// The running chunk is under the floor and `next` as a whole would push
    /// it over the ceiling.
    fn needs_top_up(&self, next: &Range<usize>) -> bool {
        self.current.as_ref().is_some_and(|cur| {
            self.counter.count(&self.text[cur.clone()]) < self.min
                && self.counter.count(&self.text[cur.start..next.end]) > self.max
        })
    }

    fn push(&mut self, next: Range<usize>) {
        match self.current.take() {
            None => self.current = Some(next),
            Some(cur) => {
                let combined = cur.start..next.end;
                if self.counter.count(&self.text[combined.clone()]) <= self.max {
                    self.current = Some(combined);
                } else {
                    self.out.push(cur);
                    self.current = Some(next);
                }
            }
        }
    }

    fn finish(mut self) -> Vec<Range<usize>> {
        if let Some(cur) = self.current.take() {
            self.out.push(cur);
        }
        self.out
    }
}

/// Line byte ranges within `span`, each including its `\n`.
fn line_ranges(text: &str, span: Range<usize>) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut start = span.start;
    for line in text[span.clone()].split_inclusive('\n') {
        out.push(start..start + line.len());
        start += line.len();
    }
    out
}

fn units_from_starts(
    lines: &[Range<usize>],
    starts: &[usize],
    text_len: usize,
) -> Vec<Range<usize>> {
    starts
        .iter()
        .enumerate()
        .map(|(k, &row)| {
            let begin = lines[row].start;
            let end = starts.get(k + 1).map_or(text_len, |&next| lines[next].start);
            begin..end
        })
        .collect()
}

/// Paragraph units: a paragraph starts at a non-blank line preceded by a
/// blank one. Blank lines trail the paragraph before them.
fn paragraph_starts(text: &str, lines: &[Range<usize>]) -> Option<Vec<usize>> {
    let mut starts = vec![0];
    let mut seen_content = false;
    let mut prev_blank = false;
    for (row, range) in lines.iter().enumerate() {
        let blank = text[range.clone()].trim().is_empty();
        if !blank {
            if seen_content && prev_blank {
                starts.push(row);
            }
            seen_content = true;
        }
        prev_blank = blank;
    }
    (starts.len() > 1 || lines.len() <= 1).then_some(starts)
}

/// Declaration units: start rows from the syntax tree when a grammar is
/// available and parses cleanly, otherwise from the keyword scanner. Comment
/// and attribute lines directly above a declaration move its start up.
fn declaration_starts(text: &str, lines: &[Range<usize>], lang: Lang) -> Option<Vec<usize>> {
    let rows: Vec<usize> = syntax_rows(text, lang)
        .unwrap_or_else(|| keyword_rows(text, lines, lang))
        .into_iter()
        .filter(|&row| row < lines.len())
        .collect();
    if rows.is_empty() {
        return None;
    }

    let decl_rows: BTreeSet<usize> = rows.into_iter().collect();
    let prefixes = lang.attached_line_prefixes();
    let mut starts = BTreeSet::from([0]);
    for &row in &decl_rows {
        let mut start = row;
        while start > 0 && !decl_rows.contains(&(start - 1)) {
            let above = text[lines[start - 1].clone()].trim_start();
            if above.trim().is_empty() || !prefixes.iter().any(|p| above.starts_with(p)) {
                break;
            }
            start -= 1;
        }
        starts.insert(start);
    }
    Some(starts.into_iter().collect())
}

fn syntax_rows(text: &str, lang: Lang) -> Option<Vec<usize>> {
    let grammar = lang.grammar()?;
    let mut parser = Parser::new();
    parser.set_language(&grammar).ok()?;
    let tree = parser.parse(text, None)?;
    let root = tree.root_node();
    if root.has_error() {
        return None;
    }

    let trivia = lang.trivia_node_kinds();
    let child_count = u32::try_from(root.named_child_count()).unwrap_or(u32::MAX);
    let mut rows = Vec::new();
    for i in 0..child_count {
        let Some(child) = root.named_child(i) else {
            continue;
        };
        if !trivia.contains(&child.kind()) {
            rows.push(child.start_position().row);
        }
    }
    Some(rows)
}

fn keyword_rows(text: &str, lines: &[Range<usize>], lang: Lang) -> Vec<usize> {
    let keywords = lang.declaration_keywords();
    lines
        .iter()
        .enumerate()
        .filter(|(_, range)| {
            let line = &text[(*range).clone()];
            if line.starts_with(char::is_whitespace) {
                return false;
            }
            let word = line
                .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '!'))
                .next()
                .unwrap_or_default();
            keywords.contains(&word)
        })
        .map(|(row, _)| row)
        .collect()
}

/// Byte offset to 1-based line number.
struct LineIndex {
    newlines: Vec<usize>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        Self {
            newlines: text
                .bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i)
                .collect(),
        }
    }

    fn line_of(&self, offset: usize) -> usize {
        self.newlines.partition_point(|&nl| nl < offset) + 1
    }

    fn span(&self, range: &Range<usize>) -> (usize, usize) {
        let first = self.line_of(range.start);
        let last = if range.end > range.start {
            self.line_of(range.end - 1)
        } else {
            first
        };
        (first, last)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::tokens::{HeuristicTokenCounter, WhitespaceTokenCounter};

    fn words(n: usize, word: &str) -> String {
        vec![word; n].join(" ")
    }

    fn word_chunker(min: usize, max: usize) -> Chunker {
        Chunker::new(
            ChunkerConfig {
                min_tokens: min,
                max_tokens: max,
            },
            Arc::new(WhitespaceTokenCounter),
        )
        .unwrap()
    }

    fn joined(chunks: &[Chunk]) -> String {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn config_validation() {
        let counter: Arc<dyn TokenCounter> = Arc::new(HeuristicTokenCounter);
        for (min, max) in [(0, 10), (10, 0), (11, 10)] {
            let err = Chunker::new(
                ChunkerConfig {
                    min_tokens: min,
                    max_tokens: max,
                },
                Arc::clone(&counter),
            )
            .unwrap_err();
            assert!(matches!(err, IndexError::Configuration(_)), "{min}/{max}");
        }
        assert!(Chunker::new(ChunkerConfig::default(), counter).is_ok());
    }

    #[test]
    fn empty_document_has_no_chunks() {
        let chunks = word_chunker(1, 10).chunk(&Document::new("a.md", Vec::new()));
        assert!(chunks.is_empty());
    }

    #[test]
    fn whitespace_only_document_is_kept() {
        let doc = Document::new("a.md", b"\n\n   \n".to_vec());
        let chunks = word_chunker(1, 10).chunk(&doc);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "\n\n   \n");
        assert_eq!(chunks[0].token_count, 0);
    }

    #[test]
    fn paragraphs_over_the_ceiling_split_at_the_blank_line() {
        let a = words(120, "alpha");
        let b = words(550, "beta");
        let doc = Document::new("notes.md", format!("{a}\n\n{b}\n").into_bytes());

        let chunks = word_chunker(400, 600).chunk(&doc);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].token_count, 120);
        assert_eq!(chunks[1].token_count, 550);
        assert!(chunks[0].text.ends_with("alpha\n\n"));
        assert!(chunks[1].text.starts_with("beta"));
        assert_eq!(joined(&chunks), doc.text());
    }

    #[test]
    fn equal_paragraphs_pack_up_to_the_ceiling() {
        let para = words(50, "w");
        let text: String = (0..10).map(|_| format!("{para}\n\n")).collect();
        let chunks = word_chunker(100, 120).chunk(&Document::new("a.txt", text.into_bytes()));
        assert_eq!(chunks.len(), 5);
        assert!(chunks.iter().all(|c| c.token_count == 100));
    }

    #[test]
    fn leading_blank_lines_belong_to_first_paragraph() {
        let doc = Document::new("a.md", b"\n\nfirst para\n\nsecond para\n".to_vec());
        let chunks = word_chunker(1, 2).chunk(&doc);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "\n\nfirst para\n\n");
        assert_eq!(chunks[1].text, "second para\n");
        assert_eq!(chunks[0].metadata["strategy"], "structural");
        assert_eq!(chunks[0].metadata["kind"], "prose");
    }

    #[test]
    fn rust_declarations_keep_their_doc_comments() {
        let source = "\
use std::io;

/// Adds things.
#[inline]
fn add(a: i32, b: i32) -> i32 {
    a + b
}

// helper type
struct Point {
    x: i32,
}
";
        let chunks = word_chunker(1, 20).chunk(&Document::new("src/lib.rs", source.into()));
        assert_eq!(joined(&chunks), source);
        assert!(chunks.len() >= 2);
        let add = chunks.iter().find(|c| c.text.contains("fn add")).unwrap();
        assert!(add.text.contains("/// Adds things."));
        assert!(add.text.contains("#[inline]"));
        let point = chunks.iter().find(|c| c.text.contains("struct Point")).unwrap();
        assert!(point.text.starts_with("// helper type"));
        assert_eq!(point.metadata["language"], "rust");
        assert_eq!(point.metadata["kind"], "code");
    }

    #[test]
    fn keyword_scanner_handles_languages_without_grammar() {
        let source = "\
package demo;

// Greets.
public class Greeter {
    void hi() {}
}

public class Other {
    void bye() {}
}
";
        let chunks = word_chunker(1, 11).chunk(&Document::new("Demo.java", source.into()));
        assert_eq!(joined(&chunks), source);
        assert_eq!(chunks[0].metadata["strategy"], "structural");
        assert!(chunks.iter().any(|c| c.text.starts_with("// Greets.\npublic class Greeter")));
        assert!(chunks.iter().any(|c| c.text.starts_with("public class Other")));
    }

    #[test]
    fn python_decorators_stay_with_functions() {
        let source = "\
import os

@cached
def load(path):
    return open(path).read()

class Store:
    pass
";
        let chunks = word_chunker(1, 6).chunk(&Document::new("app.py", source.into()));
        assert_eq!(joined(&chunks), source);
        assert!(chunks.iter().any(|c| c.text.starts_with("@cached\ndef load")));
    }

    #[test]
    fn oversized_function_splits_on_lines() {
        let mut source = String::from("fn big() {\n");
        for i in 0..40 {
            source.push_str(&format!("    let var{i} = {i};\n"));
        }
        source.push_str("}\n");

        let chunks = word_chunker(5, 20).chunk(&Document::new("src/big.rs", source.clone().into()));
        assert!(chunks.len() > 1);
        assert_eq!(joined(&chunks), source);
        for c in &chunks {
            assert!(c.token_count <= 20);
            assert!(c.text.ends_with('\n'), "line boundary expected: {:?}", c.text);
        }
    }

    #[test]
    fn giant_line_splits_after_whitespace() {
        let line = words(25, "abc");
        let chunks = word_chunker(1, 10).chunk(&Document::new("a.txt", line.clone().into()));
        assert_eq!(joined(&chunks), line);
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].text.ends_with(' '));
        assert!(chunks.iter().all(|c| c.token_count <= 10));
    }

    #[test]
    fn giant_word_splits_at_char_boundary() {
        let text = "é".repeat(100);
        let chunker = Chunker::new(
            ChunkerConfig {
                min_tokens: 1,
                max_tokens: 10,
            },
            Arc::new(HeuristicTokenCounter),
        )
        .unwrap();
        let chunks = chunker.chunk(&Document::new("a.txt", text.clone().into()));
        assert_eq!(joined(&chunks), text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text.chars().count(), 40);
        assert_eq!(chunks[2].text.chars().count(), 20);
    }

    #[test]
    fn code_without_declarations_degrades_to_lines() {
        let source = "x = 1\ny = 2\nprint(x + y)\n";
        let chunks = word_chunker(1, 100).chunk(&Document::new("script.sh", source.into()));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata["strategy"], "lines");
        assert_eq!(chunks[0].text, source);
    }

    #[test]
    fn metadata_spans_and_ids() {
        let doc = Document::new("docs/a.md", b"one\ntwo\n\nthree\nfour\n".to_vec());
        let chunks = word_chunker(1, 2).chunk(&doc);
        assert_eq!(chunks.len(), 2);

        let second = &chunks[1];
        assert_eq!(second.ordinal, 1);
        assert_eq!(second.id, chunk_id("docs/a.md", 1));
        assert_eq!(second.metadata["line_start"], "4");
        assert_eq!(second.metadata["line_end"], "5");
        assert_eq!(second.metadata["byte_start"], "9");
        assert_eq!(second.metadata["byte_end"], doc.bytes.len().to_string());
        assert_eq!(second.metadata["token_count"], "2");
        assert_eq!(second.metadata["file_path"], "docs/a.md");
    }

    #[test]
    fn chunk_id_format() {
        let id = chunk_id("src/main.rs", 3);
        let (hash, ordinal) = id.split_once(':').unwrap();
        assert_eq!(hash.len(), 16);
        assert_eq!(ordinal, "3");
        assert_eq!(id, chunk_id("src/main.rs", 3));
        assert_ne!(id, chunk_id("src/lib.rs", 3));
    }

    #[test]
    fn chunking_is_deterministic() {
        let doc = Document::new("a.rs", b"fn a() {}\n\nfn b() {}\n".to_vec());
        let chunker = word_chunker(1, 3);
        assert_eq!(chunker.chunk(&doc), chunker.chunk(&doc));
    }

    #[test]
    fn short_chunk_is_topped_up_with_lines_of_the_next_paragraph() {
        let a = words(3, "alpha");
        let b: String = (0..12).map(|i| format!("beta{i}\n")).collect();
        let text = format!("{a}\n\n{b}");
        let chunks = word_chunker(8, 10).chunk(&Document::new("a.md", text.clone().into()));

        assert_eq!(joined(&chunks), text);
        let counts: Vec<_> = chunks.iter().map(|c| c.token_count).collect();
        assert_eq!(counts, vec![10, 5]);
        assert!(chunks[0].text.ends_with("beta6\n"));
    }

    fn arb_case() -> impl Strategy<Value = (String, &'static str, usize, usize)> {
        (
            "([a-zé{}() ]{0,40}\n{0,2}){0,25}",
            prop_oneof![Just("a.md"), Just("a.rs"), Just("a.py"), Just("a.txt"), Just("a.go")],
            1usize..40,
        )
            .prop_flat_map(|(text, path, max)| (Just(text), Just(path), 1..=max, Just(max)))
    }

    proptest! {
        #[test]
        fn chunks_partition_text_within_ceiling((text, path, min, max) in arb_case()) {
            let doc = Document::new(path, text.clone().into_bytes());
            for counter in [
                Arc::new(HeuristicTokenCounter) as Arc<dyn TokenCounter>,
                Arc::new(WhitespaceTokenCounter),
            ] {
                let chunker = Chunker::new(ChunkerConfig { min_tokens: min, max_tokens: max }, counter).unwrap();
                let chunks = chunker.chunk(&doc);
                prop_assert_eq!(joined(&chunks), text.clone());
                for (i, c) in chunks.iter().enumerate() {
                    prop_assert_eq!(c.ordinal, i);
                    prop_assert!(c.token_count <= max, "chunk {} has {} > {}", i, c.token_count, max);
                    prop_assert!(!c.text.is_empty());
                }
            }
        }

        #[test]
        fn non_final_chunks_reach_the_floor(
            lines in proptest::collection::vec(prop_oneof![Just(""), Just("w")], 1..80),
            min in 2usize..12,
            extra in 0usize..8,
        ) {
            // one-word lines can always top a short chunk up
            let text: String = lines.iter().map(|l| format!("{l}\n")).collect();
            let max = min + extra;
            let chunks = word_chunker(min, max).chunk(&Document::new("a.md", text.clone().into_bytes()));
            prop_assert_eq!(joined(&chunks), text);
            if let Some((_, init)) = chunks.split_last() {
                for c in init {
                    prop_assert!(c.token_count >= min, "{} < {}: {:?}", c.token_count, min, c.text);
                    prop_assert!(c.token_count <= max);
                }
            }
        }
    }
}
