//! Token counting used for chunk and batch sizing.

use std::fmt;

/// Counts tokens the way the embedding model would, or a close estimate.
///
/// Implementations must be monotone: a prefix never counts more than the
/// whole text. The chunker relies on this when splitting long lines.
pub trait TokenCounter: Send + Sync + fmt::Debug {
    fn count(&self, text: &str) -> usize;
}

/// `ceil(chars / 4)`, a fair approximation for BPE tokenizers on English and code.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }
}

/// One token per whitespace-separated word.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceTokenCounter;

impl TokenCounter for WhitespaceTokenCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

#[cfg(feature = "hf-tokenizer")]
pub use hf::HfTokenCounter;

#[cfg(feature = "hf-tokenizer")]
mod hf {
    use std::path::Path;

    use tokenizers::Tokenizer;

    use super::{HeuristicTokenCounter, TokenCounter};
    use crate::error::{IndexError, Result};

    /// Exact counts from a `HuggingFace` `tokenizer.json`.
    pub struct HfTokenCounter {
        tokenizer: Tokenizer,
    }

    impl HfTokenCounter {
        /// # Errors
        ///
        /// Returns [`IndexError::Configuration`] if the file cannot be loaded.
        pub fn from_file(path: &Path) -> Result<Self> {
            let tokenizer = Tokenizer::from_file(path).map_err(|e| {
                IndexError::Configuration(format!("tokenizer {}: {e}", path.display()))
            })?;
            Ok(Self { tokenizer })
        }
    }

    impl std::fmt::Debug for HfTokenCounter {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("HfTokenCounter").finish_non_exhaustive()
        }
    }

    impl TokenCounter for HfTokenCounter {
        fn count(&self, text: &str) -> usize {
            match self.tokenizer.encode(text, false) {
                Ok(encoding) => encoding.len(),
                Err(e) => {
                    tracing::warn!("tokenizer failed, using estimate: {e}");
                    HeuristicTokenCounter.count(text)
                }
            }
        }
    }
}
