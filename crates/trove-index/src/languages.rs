//! Language detection and tree-sitter grammar registry.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Document language, derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
    Java,
    C,
    Cpp,
    CSharp,
    Ruby,
    Php,
    Swift,
    Kotlin,
    Shell,
    Sql,
    Markdown,
    Text,
}

/// Whether chunk boundaries follow declarations or paragraphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Code,
    Prose,
}

impl ContentKind {
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Prose => "prose",
        }
    }
}

impl Lang {
    /// Identifier stored in chunk metadata.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Go => "go",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::CSharp => "csharp",
            Self::Ruby => "ruby",
            Self::Php => "php",
            Self::Swift => "swift",
            Self::Kotlin => "kotlin",
            Self::Shell => "shell",
            Self::Sql => "sql",
            Self::Markdown => "markdown",
            Self::Text => "text",
        }
    }

    #[must_use]
    pub fn kind(self) -> ContentKind {
        match self {
            Self::Markdown | Self::Text => ContentKind::Prose,
            _ => ContentKind::Code,
        }
    }

    /// Get the tree-sitter grammar. Returns `None` if the
    /// corresponding feature is not enabled.
    #[must_use]
    pub fn grammar(self) -> Option<tree_sitter::Language> {
        match self {
            #[cfg(feature = "lang-rust")]
            Self::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            #[cfg(feature = "lang-python")]
            Self::Python => Some(tree_sitter_python::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            #[cfg(feature = "lang-go")]
            Self::Go => Some(tree_sitter_go::LANGUAGE.into()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Root-level node kinds that never start a unit on their own. They are
    /// attached to the declaration below them by the line walk.
    #[must_use]
    pub fn trivia_node_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &[
                "line_comment",
                "block_comment",
                "attribute_item",
                "inner_attribute_item",
            ],
            Self::Python | Self::JavaScript | Self::TypeScript | Self::Go => &["comment"],
            _ => &[],
        }
    }

    /// Leading words of an unindented line that opens a top-level declaration.
    /// Used when no grammar is compiled in or parsing fails.
    #[must_use]
    pub fn declaration_keywords(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &[
                "fn", "pub", "struct", "enum", "trait", "impl", "mod", "type", "const",
                "static", "macro_rules!", "async", "unsafe", "extern", "use",
            ],
            Self::Python => &["def", "class", "async"],
            Self::JavaScript | Self::TypeScript => &[
                "function", "class", "export", "const", "let", "var", "interface", "type",
                "enum", "async", "abstract", "declare", "namespace",
            ],
            Self::Go => &["func", "type", "var", "const", "import"],
            Self::Java | Self::Kotlin => &[
                "public", "private", "protected", "class", "interface", "enum", "abstract",
                "final", "static", "fun", "object", "data", "sealed", "record",
            ],
            Self::CSharp => &[
                "public", "private", "protected", "internal", "class", "interface", "enum",
                "struct", "static", "abstract", "sealed", "namespace", "record",
            ],
            Self::C | Self::Cpp => &[
                "struct", "enum", "union", "typedef", "static", "extern", "inline", "void",
                "int", "char", "long", "unsigned", "double", "float", "bool", "class",
                "template", "namespace", "const",
            ],
            Self::Ruby => &["def", "class", "module"],
            Self::Php => &[
                "function", "class", "interface", "trait", "abstract", "final", "enum",
            ],
            Self::Swift => &[
                "func", "class", "struct", "enum", "protocol", "extension", "public",
                "private", "internal", "final",
            ],
            Self::Shell => &["function"],
            Self::Sql => &[
                "create", "alter", "drop", "insert", "update", "delete", "select", "with",
                "CREATE", "ALTER", "DROP", "INSERT", "UPDATE", "DELETE", "SELECT", "WITH",
            ],
            Self::Markdown | Self::Text => &[],
        }
    }

    /// Prefixes of lines that belong to the declaration directly below them:
    /// comments, doc comments, attributes, decorators.
    #[must_use]
    pub fn attached_line_prefixes(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &["//", "/*", "*", "#["],
            Self::Python => &["#", "@"],
            Self::Ruby | Self::Shell => &["#"],
            Self::JavaScript | Self::TypeScript | Self::Java | Self::Kotlin | Self::Swift => {
                &["//", "/*", "*", "@"]
            }
            Self::CSharp => &["//", "/*", "*", "["],
            Self::Go | Self::C | Self::Cpp | Self::Php => &["//", "/*", "*", "#"],
            Self::Sql => &["--", "/*", "*"],
            Self::Markdown | Self::Text => &[],
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Detect language from file extension. Unknown extensions are plain text.
#[must_use]
pub fn detect_language(path: &Path) -> Lang {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return Lang::Text;
    };
    match ext.to_ascii_lowercase().as_str() {
        "rs" => Lang::Rust,
        "py" | "pyi" => Lang::Python,
        "js" | "jsx" | "mjs" | "cjs" => Lang::JavaScript,
        "ts" | "tsx" | "mts" | "cts" => Lang::TypeScript,
        "go" => Lang::Go,
        "java" => Lang::Java,
        "c" | "h" => Lang::C,
        "cc" | "cpp" | "cxx" | "hpp" | "hh" | "hxx" => Lang::Cpp,
        "cs" => Lang::CSharp,
        "rb" => Lang::Ruby,
        "php" => Lang::Php,
        "swift" => Lang::Swift,
        "kt" | "kts" => Lang::Kotlin,
        "sh" | "bash" | "zsh" => Lang::Shell,
        "sql" => Lang::Sql,
        "md" | "markdown" | "mdx" => Lang::Markdown,
        _ => Lang::Text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_language_rs() {
        assert_eq!(detect_language(Path::new("src/main.rs")), Lang::Rust);
    }

    #[test]
    fn detect_language_js_variants() {
        for ext in &["js", "jsx", "mjs", "cjs"] {
            let path = format!("file.{ext}");
            assert_eq!(
                detect_language(Path::new(&path)),
                Lang::JavaScript,
                "failed for .{ext}"
            );
        }
    }

    #[test]
    fn detect_language_is_case_insensitive() {
        assert_eq!(detect_language(Path::new("README.MD")), Lang::Markdown);
        assert_eq!(detect_language(Path::new("Main.JAVA")), Lang::Java);
    }

    #[test]
    fn unknown_extension_is_prose_text() {
        assert_eq!(detect_language(Path::new("file.xyz")), Lang::Text);
        assert_eq!(detect_language(Path::new("LICENSE")), Lang::Text);
        assert_eq!(Lang::Text.kind(), ContentKind::Prose);
    }

    #[test]
    fn code_and_prose_classification() {
        assert_eq!(Lang::Go.kind(), ContentKind::Code);
        assert_eq!(Lang::Sql.kind(), ContentKind::Code);
        assert_eq!(Lang::Markdown.kind(), ContentKind::Prose);
    }

    #[test]
    fn every_code_lang_has_keywords() {
        let langs = [
            Lang::Rust,
            Lang::Python,
            Lang::JavaScript,
            Lang::TypeScript,
            Lang::Go,
            Lang::Java,
            Lang::C,
            Lang::Cpp,
            Lang::CSharp,
            Lang::Ruby,
            Lang::Php,
            Lang::Swift,
            Lang::Kotlin,
            Lang::Shell,
            Lang::Sql,
        ];
        for lang in langs {
            assert_eq!(lang.kind(), ContentKind::Code);
            assert!(!lang.declaration_keywords().is_empty(), "{lang}");
            assert_eq!(lang.to_string(), lang.id());
        }
    }

    #[test]
    fn grammar_returns_some_for_enabled_features() {
        #[cfg(feature = "lang-rust")]
        assert!(Lang::Rust.grammar().is_some());
        #[cfg(feature = "lang-python")]
        assert!(Lang::Python.grammar().is_some());
        #[cfg(feature = "lang-js")]
        {
            assert!(Lang::JavaScript.grammar().is_some());
            assert!(Lang::TypeScript.grammar().is_some());
        }
        #[cfg(feature = "lang-go")]
        assert!(Lang::Go.grammar().is_some());
        assert!(Lang::Markdown.grammar().is_none());
    }
}
