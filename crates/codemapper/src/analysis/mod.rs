//! Collaborators consumed by the scan coordinator: language detection and
//! symbol extraction, ignore rules, and the artifact writer.
//!
//! The coordinator only sees the traits. Default implementations live in
//! the submodules.

mod gitignore;
mod outline;
mod shadow;

pub use self::gitignore::{GitignoreMatcher, GitignoreSource};
pub use self::outline::OutlineParser;
pub use self::shadow::ShadowTree;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Rust,
    Go,
}

impl Language {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "py" | "pyi" => Some(Language::Python),
            "js" | "jsx" | "mjs" => Some(Language::JavaScript),
            "ts" => Some(Language::TypeScript),
            "tsx" => Some(Language::Tsx),
            "rs" => Some(Language::Rust),
            "go" => Some(Language::Go),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
            Language::Rust => "rust",
            Language::Go => "go",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    /// Classes, structs, impls and type declarations
    Class,
    Method,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Class => "class",
            SymbolKind::Method => "method",
        }
    }

    /// Heading form used in artifacts (`Function`, `Class`, `Method`).
    pub fn title(&self) -> &'static str {
        match self {
            SymbolKind::Function => "Function",
            SymbolKind::Class => "Class",
            SymbolKind::Method => "Method",
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named source unit and its exact text span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub code: String,
    pub signature: String,
    /// 1-based, inclusive
    pub start_line: usize,
    pub end_line: usize,
}

pub trait SourceParser: Send + Sync {
    fn detect_language(&self, path: &Path) -> Option<Language>;

    /// Symbols in source order.
    fn extract_symbols(&self, content: &str, language: Language) -> Vec<Symbol>;
}

pub trait IgnoreMatcher: Send + Sync {
    fn matches(&self, path: &Path) -> bool;
}

/// Builds the ignore rules for one codebase root.
pub trait IgnoreSource: Send + Sync {
    fn matcher_for(&self, root: &Path) -> Box<dyn IgnoreMatcher>;
}

impl<F> IgnoreMatcher for F
where
    F: Fn(&Path) -> bool + Send + Sync,
{
    fn matches(&self, path: &Path) -> bool {
        self(path)
    }
}

pub trait ArtifactWriter: Send + Sync {
    /// Write the summary text for `source` under `root`; returns where it went.
    fn write(&self, root: &Path, source: &Path, text: &str) -> io::Result<PathBuf>;
}
