use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::{Path, PathBuf};
use tracing::warn;

use super::{IgnoreMatcher, IgnoreSource};

/// Always excluded, on top of the root `.gitignore`.
const BUILTIN_PATTERNS: &[&str] = &[
    ".git/",
    "__pycache__/",
    "*.pyc",
    ".venv/",
    "node_modules/",
    ".maps/",
];

/// Root `.gitignore` plus built-in patterns. Nested `.gitignore` files are
/// not consulted.
pub struct GitignoreMatcher {
    root: PathBuf,
    rules: Gitignore,
}

impl GitignoreMatcher {
    pub fn new(root: &Path) -> Self {
        let mut builder = GitignoreBuilder::new(root);
        let gitignore = root.join(".gitignore");
        if gitignore.is_file() {
            if let Some(err) = builder.add(&gitignore) {
                warn!(path = %gitignore.display(), "Skipping unreadable .gitignore: {}", err);
            }
        }
        for pattern in BUILTIN_PATTERNS {
            if let Err(err) = builder.add_line(None, pattern) {
                warn!(pattern, "Invalid built-in ignore pattern: {}", err);
            }
        }
        let rules = builder.build().unwrap_or_else(|err| {
            warn!(root = %root.display(), "Ignore rules unusable, matching nothing: {}", err);
            Gitignore::empty()
        });
        Self {
            root: root.to_path_buf(),
            rules,
        }
    }
}

impl IgnoreMatcher for GitignoreMatcher {
    /// Paths outside the root never match.
    fn matches(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return false;
        };
        self.rules
            .matched_path_or_any_parents(relative, path.is_dir())
            .is_ignore()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GitignoreSource;

impl IgnoreSource for GitignoreSource {
    fn matcher_for(&self, root: &Path) -> Box<dyn IgnoreMatcher> {
        Box::new(GitignoreMatcher::new(root))
    }
}
