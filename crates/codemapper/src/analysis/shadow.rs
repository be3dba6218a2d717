use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use super::ArtifactWriter;

/// Mirrors the source tree under `<root>/maps`, one `.md` per source file.
#[derive(Debug, Clone)]
pub struct ShadowTree {
    dir_name: String,
}

impl Default for ShadowTree {
    fn default() -> Self {
        Self::new(codemapper_protocol::defaults::MAPS_DIR)
    }
}

impl ShadowTree {
    pub fn new(dir_name: impl Into<String>) -> Self {
        Self {
            dir_name: dir_name.into(),
        }
    }

    /// `<root>/maps/src/app.py.md` for `<root>/src/app.py`. Sources outside
    /// the root keep their own components below the maps directory.
    pub fn artifact_path(&self, root: &Path, source: &Path) -> PathBuf {
        let relative: PathBuf = match source.strip_prefix(root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => source
                .components()
                .filter(|c| matches!(c, Component::Normal(_)))
                .collect(),
        };
        let mut file_name = relative
            .file_name()
            .map(OsString::from)
            .unwrap_or_default();
        file_name.push(".md");
        root.join(&self.dir_name).join(relative.with_file_name(file_name))
    }
}

impl ArtifactWriter for ShadowTree {
    fn write(&self, root: &Path, source: &Path, text: &str) -> io::Result<PathBuf> {
        let target = self.artifact_path(root, source);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, text)?;
        Ok(target)
    }
}
