//! Content-hash memo of already summarized symbols.
//!
//! One JSON file per codebase root (`<root>/mapper.lock`), mapping
//! `<file path>::<symbol name>` to the hash of the code last summarized.
//! Entries for symbols that no longer exist are kept.

use codemapper_protocol::defaults::CACHE_FILE_NAME;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to write cache {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to encode cache: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub hash: String,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
}

#[derive(Debug)]
pub struct IncrementalCache {
    path: PathBuf,
    entries: HashMap<String, CacheEntry>,
}

impl IncrementalCache {
    /// Load the cache for `root`. Missing, unreadable or corrupt files yield
    /// an empty cache.
    pub fn open(root: &Path) -> Self {
        Self::open_at(root.join(CACHE_FILE_NAME))
    }

    pub fn open_at(path: PathBuf) -> Self {
        let entries = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path.display(), "Ignoring corrupt cache file: {}", e);
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(path = %path.display(), "Ignoring unreadable cache file: {}", e);
                HashMap::new()
            }
        };
        Self { path, entries }
    }

    /// Stable identifier of a symbol within a codebase.
    pub fn symbol_id(file: &Path, symbol_name: &str) -> String {
        format!("{}::{}", file.display(), symbol_name)
    }

    /// Lowercase hex SHA-256 of the exact code text.
    pub fn compute_hash(code: &str) -> String {
        hex::encode(Sha256::digest(code.as_bytes()))
    }

    pub fn is_changed(&self, id: &str, hash: &str) -> bool {
        self.entries
            .get(id)
            .map_or(true, |entry| entry.hash != hash)
    }

    pub fn update(&mut self, id: &str, hash: &str, timestamp: f64) {
        self.entries.insert(
            id.to_string(),
            CacheEntry {
                hash: hash.to_string(),
                timestamp,
            },
        );
    }

    pub fn get(&self, id: &str) -> Option<&CacheEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist the whole map (temp file + rename).
    pub fn save(&self) -> Result<(), CacheError> {
        let encoded = serde_json::to_vec_pretty(&self.entries)?;
        let io_err = |source: std::io::Error| CacheError::Io {
            path: self.path.clone(),
            source,
        };

        let temp_path = self.path.with_extension("lock.tmp");
        let mut file = fs::File::create(&temp_path).map_err(io_err)?;
        file.write_all(&encoded).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        fs::rename(&temp_path, &self.path).map_err(io_err)?;
        Ok(())
    }
}

/// Current time as fractional epoch seconds.
pub fn epoch_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
