//! Scan orchestration.
//!
//! One call to [`ScanCoordinator::run_scan`] is one job: admission
//! (single-flight per codebase name), job row, summarizer availability
//! check, file discovery, then sequential best-effort processing of every
//! file. Per-file and per-symbol failures are logged and skipped; anything
//! else fails the job with the counts reached so far.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use codemapper_protocol::{JobId, JobStatus, LogLevel};
use codemapper_store::{Store, StoreError};
use thiserror::Error;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::analysis::{
    ArtifactWriter, GitignoreSource, IgnoreMatcher, IgnoreSource, Language, OutlineParser,
    ShadowTree, SourceParser,
};
use crate::cache::{epoch_seconds, CacheError, IncrementalCache};
use crate::config::default_extensions;
use crate::summarize::Summarizer;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Summarizer not available")]
    SummarizerUnavailable,

    #[error("Codebase path not found: {0:?}")]
    MissingRoot(PathBuf),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to read {path:?}: {source}")]
    ReadSource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write summary for {path:?}: {source}")]
    WriteArtifact {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Discovery task failed: {0}")]
    Discovery(#[from] tokio::task::JoinError),

    #[error("Job {0} was already closed by another process")]
    JobAlreadyClosed(JobId),
}

/// Outcome of one admitted scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    pub job_id: JobId,
    pub status: JobStatus,
    pub files_processed: i64,
    pub symbols_processed: i64,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct Progress {
    files: i64,
    symbols: i64,
}

/// Codebase names with a scan in flight. Coordinators that share one
/// set share single-flight admission.
pub type InFlightSet = Arc<Mutex<HashSet<String>>>;

/// Admission to scan one codebase name. The name is released when the
/// ticket drops, whatever path the scan took to get there.
#[derive(Debug)]
pub struct ScanTicket {
    name: String,
    in_flight: InFlightSet,
}

impl ScanTicket {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ScanTicket {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.name);
    }
}

pub struct ScanCoordinator {
    store: Store,
    summarizer: Arc<dyn Summarizer>,
    parser: Arc<dyn SourceParser>,
    ignore: Arc<dyn IgnoreSource>,
    writer: Arc<dyn ArtifactWriter>,
    extensions: Vec<String>,
    in_flight: InFlightSet,
}

impl ScanCoordinator {
    /// Coordinator with the default parser, ignore rules and shadow tree.
    pub fn new(store: Store, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            store,
            summarizer,
            parser: Arc::new(OutlineParser),
            ignore: Arc::new(GitignoreSource),
            writer: Arc::new(ShadowTree::default()),
            extensions: default_extensions(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Share single-flight admission with other coordinators.
    pub fn with_in_flight(mut self, in_flight: InFlightSet) -> Self {
        self.in_flight = in_flight;
        self
    }

    pub fn in_flight(&self) -> InFlightSet {
        Arc::clone(&self.in_flight)
    }

    pub fn with_parser(mut self, parser: Arc<dyn SourceParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_ignore_source(mut self, ignore: Arc<dyn IgnoreSource>) -> Self {
        self.ignore = ignore;
        self
    }

    pub fn with_artifact_writer(mut self, writer: Arc<dyn ArtifactWriter>) -> Self {
        self.writer = writer;
        self
    }

    /// Extensions with or without the leading dot.
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Claim `name`, or `None` if a scan for it is already in flight.
    pub fn try_begin(&self, name: &str) -> Option<ScanTicket> {
        lock(&self.in_flight)
            .insert(name.to_string())
            .then(|| ScanTicket {
                name: name.to_string(),
                in_flight: Arc::clone(&self.in_flight),
            })
    }

    pub fn is_scanning(&self, name: &str) -> bool {
        lock(&self.in_flight).contains(name)
    }

    /// Scan `root` as codebase `name`. Returns `None` without touching the
    /// store when a scan for `name` is already running.
    pub async fn run_scan(&self, codebase_id: i64, name: &str, root: &Path) -> Option<ScanSummary> {
        let ticket = self.try_begin(name)?;
        Some(self.run_with_ticket(ticket, codebase_id, root).await)
    }

    /// Run an already admitted scan. The ticket is released on return.
    pub async fn run_with_ticket(
        &self,
        ticket: ScanTicket,
        codebase_id: i64,
        root: &Path,
    ) -> ScanSummary {
        let job_id = JobId::new();
        let mut progress = Progress::default();

        let result = self
            .execute(&job_id, codebase_id, ticket.name(), root, &mut progress)
            .await;

        let summary = match result {
            Ok(()) => ScanSummary {
                job_id,
                status: JobStatus::Completed,
                files_processed: progress.files,
                symbols_processed: progress.symbols,
                error: None,
            },
            Err(e) => {
                let message = e.to_string();
                self.record_failure(&job_id, &progress, &message).await;
                ScanSummary {
                    job_id,
                    status: JobStatus::Failed,
                    files_processed: progress.files,
                    symbols_processed: progress.symbols,
                    error: Some(message),
                }
            }
        };
        drop(ticket);
        summary
    }

    async fn execute(
        &self,
        job_id: &JobId,
        codebase_id: i64,
        name: &str,
        root: &Path,
        progress: &mut Progress,
    ) -> Result<(), ScanError> {
        self.store.create_job(job_id, codebase_id, name).await?;
        info!(job_id = %job_id, codebase = %name, "Scan job created");
        self.log(job_id, LogLevel::Info, &format!("Starting scan of {}", root.display()))
            .await?;

        if !self.summarizer.is_available().await {
            self.log(
                job_id,
                LogLevel::Warn,
                "Summarizer not available - skipping summaries",
            )
            .await?;
            return Err(ScanError::SummarizerUnavailable);
        }

        if !root.is_dir() {
            return Err(ScanError::MissingRoot(root.to_path_buf()));
        }

        let files = self.discover(root).await?;
        self.log(job_id, LogLevel::Info, &format!("Found {} source files", files.len()))
            .await?;

        let mut cache = IncrementalCache::open(root);
        for (file, language) in &files {
            if let Err(e) = self
                .process_file(job_id, root, file, *language, &mut cache, progress)
                .await
            {
                let message = format!("Error processing {}: {}", display_name(file), e);
                self.log(job_id, LogLevel::Error, &message).await?;
            }
        }

        let closed = self
            .store
            .update_job(
                job_id,
                JobStatus::Completed,
                progress.symbols,
                progress.files,
                None,
            )
            .await?;
        if !closed {
            return Err(ScanError::JobAlreadyClosed(job_id.clone()));
        }

        // The job row is final now; a failed log write must not contradict it.
        let message = format!(
            "Completed: {} files, {} symbols",
            progress.files, progress.symbols
        );
        if let Err(e) = self.log(job_id, LogLevel::Info, &message).await {
            error!(job_id = %job_id, "Failed to write job log: {}", e);
        }
        Ok(())
    }

    async fn process_file(
        &self,
        job_id: &JobId,
        root: &Path,
        file: &Path,
        language: Language,
        cache: &mut IncrementalCache,
        progress: &mut Progress,
    ) -> Result<(), ScanError> {
        let content =
            tokio::fs::read_to_string(file)
                .await
                .map_err(|source| ScanError::ReadSource {
                    path: file.to_path_buf(),
                    source,
                })?;
        let symbols = self.parser.extract_symbols(&content, language);
        let file_name = display_name(file);

        let mut fragments = Vec::new();
        for symbol in &symbols {
            let id = IncrementalCache::symbol_id(file, &symbol.name);
            let hash = IncrementalCache::compute_hash(&symbol.code);
            if !cache.is_changed(&id, &hash) {
                continue;
            }

            let message = format!("Processing {} in {}", symbol.name, file_name);
            self.log(job_id, LogLevel::Info, &message).await?;
            match self.summarizer.summarize(symbol).await {
                Ok(summary) => {
                    fragments.push(format!(
                        "## {}: {}\n\n{}",
                        symbol.kind.title(),
                        symbol.name,
                        summary
                    ));
                    cache.update(&id, &hash, epoch_seconds());
                    progress.symbols += 1;
                }
                Err(e) => {
                    let message = format!("Summary error for {}: {}", symbol.name, e);
                    self.log(job_id, LogLevel::Error, &message).await?;
                }
            }
        }

        if !fragments.is_empty() {
            let text = render_artifact(&file_name, &fragments);
            self.writer
                .write(root, file, &text)
                .map_err(|source| ScanError::WriteArtifact {
                    path: file.to_path_buf(),
                    source,
                })?;
        }

        cache.save()?;
        progress.files += 1;
        Ok(())
    }

    async fn discover(&self, root: &Path) -> Result<Vec<(PathBuf, Language)>, ScanError> {
        let matcher = self.ignore.matcher_for(root);
        let parser = Arc::clone(&self.parser);
        let extensions = self.extensions.clone();
        let root = root.to_path_buf();
        let files = tokio::task::spawn_blocking(move || {
            discover_files(&root, matcher.as_ref(), parser.as_ref(), &extensions)
        })
        .await?;
        Ok(files)
    }

    async fn record_failure(&self, job_id: &JobId, progress: &Progress, message: &str) {
        match self
            .store
            .update_job(
                job_id,
                JobStatus::Failed,
                progress.symbols,
                progress.files,
                Some(message),
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(job_id = %job_id, "Job already closed, failure not recorded"),
            Err(e) => error!(job_id = %job_id, "Failed to record job failure: {}", e),
        }
        if let Err(e) = self
            .log(job_id, LogLevel::Error, &format!("Failed: {message}"))
            .await
        {
            error!(job_id = %job_id, "Failed to write job log: {}", e);
        }
    }

    /// Append a job log row and mirror it to the process log.
    async fn log(&self, job_id: &JobId, level: LogLevel, message: &str) -> Result<(), StoreError> {
        match level {
            LogLevel::Info => info!(job_id = %job_id, "{}", message),
            LogLevel::Warn => warn!(job_id = %job_id, "{}", message),
            LogLevel::Error => error!(job_id = %job_id, "{}", message),
        }
        self.store.add_log(job_id, message, level).await
    }
}

/// Files under `root` in name order, with ignored directories pruned.
fn discover_files(
    root: &Path,
    matcher: &dyn IgnoreMatcher,
    parser: &dyn SourceParser,
    extensions: &[String],
) -> Vec<(PathBuf, Language)> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !matcher.matches(entry.path()))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(root = %root.display(), "Skipping unreadable path: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && has_extension(entry.path(), extensions))
        .filter_map(|entry| {
            let language = parser.detect_language(entry.path())?;
            Some((entry.into_path(), language))
        })
        .collect()
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            extensions
                .iter()
                .any(|allowed| allowed.trim_start_matches('.') == ext)
        })
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// `# <file>` header followed by the symbol fragments, separated by rules.
pub(crate) fn render_artifact(file_name: &str, fragments: &[String]) -> String {
    format!("# {}\n\n{}", file_name, fragments.join("\n\n---\n\n"))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
