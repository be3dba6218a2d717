use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use codemapper::analysis::{Language, OutlineParser, SourceParser, Symbol};
use codemapper::summarize::{SummarizeError, Summarizer};
use codemapper::ScanCoordinator;
use codemapper_protocol::defaults::CACHE_FILE_NAME;
use codemapper_protocol::{JobStatus, LogLevel};
use codemapper_store::Store;
use tempfile::TempDir;

const APP_PY: &str = "def alpha():\n    return 1\n\n\ndef beta():\n    return 2\n";

#[derive(Default)]
struct FakeSummarizer {
    unavailable: bool,
    fail_on: Option<&'static str>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn is_available(&self) -> bool {
        !self.unavailable
    }

    async fn summarize(&self, symbol: &Symbol) -> Result<String, SummarizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_on == Some(symbol.name.as_str()) {
            return Err(SummarizeError::InvalidResponse("backend choked".to_string()));
        }
        Ok(format!("**Summary:** {} does a thing.", symbol.name))
    }
}

/// Outline parser that counts how often it was asked for symbols.
#[derive(Default)]
struct CountingParser {
    calls: AtomicUsize,
}

impl SourceParser for CountingParser {
    fn detect_language(&self, path: &Path) -> Option<Language> {
        OutlineParser.detect_language(path)
    }

    fn extract_symbols(&self, content: &str, language: Language) -> Vec<Symbol> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        OutlineParser.extract_symbols(content, language)
    }
}

async fn memory_store() -> Store {
    let store = Store::in_memory().await.unwrap();
    store.init().await.unwrap();
    store
}

fn project_with_app() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("app.py"), APP_PY).unwrap();
    dir
}

#[tokio::test]
async fn unavailable_summarizer_fails_the_job_before_parsing() {
    let store = memory_store().await;
    let summarizer = Arc::new(FakeSummarizer {
        unavailable: true,
        ..Default::default()
    });
    let parser = Arc::new(CountingParser::default());
    let coordinator = ScanCoordinator::new(store.clone(), summarizer.clone())
        .with_parser(parser.clone());
    let dir = project_with_app();

    let summary = coordinator.run_scan(1, "api", dir.path()).await.unwrap();
    assert_eq!(summary.status, JobStatus::Failed);
    assert_eq!(summary.error.as_deref(), Some("Summarizer not available"));
    assert_eq!(parser.calls.load(Ordering::SeqCst), 0);
    assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);

    let job = store
        .get_job(summary.job_id.as_str())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.finished_at.is_some());

    let logs = store.get_logs(summary.job_id.as_str(), 100).await.unwrap();
    assert!(logs.iter().any(|l| l.level == LogLevel::Warn));
    assert!(!coordinator.is_scanning("api"));
}

#[tokio::test]
async fn empty_directory_completes_with_zero_counts() {
    let store = memory_store().await;
    let coordinator = ScanCoordinator::new(store.clone(), Arc::new(FakeSummarizer::default()));
    let dir = TempDir::new().unwrap();

    let summary = coordinator.run_scan(1, "empty", dir.path()).await.unwrap();
    assert_eq!(summary.status, JobStatus::Completed);
    assert_eq!(summary.files_processed, 0);
    assert_eq!(summary.symbols_processed, 0);

    let job = store
        .get_job(summary.job_id.as_str())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.files_processed, 0);
}

#[tokio::test]
async fn concurrent_scans_of_one_name_admit_only_one() {
    let store = memory_store().await;
    let summarizer = Arc::new(FakeSummarizer {
        delay: Some(Duration::from_millis(100)),
        ..Default::default()
    });
    let coordinator = ScanCoordinator::new(store.clone(), summarizer);
    let dir = project_with_app();

    let (first, second) = tokio::join!(
        coordinator.run_scan(1, "api", dir.path()),
        coordinator.run_scan(1, "api", dir.path()),
    );
    assert_eq!(
        [first.is_some(), second.is_some()]
            .iter()
            .filter(|admitted| **admitted)
            .count(),
        1
    );

    let jobs = store.get_jobs(10).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert!(store.get_running_jobs().await.unwrap().is_empty());

    // The name is free again once the first scan finished.
    assert!(coordinator.run_scan(1, "api", dir.path()).await.is_some());
}

#[tokio::test]
async fn different_names_scan_in_parallel() {
    let store = memory_store().await;
    let summarizer = Arc::new(FakeSummarizer {
        delay: Some(Duration::from_millis(50)),
        ..Default::default()
    });
    let coordinator = ScanCoordinator::new(store.clone(), summarizer);
    let dir = project_with_app();

    let (a, b) = tokio::join!(
        coordinator.run_scan(1, "api", dir.path()),
        coordinator.run_scan(2, "web", dir.path()),
    );
    assert!(a.is_some());
    assert!(b.is_some());
}

#[tokio::test]
async fn symbol_failure_is_logged_and_scan_continues() {
    let store = memory_store().await;
    let summarizer = Arc::new(FakeSummarizer {
        fail_on: Some("alpha"),
        ..Default::default()
    });
    let coordinator = ScanCoordinator::new(store.clone(), summarizer.clone());
    let dir = project_with_app();

    let summary = coordinator.run_scan(1, "api", dir.path()).await.unwrap();
    assert_eq!(summary.status, JobStatus::Completed);
    assert_eq!(summary.files_processed, 1);
    assert_eq!(summary.symbols_processed, 1);

    let logs = store.get_logs(summary.job_id.as_str(), 100).await.unwrap();
    assert!(logs
        .iter()
        .any(|l| l.level == LogLevel::Error && l.message.contains("Summary error for alpha")));

    // alpha was never cached, so it is retried; beta is not.
    let again = coordinator.run_scan(1, "api", dir.path()).await.unwrap();
    assert_eq!(again.symbols_processed, 0);
    assert_eq!(summarizer.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn unchanged_symbols_are_skipped_on_rescan() {
    let store = memory_store().await;
    let summarizer = Arc::new(FakeSummarizer::default());
    let coordinator = ScanCoordinator::new(store.clone(), summarizer.clone());
    let dir = project_with_app();

    let first = coordinator.run_scan(1, "api", dir.path()).await.unwrap();
    assert_eq!(first.symbols_processed, 2);

    let second = coordinator.run_scan(1, "api", dir.path()).await.unwrap();
    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(second.files_processed, 1);
    assert_eq!(second.symbols_processed, 0);
    assert_eq!(summarizer.calls.load(Ordering::SeqCst), 2);

    std::fs::write(
        dir.path().join("app.py"),
        "def alpha():\n    return 1\n\n\ndef beta():\n    return 3\n",
    )
    .unwrap();
    let third = coordinator.run_scan(1, "api", dir.path()).await.unwrap();
    assert_eq!(third.symbols_processed, 1);
}

#[tokio::test]
async fn scan_writes_cache_and_markdown_artifact() {
    let store = memory_store().await;
    let coordinator = ScanCoordinator::new(store, Arc::new(FakeSummarizer::default()));
    let dir = project_with_app();

    coordinator.run_scan(1, "api", dir.path()).await.unwrap();

    assert!(dir.path().join(CACHE_FILE_NAME).is_file());
    let artifact = std::fs::read_to_string(dir.path().join("maps").join("app.py.md")).unwrap();
    assert!(artifact.starts_with("# app.py"));
    assert!(artifact.contains("## Function: alpha"));
    assert!(artifact.contains("beta does a thing."));
}

#[tokio::test]
async fn gitignored_and_foreign_files_are_not_scanned() {
    let store = memory_store().await;
    let parser = Arc::new(CountingParser::default());
    let coordinator =
        ScanCoordinator::new(store, Arc::new(FakeSummarizer::default())).with_parser(parser.clone());
    let dir = project_with_app();
    std::fs::write(dir.path().join(".gitignore"), "vendor/\n").unwrap();
    std::fs::create_dir(dir.path().join("vendor")).unwrap();
    std::fs::write(dir.path().join("vendor").join("lib.py"), APP_PY).unwrap();
    std::fs::write(dir.path().join("README.md"), "# readme\n").unwrap();

    let summary = coordinator.run_scan(1, "api", dir.path()).await.unwrap();
    assert_eq!(summary.files_processed, 1);
    assert_eq!(parser.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_root_fails_the_job() {
    let store = memory_store().await;
    let coordinator = ScanCoordinator::new(store.clone(), Arc::new(FakeSummarizer::default()));
    let dir = TempDir::new().unwrap();

    let summary = coordinator
        .run_scan(1, "gone", &dir.path().join("nope"))
        .await
        .unwrap();
    assert_eq!(summary.status, JobStatus::Failed);
    assert!(summary.error.unwrap().contains("not found"));

    // A missing root is not an empty project.
    let job = store
        .get_job(summary.job_id.as_str())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.files_processed, 0);
    assert!(job.error.unwrap().contains("Codebase path not found"));

    let logs = store.get_logs(summary.job_id.as_str(), 100).await.unwrap();
    assert!(logs.last().unwrap().message.starts_with("Failed: "));
}

/// Closes every running job mid-scan, the way a restarting daemon would.
struct ClosingSummarizer {
    store: Store,
}

#[async_trait]
impl Summarizer for ClosingSummarizer {
    async fn is_available(&self) -> bool {
        true
    }

    async fn summarize(&self, symbol: &Symbol) -> Result<String, SummarizeError> {
        self.store.fail_orphaned_jobs("daemon restarted").await.unwrap();
        Ok(format!("{} summarized", symbol.name))
    }
}

#[tokio::test]
async fn job_closed_elsewhere_is_not_reported_as_completed() {
    let store = memory_store().await;
    let summarizer = Arc::new(ClosingSummarizer {
        store: store.clone(),
    });
    let coordinator = ScanCoordinator::new(store.clone(), summarizer);
    let dir = project_with_app();

    let summary = coordinator.run_scan(1, "api", dir.path()).await.unwrap();
    assert_eq!(summary.status, JobStatus::Failed);
    assert!(summary.error.unwrap().contains("already closed"));

    // The first terminal transition wins.
    let job = store
        .get_job(summary.job_id.as_str())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("daemon restarted"));
    assert!(!coordinator.is_scanning("api"));
}

#[tokio::test]
async fn failed_completion_log_keeps_the_job_completed() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("mapper.db");
    let store = Store::open(&db_path).await.unwrap();
    store.init().await.unwrap();

    let pool = sqlx::SqlitePool::connect(&format!("sqlite://{}", db_path.display()))
        .await
        .unwrap();
    sqlx::query(
        r#"
        CREATE TRIGGER reject_completion_log BEFORE INSERT ON logs
        WHEN NEW.message LIKE 'Completed:%'
        BEGIN
            SELECT RAISE(ABORT, 'log rejected');
        END
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();
    pool.close().await;

    let coordinator = ScanCoordinator::new(store.clone(), Arc::new(FakeSummarizer::default()));
    let project = project_with_app();

    let summary = coordinator.run_scan(1, "api", project.path()).await.unwrap();
    assert_eq!(summary.status, JobStatus::Completed);
    assert_eq!(summary.error, None);
    assert_eq!(summary.symbols_processed, 2);

    let job = store
        .get_job(summary.job_id.as_str())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.symbols_processed, 2);
    store.close().await;
}

#[tokio::test]
async fn coordinators_sharing_an_in_flight_set_admit_one_scan_per_name() {
    let store = memory_store().await;
    let first = ScanCoordinator::new(store.clone(), Arc::new(FakeSummarizer::default()));
    let second = ScanCoordinator::new(store.clone(), Arc::new(FakeSummarizer::default()))
        .with_in_flight(first.in_flight());
    let dir = project_with_app();

    let ticket = first.try_begin("api").unwrap();
    assert!(second.is_scanning("api"));
    assert!(second.run_scan(1, "api", dir.path()).await.is_none());
    assert!(store.get_jobs(10).await.unwrap().is_empty());

    drop(ticket);
    assert!(second.run_scan(1, "api", dir.path()).await.is_some());

    // Separate sets do not interfere.
    let independent = ScanCoordinator::new(store, Arc::new(FakeSummarizer::default()));
    let _held = first.try_begin("api").unwrap();
    assert!(independent.try_begin("api").is_some());
}
