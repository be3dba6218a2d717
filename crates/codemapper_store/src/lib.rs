//! Durable registry of codebases, scan jobs and job log lines.
//!
//! Thin append/query layer over SQLite. Every method is its own atomic unit;
//! concurrent scans share one pool and rely on SQLite's writer lock.

mod rows;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use codemapper_protocol::{timestamp_now, Codebase, Job, JobId, JobStatus, LogEntry, LogLevel};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use thiserror::Error;
use tracing::debug;

use rows::{CodebaseRow, JobRow, LogRow};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Invalid row in {table}: {reason}")]
    InvalidRow { table: &'static str, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

const JOB_COLUMNS: &str = "id, codebase_id, codebase_name, status, started_at, finished_at, \
                           symbols_processed, files_processed, error";

#[derive(Clone)]
pub struct Store {
    pool: Pool<Sqlite>,
}

impl Store {
    /// Open (creating if missing) the database file at `path`.
    ///
    /// Foreign keys stay unenforced: ad-hoc scans record `codebase_id = 0`
    /// and removing a codebase keeps its job history.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(false);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        debug!(path = %path.display(), "Opened store");
        Ok(Self { pool })
    }

    /// Private in-memory database (for testing).
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(false);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Create the schema if absent. Safe on every startup.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS codebases (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT UNIQUE NOT NULL,
                path TEXT NOT NULL,
                schedule TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_run TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                codebase_id INTEGER NOT NULL,
                codebase_name TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                symbols_processed INTEGER NOT NULL DEFAULT 0,
                files_processed INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                FOREIGN KEY (codebase_id) REFERENCES codebases(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                message TEXT NOT NULL,
                level TEXT NOT NULL DEFAULT 'info',
                FOREIGN KEY (job_id) REFERENCES jobs(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_codebase ON jobs(codebase_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_logs_job ON logs(job_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ========================================================================
    // Codebases
    // ========================================================================

    /// Register a codebase, replacing path and schedule of an existing name.
    ///
    /// The row id survives re-registration; `created_at` is reset and
    /// `last_run` cleared.
    pub async fn add_codebase(&self, name: &str, path: &str, schedule: &str) -> Result<Codebase> {
        let row: CodebaseRow = sqlx::query_as(
            r#"
            INSERT INTO codebases (name, path, schedule, created_at, last_run)
            VALUES (?1, ?2, ?3, ?4, NULL)
            ON CONFLICT(name) DO UPDATE SET
                path = excluded.path,
                schedule = excluded.schedule,
                created_at = excluded.created_at,
                last_run = NULL
            RETURNING id, name, path, schedule, created_at, last_run
            "#,
        )
        .bind(name)
        .bind(path)
        .bind(schedule)
        .bind(timestamp_now())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    pub async fn get_codebases(&self) -> Result<Vec<Codebase>> {
        let rows: Vec<CodebaseRow> = sqlx::query_as(
            "SELECT id, name, path, schedule, created_at, last_run FROM codebases ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Codebase::from).collect())
    }

    pub async fn get_codebase(&self, name: &str) -> Result<Option<Codebase>> {
        let row: Option<CodebaseRow> = sqlx::query_as(
            "SELECT id, name, path, schedule, created_at, last_run FROM codebases WHERE name = ?1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Codebase::from))
    }

    /// Returns true iff a row was deleted. Job history is kept.
    pub async fn remove_codebase(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM codebases WHERE name = ?1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Jobs
    // ========================================================================

    /// Insert a job in `running` state, started now.
    pub async fn create_job(
        &self,
        job_id: &JobId,
        codebase_id: i64,
        codebase_name: &str,
    ) -> Result<Job> {
        let job = Job {
            id: job_id.clone(),
            codebase_id,
            codebase_name: codebase_name.to_string(),
            status: JobStatus::Running,
            started_at: timestamp_now(),
            finished_at: None,
            symbols_processed: 0,
            files_processed: 0,
            error: None,
        };
        sqlx::query(
            r#"
            INSERT INTO jobs (id, codebase_id, codebase_name, status, started_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(job.id.as_str())
        .bind(job.codebase_id)
        .bind(&job.codebase_name)
        .bind(job.status.as_str())
        .bind(&job.started_at)
        .execute(&self.pool)
        .await?;
        Ok(job)
    }

    /// Record the outcome of a running job.
    ///
    /// `finished_at` is stamped iff `status` is terminal, and the owning
    /// codebase's `last_run` moves to now. A job that already reached a
    /// terminal state is left untouched and `false` is returned.
    pub async fn update_job(
        &self,
        job_id: &JobId,
        status: JobStatus,
        symbols: i64,
        files: i64,
        error: Option<&str>,
    ) -> Result<bool> {
        let now = timestamp_now();
        let finished = status.is_terminal().then(|| now.clone());
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?1,
                finished_at = ?2,
                symbols_processed = ?3,
                files_processed = ?4,
                error = ?5
            WHERE id = ?6 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(status.as_str())
        .bind(finished)
        .bind(symbols)
        .bind(files)
        .bind(error)
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(job_id = %job_id, "update_job matched no open job");
            return Ok(false);
        }

        sqlx::query(
            "UPDATE codebases SET last_run = ?1 WHERE id = (SELECT codebase_id FROM jobs WHERE id = ?2)",
        )
        .bind(&now)
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(true)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS))
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Job::try_from).transpose()
    }

    /// Most recent jobs first.
    pub async fn get_jobs(&self, limit: i64) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM jobs ORDER BY started_at DESC, rowid DESC LIMIT ?1",
            JOB_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    pub async fn get_running_jobs(&self) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM jobs WHERE status = ?1 ORDER BY started_at DESC, rowid DESC",
            JOB_COLUMNS
        ))
        .bind(JobStatus::Running.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    pub async fn latest_job_for_codebase(&self, name: &str) -> Result<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM jobs WHERE codebase_name = ?1 ORDER BY started_at DESC, rowid DESC LIMIT 1",
            JOB_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Job::try_from).transpose()
    }

    /// Fail every job still marked running. Used at daemon start, when no
    /// scan from this process can be in flight yet.
    pub async fn fail_orphaned_jobs(&self, reason: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET status = ?1, finished_at = ?2, error = ?3 WHERE status = ?4",
        )
        .bind(JobStatus::Failed.as_str())
        .bind(timestamp_now())
        .bind(reason)
        .bind(JobStatus::Running.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ========================================================================
    // Logs
    // ========================================================================

    pub async fn add_log(&self, job_id: &JobId, message: &str, level: LogLevel) -> Result<()> {
        sqlx::query("INSERT INTO logs (job_id, timestamp, message, level) VALUES (?1, ?2, ?3, ?4)")
            .bind(job_id.as_str())
            .bind(timestamp_now())
            .bind(message)
            .bind(level.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Oldest lines first.
    pub async fn get_logs(&self, job_id: &str, limit: i64) -> Result<Vec<LogEntry>> {
        let rows: Vec<LogRow> = sqlx::query_as(
            r#"
            SELECT job_id, timestamp, message, level
            FROM logs
            WHERE job_id = ?1
            ORDER BY timestamp ASC, id ASC
            LIMIT ?2
            "#,
        )
        .bind(job_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(LogEntry::try_from).collect()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
