//! Raw SQLite rows and their conversion into protocol records.

use codemapper_protocol::{Codebase, Job, JobId, JobStatus, LogEntry, LogLevel};

use crate::StoreError;

#[derive(sqlx::FromRow)]
pub(crate) struct CodebaseRow {
    id: i64,
    name: String,
    path: String,
    schedule: String,
    created_at: String,
    last_run: Option<String>,
}

impl From<CodebaseRow> for Codebase {
    fn from(row: CodebaseRow) -> Self {
        Codebase {
            id: row.id,
            name: row.name,
            path: row.path,
            schedule: row.schedule,
            created_at: row.created_at,
            last_run: row.last_run,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct JobRow {
    id: String,
    codebase_id: i64,
    codebase_name: String,
    status: String,
    started_at: String,
    finished_at: Option<String>,
    symbols_processed: i64,
    files_processed: i64,
    error: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status: JobStatus = row.status.parse().map_err(|reason| StoreError::InvalidRow {
            table: "jobs",
            reason,
        })?;
        Ok(Job {
            id: JobId::from(row.id),
            codebase_id: row.codebase_id,
            codebase_name: row.codebase_name,
            status,
            started_at: row.started_at,
            finished_at: row.finished_at,
            symbols_processed: row.symbols_processed,
            files_processed: row.files_processed,
            error: row.error,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct LogRow {
    job_id: String,
    timestamp: String,
    message: String,
    level: String,
}

impl TryFrom<LogRow> for LogEntry {
    type Error = StoreError;

    fn try_from(row: LogRow) -> Result<Self, Self::Error> {
        let level: LogLevel = row.level.parse().map_err(|reason| StoreError::InvalidRow {
            table: "logs",
            reason,
        })?;
        Ok(LogEntry {
            job_id: JobId::from(row.job_id),
            timestamp: row.timestamp,
            message: row.message,
            level,
        })
    }
}
