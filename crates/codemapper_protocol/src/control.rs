//! Control envelope for the daemon socket.
//!
//! Requests are internally tagged by `cmd`. Responses share the
//! `{ok, message}` header and carry at most one payload list.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::defaults::{DEFAULT_JOBS_LIMIT, DEFAULT_LOGS_LIMIT};
use crate::types::{Codebase, Job, JobStatus, LogEntry, LogLevel};

/// Command names the daemon understands.
pub const KNOWN_COMMANDS: &[&str] = &[
    "ping", "scan", "run", "run_once", "list", "ps", "jobs", "logs", "remove", "stop",
];

/// Control request envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Health check
    Ping,
    /// Register (or re-register) a codebase with a trigger spec
    Scan {
        #[serde(default)]
        name: String,
        #[serde(default)]
        path: String,
        #[serde(default)]
        schedule: String,
    },
    /// Scan a registered codebase now
    Run {
        #[serde(default)]
        name: String,
    },
    /// Scan an unregistered directory once
    RunOnce {
        #[serde(default)]
        path: String,
    },
    /// List registered codebases
    List,
    /// List running jobs
    Ps,
    /// Recent job history
    Jobs {
        #[serde(default = "default_jobs_limit")]
        limit: i64,
    },
    /// Log lines for a job id, or for the latest job of a codebase name
    Logs {
        #[serde(default)]
        job_id: String,
        #[serde(default = "default_logs_limit")]
        limit: i64,
    },
    /// Unregister a codebase and its trigger
    Remove {
        #[serde(default)]
        name: String,
    },
    /// Shut the daemon down
    Stop,
}

fn default_jobs_limit() -> i64 {
    DEFAULT_JOBS_LIMIT
}

fn default_logs_limit() -> i64 {
    DEFAULT_LOGS_LIMIT
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Invalid request: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Request too large: exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

impl ControlRequest {
    /// Decode a request body, distinguishing unknown commands from malformed input.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_slice(bytes)?;
        let cmd = value
            .get("cmd")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if !KNOWN_COMMANDS.contains(&cmd.as_str()) {
            return Err(DecodeError::UnknownCommand(cmd));
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn command_name(&self) -> &'static str {
        match self {
            ControlRequest::Ping => "ping",
            ControlRequest::Scan { .. } => "scan",
            ControlRequest::Run { .. } => "run",
            ControlRequest::RunOnce { .. } => "run_once",
            ControlRequest::List => "list",
            ControlRequest::Ps => "ps",
            ControlRequest::Jobs { .. } => "jobs",
            ControlRequest::Logs { .. } => "logs",
            ControlRequest::Remove { .. } => "remove",
            ControlRequest::Stop => "stop",
        }
    }
}

/// Codebase summary for `list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodebaseInfo {
    pub name: String,
    pub path: String,
    pub schedule: String,
    pub last_run: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<String>,
}

impl From<&Codebase> for CodebaseInfo {
    fn from(cb: &Codebase) -> Self {
        Self {
            name: cb.name.clone(),
            path: cb.path.clone(),
            schedule: cb.schedule.clone(),
            last_run: cb.last_run.clone(),
            next_run: None,
        }
    }
}

/// Job summary for `ps` and `jobs`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: String,
    pub codebase: String,
    pub status: JobStatus,
    pub started: String,
    pub finished: Option<String>,
    pub files: i64,
    pub symbols: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Job> for JobInfo {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.to_string(),
            codebase: job.codebase_name.clone(),
            status: job.status,
            started: job.started_at.clone(),
            finished: job.finished_at.clone(),
            files: job.files_processed,
            symbols: job.symbols_processed,
            error: job.error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
}

impl From<&LogEntry> for LogLine {
    fn from(entry: &LogEntry) -> Self {
        Self {
            timestamp: entry.timestamp.clone(),
            level: entry.level,
            message: entry.message.clone(),
        }
    }
}

/// Control response envelope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub ok: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codebases: Option<Vec<CodebaseInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobs: Option<Vec<JobInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<LogLine>>,
}

impl ControlResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_codebases(mut self, codebases: Vec<CodebaseInfo>) -> Self {
        self.codebases = Some(codebases);
        self
    }

    pub fn with_jobs(mut self, jobs: Vec<JobInfo>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    pub fn with_logs(mut self, logs: Vec<LogLine>) -> Self {
        self.logs = Some(logs);
        self
    }
}
