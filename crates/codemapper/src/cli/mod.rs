//! Command implementations for the `mapper` binary.
//!
//! Everything except `serve` is a thin client over the control socket.
//! Commands return `Ok(false)` when the daemon answered `ok: false`, so the
//! caller can pick the exit code.

pub mod output;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use codemapper::client::ControlClient;
use codemapper::config::DaemonConfig;
use codemapper::daemon::{install_signal_handlers, read_pid_file, Daemon};
use codemapper::summarize::OllamaSummarizer;
use codemapper_protocol::defaults::DAEMON_NOT_RUNNING_MESSAGE;
use codemapper_protocol::paths::default_logs_dir;
use codemapper_protocol::{ControlRequest, ControlResponse};
use tracing::info;

/// How long `serve --background` waits for the child to answer `ping`.
const BACKGROUND_START_TIMEOUT: Duration = Duration::from_secs(5);
const BACKGROUND_POLL: Duration = Duration::from_millis(100);

/// When a `scan` registration should fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanWhen {
    Every(String),
    Cron(String),
    Once,
}

impl ScanWhen {
    /// Trigger spec sent to the daemon; `None` for a one-off scan.
    pub fn schedule(&self) -> Option<String> {
        match self {
            ScanWhen::Every(interval) => Some(format!("every {}", interval.trim())),
            ScanWhen::Cron(expr) => Some(expr.trim().to_string()),
            ScanWhen::Once => None,
        }
    }
}

/// Run the daemon in the foreground until `stop` or a signal.
pub async fn serve(config: DaemonConfig) -> Result<bool> {
    let summarizer = Arc::new(OllamaSummarizer::new(&config.summarizer));
    info!(model = summarizer.model(), "Using summarizer");

    let daemon = Daemon::start(config, summarizer).await?;
    install_signal_handlers(daemon.shutdown_flag())?;
    daemon.serve().await?;
    Ok(true)
}

/// Re-launch this binary as a detached `serve` and wait until it answers.
pub async fn serve_background(config: &DaemonConfig, config_path: Option<&Path>) -> Result<bool> {
    let client = ControlClient::new(&config.socket_path);
    if client.is_running().await {
        println!("Daemon already running");
        return Ok(true);
    }

    let exe = std::env::current_exe().context("Failed to locate the mapper binary")?;
    let mut command = std::process::Command::new(exe);
    command.arg("serve").arg("--socket").arg(&config.socket_path);
    if let Some(path) = config_path {
        command.arg("--config").arg(path);
    }
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    let child = command.spawn().context("Failed to start daemon")?;

    let deadline = tokio::time::Instant::now() + BACKGROUND_START_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(BACKGROUND_POLL).await;
        if client.is_running().await {
            println!("Daemon started (pid {})", child.id());
            return Ok(true);
        }
    }

    eprintln!(
        "Daemon did not answer within {}s; check {}",
        BACKGROUND_START_TIMEOUT.as_secs(),
        default_logs_dir().display()
    );
    Ok(false)
}

pub async fn stop(client: &ControlClient) -> Result<bool> {
    let response = client.send(&ControlRequest::Stop).await?;
    Ok(report(&response))
}

pub async fn status(client: &ControlClient, pid_file: &Path) -> Result<bool> {
    let response = client.send(&ControlRequest::Ping).await?;
    if !response.ok {
        println!("{}", DAEMON_NOT_RUNNING_MESSAGE);
        return Ok(false);
    }
    match read_pid_file(pid_file) {
        Some(pid) => println!("Daemon running (pid {})", pid),
        None => println!("Daemon running"),
    }
    println!("Socket: {}", client.socket_path().display());
    Ok(true)
}

/// Register `path` on a schedule, or scan it once.
pub async fn scan(
    client: &ControlClient,
    path: &Path,
    name: Option<String>,
    when: ScanWhen,
) -> Result<bool> {
    let path = canonical_dir(path)?;
    let path_str = path.to_string_lossy().into_owned();

    let request = match when.schedule() {
        None => ControlRequest::RunOnce { path: path_str },
        Some(schedule) => {
            let name = match name {
                Some(name) => name,
                None => default_name(&path)?,
            };
            ControlRequest::Scan {
                name,
                path: path_str,
                schedule,
            }
        }
    };

    let response = client.send(&request).await?;
    Ok(report(&response))
}

pub async fn list(client: &ControlClient) -> Result<bool> {
    let response = client.send(&ControlRequest::List).await?;
    if !response.ok {
        return Ok(report(&response));
    }
    let codebases = response.codebases.unwrap_or_default();
    if codebases.is_empty() {
        println!("No codebases registered");
    } else {
        output::print_codebases(&codebases);
    }
    Ok(true)
}

pub async fn remove(client: &ControlClient, name: String) -> Result<bool> {
    let response = client.send(&ControlRequest::Remove { name }).await?;
    Ok(report(&response))
}

pub async fn run(client: &ControlClient, name: String) -> Result<bool> {
    let response = client.send(&ControlRequest::Run { name }).await?;
    Ok(report(&response))
}

pub async fn ps(client: &ControlClient) -> Result<bool> {
    let response = client.send(&ControlRequest::Ps).await?;
    if !response.ok {
        return Ok(report(&response));
    }
    let jobs = response.jobs.unwrap_or_default();
    if jobs.is_empty() {
        println!("No running jobs");
    } else {
        output::print_jobs(&jobs);
    }
    Ok(true)
}

pub async fn jobs(client: &ControlClient, limit: i64) -> Result<bool> {
    let response = client.send(&ControlRequest::Jobs { limit }).await?;
    if !response.ok {
        return Ok(report(&response));
    }
    let jobs = response.jobs.unwrap_or_default();
    if jobs.is_empty() {
        println!("No jobs yet");
    } else {
        output::print_jobs(&jobs);
    }
    Ok(true)
}

/// `target` is a job id or a codebase name.
pub async fn logs(client: &ControlClient, target: String, limit: i64) -> Result<bool> {
    let response = client
        .send(&ControlRequest::Logs {
            job_id: target,
            limit,
        })
        .await?;
    if !response.ok {
        return Ok(report(&response));
    }
    let logs = response.logs.unwrap_or_default();
    if logs.is_empty() {
        println!("No log lines");
    } else {
        output::print_logs(&logs);
    }
    Ok(true)
}

/// Print the response message (stderr on failure) and return `ok`.
fn report(response: &ControlResponse) -> bool {
    if response.ok {
        if !response.message.is_empty() {
            println!("{}", response.message);
        }
    } else {
        eprintln!("Error: {}", response.message);
    }
    response.ok
}

fn canonical_dir(path: &Path) -> Result<PathBuf> {
    let path = std::fs::canonicalize(path)
        .with_context(|| format!("Path not found: {}", path.display()))?;
    if !path.is_dir() {
        bail!("Not a directory: {}", path.display());
    }
    Ok(path)
}

fn default_name(path: &Path) -> Result<String> {
    match path.file_name() {
        Some(name) => Ok(name.to_string_lossy().into_owned()),
        None => bail!("Cannot derive a name from {}; pass --name", path.display()),
    }
}
