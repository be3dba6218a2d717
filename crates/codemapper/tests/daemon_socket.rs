use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use codemapper::analysis::Symbol;
use codemapper::client::ControlClient;
use codemapper::config::DaemonConfig;
use codemapper::daemon::{read_pid_file, Daemon};
use codemapper::summarize::{SummarizeError, Summarizer};
use codemapper_protocol::{ControlRequest, ControlResponse, JobStatus};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::task::JoinHandle;

struct EchoSummarizer;

#[async_trait]
impl Summarizer for EchoSummarizer {
    async fn is_available(&self) -> bool {
        true
    }

    async fn summarize(&self, symbol: &Symbol) -> Result<String, SummarizeError> {
        Ok(format!("Summary of {}", symbol.name))
    }
}

/// Holds each summary long enough for a scan to be observed mid-flight.
struct SlowSummarizer;

#[async_trait]
impl Summarizer for SlowSummarizer {
    async fn is_available(&self) -> bool {
        true
    }

    async fn summarize(&self, symbol: &Symbol) -> Result<String, SummarizeError> {
        tokio::time::sleep(Duration::from_millis(600)).await;
        Ok(format!("Summary of {}", symbol.name))
    }
}

struct Running {
    client: ControlClient,
    handle: JoinHandle<anyhow::Result<()>>,
}

fn test_config(dir: &TempDir) -> DaemonConfig {
    DaemonConfig {
        socket_path: dir.path().join("mapper.sock"),
        pid_file: dir.path().join("mapper.pid"),
        database_path: dir.path().join("mapper.db"),
        scheduler_tick_ms: 50,
        ..DaemonConfig::default()
    }
}

async fn start(config: &DaemonConfig) -> Running {
    start_with(config, Arc::new(EchoSummarizer)).await
}

async fn start_with(config: &DaemonConfig, summarizer: Arc<dyn Summarizer>) -> Running {
    let daemon = Daemon::start(config.clone(), summarizer).await.unwrap();
    let handle = tokio::spawn(daemon.serve());
    let client = ControlClient::new(&config.socket_path);
    for _ in 0..100 {
        if client.is_running().await {
            return Running { client, handle };
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("daemon did not come up");
}

async fn stop(running: Running) {
    let response = running.client.send(&ControlRequest::Stop).await.unwrap();
    assert!(response.ok);
    assert_eq!(response.message, "Daemon stopping");
    tokio::time::timeout(Duration::from_secs(5), running.handle)
        .await
        .expect("daemon did not stop")
        .unwrap()
        .unwrap();
}

async fn send_raw(config: &DaemonConfig, bytes: &[u8]) -> ControlResponse {
    let mut stream = UnixStream::connect(&config.socket_path).await.unwrap();
    // The server may answer before consuming everything we send.
    let _ = stream.write_all(bytes).await;
    let _ = stream.shutdown().await;
    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    serde_json::from_slice(&reply).unwrap()
}

fn scan(name: &str, path: &str, schedule: &str) -> ControlRequest {
    ControlRequest::Scan {
        name: name.to_string(),
        path: path.to_string(),
        schedule: schedule.to_string(),
    }
}

#[tokio::test]
async fn lifecycle_over_the_socket() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let running = start(&config).await;
    let client = &running.client;

    assert_eq!(read_pid_file(&config.pid_file), Some(std::process::id()));

    let pong = client.send(&ControlRequest::Ping).await.unwrap();
    assert!(pong.ok);
    assert_eq!(pong.message, "pong");

    let registered = client
        .send(&scan("api", "/srv/api", "every 30m"))
        .await
        .unwrap();
    assert!(registered.ok, "{}", registered.message);
    assert_eq!(registered.message, "Registered api with schedule: every 30m");

    let listed = client.send(&ControlRequest::List).await.unwrap();
    let codebases = listed.codebases.unwrap();
    assert_eq!(codebases.len(), 1);
    assert_eq!(codebases[0].name, "api");
    assert!(codebases[0].next_run.is_some());

    let bad = client
        .send(&scan("web", "/srv/web", "every 0m"))
        .await
        .unwrap();
    assert!(!bad.ok);

    let unknown = client
        .send(&ControlRequest::Remove {
            name: "ghost".to_string(),
        })
        .await
        .unwrap();
    assert!(!unknown.ok);
    assert_eq!(unknown.message, "ghost not found");

    let removed = client
        .send(&ControlRequest::Remove {
            name: "api".to_string(),
        })
        .await
        .unwrap();
    assert!(removed.ok);
    let listed = client.send(&ControlRequest::List).await.unwrap();
    assert!(listed.codebases.unwrap().is_empty());

    stop(running).await;
    assert!(!config.socket_path.exists());
    assert!(!config.pid_file.exists());
}

#[tokio::test]
async fn bad_input_gets_a_failure_response() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let running = start(&config).await;

    let unknown = send_raw(&config, br#"{"cmd":"frobnicate"}"#).await;
    assert!(!unknown.ok);
    assert!(unknown.message.contains("Unknown command"));

    let garbage = send_raw(&config, b"this is not json").await;
    assert!(!garbage.ok);

    let mut oversized = br#"{"cmd":"ping","pad":""#.to_vec();
    oversized.extend(std::iter::repeat(b'x').take(70 * 1024));
    oversized.extend_from_slice(br#""}"#);
    let too_large = send_raw(&config, &oversized).await;
    assert!(!too_large.ok);
    assert!(too_large.message.contains("too large"));

    // The daemon is still serving.
    assert!(running.client.is_running().await);
    stop(running).await;
}

#[tokio::test]
async fn run_once_scans_and_logs_by_name() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let project = dir.path().join("proj");
    std::fs::create_dir(&project).unwrap();
    std::fs::write(project.join("app.py"), "def main():\n    return 0\n").unwrap();

    let running = start(&config).await;
    let client = &running.client;

    let started = client
        .send(&ControlRequest::RunOnce {
            path: project.to_string_lossy().into_owned(),
        })
        .await
        .unwrap();
    assert!(started.ok, "{}", started.message);

    let mut finished = None;
    for _ in 0..100 {
        let jobs = client
            .send(&ControlRequest::Jobs { limit: 10 })
            .await
            .unwrap()
            .jobs
            .unwrap();
        if let Some(job) = jobs.into_iter().find(|j| j.status != JobStatus::Running) {
            finished = Some(job);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let job = finished.expect("scan did not finish");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.codebase, "proj");
    assert_eq!(job.files, 1);
    assert_eq!(job.symbols, 1);
    assert!(project.join("maps").join("app.py.md").is_file());

    let logs = client
        .send(&ControlRequest::Logs {
            job_id: "proj".to_string(),
            limit: 100,
        })
        .await
        .unwrap();
    assert!(logs.ok);
    let lines = logs.logs.unwrap();
    assert!(lines.iter().any(|l| l.message.starts_with("Completed: 1 files")));

    let by_id = client
        .send(&ControlRequest::Logs {
            job_id: job.id.clone(),
            limit: 100,
        })
        .await
        .unwrap();
    assert_eq!(by_id.logs.unwrap().len(), lines.len());

    stop(running).await;
}

#[tokio::test]
async fn registrations_survive_a_restart() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let running = start(&config).await;
    let response = running
        .client
        .send(&scan("api", "/srv/api", "0 9 * * 1-5"))
        .await
        .unwrap();
    assert!(response.ok, "{}", response.message);
    stop(running).await;

    let running = start(&config).await;
    let listed = running.client.send(&ControlRequest::List).await.unwrap();
    let codebases = listed.codebases.unwrap();
    assert_eq!(codebases.len(), 1);
    assert_eq!(codebases[0].schedule, "0 9 * * 1-5");
    assert!(codebases[0].next_run.is_some());
    stop(running).await;
}

#[tokio::test]
async fn second_daemon_leaves_the_live_daemons_jobs_alone() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let project = dir.path().join("proj");
    std::fs::create_dir(&project).unwrap();
    std::fs::write(project.join("app.py"), "def main():\n    return 0\n").unwrap();

    let running = start_with(&config, Arc::new(SlowSummarizer)).await;
    let client = &running.client;
    let started = client
        .send(&ControlRequest::RunOnce {
            path: project.to_string_lossy().into_owned(),
        })
        .await
        .unwrap();
    assert!(started.ok, "{}", started.message);

    let mut in_flight = false;
    for _ in 0..100 {
        let ps = client.send(&ControlRequest::Ps).await.unwrap();
        if !ps.jobs.unwrap_or_default().is_empty() {
            in_flight = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(in_flight, "scan never showed up as running");

    let err = match Daemon::start(config.clone(), Arc::new(EchoSummarizer)).await {
        Ok(_) => panic!("second daemon started on a live socket"),
        Err(e) => e,
    };
    assert!(err.to_string().contains("already listening"));
    assert!(client.is_running().await);
    assert!(config.socket_path.exists());

    let mut finished = None;
    for _ in 0..200 {
        let jobs = client
            .send(&ControlRequest::Jobs { limit: 10 })
            .await
            .unwrap()
            .jobs
            .unwrap();
        if let Some(job) = jobs.into_iter().find(|j| j.status != JobStatus::Running) {
            finished = Some(job);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let job = finished.expect("scan did not finish");
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
    assert_eq!(job.files, 1);
    assert_eq!(job.symbols, 1);

    stop(running).await;
}
