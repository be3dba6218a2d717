//! Control command handlers.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::SecondsFormat;
use codemapper_protocol::defaults::{SCHEDULE_JOB_PREFIX, SHUTDOWN_GRACE_MS};
use codemapper_protocol::{Codebase, CodebaseInfo, ControlRequest, ControlResponse, JobInfo, LogLine};
use codemapper_store::Store;
use tracing::{debug, error, info, warn};

use crate::coordinator::{ScanCoordinator, ScanSummary};
use crate::schedule::{JobCallback, JobFuture, ScheduleError, Scheduler, Trigger};

/// Scheduler id of the trigger that scans `name`.
pub fn trigger_id(name: &str) -> String {
    format!("{SCHEDULE_JOB_PREFIX}{name}")
}

/// Routes decoded control requests to the store, scheduler and coordinator.
pub struct Dispatcher {
    store: Store,
    scheduler: Arc<Scheduler>,
    coordinator: Arc<ScanCoordinator>,
    shutdown: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new(
        store: Store,
        scheduler: Arc<Scheduler>,
        coordinator: Arc<ScanCoordinator>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            store,
            scheduler,
            coordinator,
            shutdown,
        }
    }

    pub async fn handle(&self, request: ControlRequest) -> ControlResponse {
        debug!(cmd = request.command_name(), "Control request");
        match request {
            ControlRequest::Ping => ControlResponse::ok("pong"),
            ControlRequest::Scan {
                name,
                path,
                schedule,
            } => self.handle_scan(&name, &path, &schedule).await,
            ControlRequest::Run { name } => self.handle_run(&name).await,
            ControlRequest::RunOnce { path } => self.handle_run_once(&path),
            ControlRequest::List => self.handle_list().await,
            ControlRequest::Ps => self.handle_ps().await,
            ControlRequest::Jobs { limit } => self.handle_jobs(limit).await,
            ControlRequest::Logs { job_id, limit } => self.handle_logs(&job_id, limit).await,
            ControlRequest::Remove { name } => self.handle_remove(&name).await,
            ControlRequest::Stop => self.handle_stop(),
        }
    }

    /// (Re)install the recurring trigger for a registered codebase.
    pub fn install_trigger(&self, codebase: &Codebase) -> Result<(), ScheduleError> {
        self.scheduler.add_job(
            &trigger_id(&codebase.name),
            &codebase.schedule,
            scan_callback(Arc::clone(&self.coordinator), codebase),
        )
    }

    async fn handle_scan(&self, name: &str, path: &str, schedule: &str) -> ControlResponse {
        if name.is_empty() || path.is_empty() {
            return ControlResponse::failure("Both name and path are required");
        }
        // Reject bad grammar before anything is persisted.
        if let Err(e) = Trigger::parse(schedule) {
            return ControlResponse::failure(e.to_string());
        }

        let codebase = match self.store.add_codebase(name, path, schedule).await {
            Ok(codebase) => codebase,
            Err(e) => return ControlResponse::failure(format!("Failed to register {name}: {e}")),
        };
        if let Err(e) = self.install_trigger(&codebase) {
            return ControlResponse::failure(e.to_string());
        }
        info!(codebase = %name, path = %path, schedule = %schedule, "Codebase registered");
        ControlResponse::ok(format!("Registered {name} with schedule: {schedule}"))
    }

    async fn handle_run(&self, name: &str) -> ControlResponse {
        let codebase = match self.store.get_codebase(name).await {
            Ok(Some(codebase)) => codebase,
            Ok(None) => {
                return ControlResponse::failure(format!(
                    "Codebase {name} not found. Use 'mapper list' to see registered codebases."
                ))
            }
            Err(e) => return ControlResponse::failure(format!("Failed to look up {name}: {e}")),
        };

        let Some(ticket) = self.coordinator.try_begin(name) else {
            return ControlResponse::failure(format!("Scan already running for {name}"));
        };

        let coordinator = Arc::clone(&self.coordinator);
        let root = PathBuf::from(&codebase.path);
        tokio::spawn(async move {
            let summary = coordinator
                .run_with_ticket(ticket, codebase.id, &root)
                .await;
            report(&codebase.name, &summary);
        });
        ControlResponse::ok(format!("Started scan for {name}"))
    }

    fn handle_run_once(&self, path: &str) -> ControlResponse {
        if path.is_empty() {
            return ControlResponse::failure("A path is required");
        }
        let root = PathBuf::from(path);
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());

        let coordinator = Arc::clone(&self.coordinator);
        tokio::spawn(async move {
            match coordinator.run_scan(0, &name, &root).await {
                Some(summary) => report(&name, &summary),
                None => info!(codebase = %name, "One-time scan skipped: already running"),
            }
        });
        ControlResponse::ok(format!("Started one-time scan for {path}"))
    }

    async fn handle_list(&self) -> ControlResponse {
        match self.store.get_codebases().await {
            Ok(codebases) => {
                let infos = codebases
                    .iter()
                    .map(|codebase| {
                        let mut info = CodebaseInfo::from(codebase);
                        info.next_run = self
                            .scheduler
                            .next_run(&trigger_id(&codebase.name))
                            .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, false));
                        info
                    })
                    .collect();
                ControlResponse::ok("").with_codebases(infos)
            }
            Err(e) => ControlResponse::failure(format!("Failed to list codebases: {e}")),
        }
    }

    async fn handle_ps(&self) -> ControlResponse {
        match self.store.get_running_jobs().await {
            Ok(jobs) => ControlResponse::ok("").with_jobs(jobs.iter().map(JobInfo::from).collect()),
            Err(e) => ControlResponse::failure(format!("Failed to list running jobs: {e}")),
        }
    }

    async fn handle_jobs(&self, limit: i64) -> ControlResponse {
        match self.store.get_jobs(limit.max(0)).await {
            Ok(jobs) => ControlResponse::ok("").with_jobs(jobs.iter().map(JobInfo::from).collect()),
            Err(e) => ControlResponse::failure(format!("Failed to list jobs: {e}")),
        }
    }

    /// `target` is a job id, or failing that the name of a codebase whose
    /// latest job is shown.
    async fn handle_logs(&self, target: &str, limit: i64) -> ControlResponse {
        let limit = limit.max(0);
        let mut logs = match self.store.get_logs(target, limit).await {
            Ok(logs) => logs,
            Err(e) => return ControlResponse::failure(format!("Failed to read logs: {e}")),
        };
        if logs.is_empty() {
            match self.store.latest_job_for_codebase(target).await {
                Ok(Some(job)) => match self.store.get_logs(job.id.as_str(), limit).await {
                    Ok(found) => logs = found,
                    Err(e) => return ControlResponse::failure(format!("Failed to read logs: {e}")),
                },
                Ok(None) => {}
                Err(e) => return ControlResponse::failure(format!("Failed to look up {target}: {e}")),
            }
        }
        ControlResponse::ok("").with_logs(logs.iter().map(LogLine::from).collect())
    }

    async fn handle_remove(&self, name: &str) -> ControlResponse {
        self.scheduler.remove_job(&trigger_id(name));
        match self.store.remove_codebase(name).await {
            Ok(true) => {
                info!(codebase = %name, "Codebase removed");
                ControlResponse::ok(format!("Removed {name}"))
            }
            Ok(false) => ControlResponse::failure(format!("{name} not found")),
            Err(e) => ControlResponse::failure(format!("Failed to remove {name}: {e}")),
        }
    }

    /// The flag flips after a grace delay so this response still reaches the caller.
    fn handle_stop(&self) -> ControlResponse {
        let shutdown = Arc::clone(&self.shutdown);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(SHUTDOWN_GRACE_MS)).await;
            shutdown.store(true, Ordering::SeqCst);
        });
        info!("Stop requested");
        ControlResponse::ok("Daemon stopping")
    }
}

fn scan_callback(coordinator: Arc<ScanCoordinator>, codebase: &Codebase) -> JobCallback {
    let id = codebase.id;
    let name = codebase.name.clone();
    let root = PathBuf::from(&codebase.path);
    Arc::new(move || -> JobFuture {
        let coordinator = Arc::clone(&coordinator);
        let name = name.clone();
        let root = root.clone();
        Box::pin(async move {
            match coordinator.run_scan(id, &name, &root).await {
                Some(summary) => report(&name, &summary),
                None => debug!(codebase = %name, "Scheduled scan skipped: already running"),
            }
        })
    })
}

fn report(name: &str, summary: &ScanSummary) {
    match &summary.error {
        None => info!(
            codebase = %name,
            job_id = %summary.job_id,
            files = summary.files_processed,
            symbols = summary.symbols_processed,
            "Scan finished"
        ),
        Some(e) if summary.files_processed > 0 => warn!(
            codebase = %name,
            job_id = %summary.job_id,
            files = summary.files_processed,
            "Scan failed part way: {}", e
        ),
        Some(e) => error!(codebase = %name, job_id = %summary.job_id, "Scan failed: {}", e),
    }
}
