//! Daemon process: store, scheduler, coordinator and the control socket.
//!
//! Startup order matters: the socket is claimed before orphaned jobs are
//! closed, and orphaned jobs are closed before any trigger can fire.

mod dispatch;
mod server;

pub use dispatch::{trigger_id, Dispatcher};
pub use server::{handle_connection, read_request, ControlServer};

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use codemapper_store::Store;
use tracing::{info, warn};

use crate::config::DaemonConfig;
use crate::coordinator::ScanCoordinator;
use crate::schedule::Scheduler;
use crate::summarize::Summarizer;

/// Error recorded on jobs left `running` by a previous daemon process.
pub const ORPHANED_JOB_REASON: &str = "daemon restarted";

pub struct Daemon {
    config: DaemonConfig,
    store: Store,
    scheduler: Arc<Scheduler>,
    dispatcher: Arc<Dispatcher>,
    server: ControlServer,
    shutdown: Arc<AtomicBool>,
}

impl Daemon {
    /// Open the store and claim the control socket, then close out orphaned
    /// jobs, start the scheduler clock and reinstall a trigger for every
    /// registered codebase. Fails without touching any job row if another
    /// daemon is listening.
    pub async fn start(config: DaemonConfig, summarizer: Arc<dyn Summarizer>) -> Result<Self> {
        let store = Store::open(&config.database_path)
            .await
            .with_context(|| format!("Failed to open {}", config.database_path.display()))?;
        store.init().await.context("Failed to initialize schema")?;

        let coordinator = Arc::new(
            ScanCoordinator::new(store.clone(), summarizer)
                .with_extensions(config.extensions.clone()),
        );
        let scheduler = Arc::new(Scheduler::new(Duration::from_millis(
            config.scheduler_tick_ms,
        )));
        let shutdown = Arc::new(AtomicBool::new(false));
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            Arc::clone(&scheduler),
            coordinator,
            Arc::clone(&shutdown),
        ));

        // Jobs marked running belong to whoever owns the socket.
        let server = ControlServer::bind(&config.socket_path, Arc::clone(&dispatcher))?;
        if let Err(e) = recover(&store, &scheduler, &dispatcher).await {
            scheduler.stop();
            server.close();
            return Err(e);
        }

        Ok(Self {
            config,
            store,
            scheduler,
            dispatcher,
            server,
            shutdown,
        })
    }

    /// Setting this flag ends [`Daemon::serve`] within one poll interval.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Write the pid file and serve until shutdown. The socket and pid file
    /// are removed on the way out.
    pub async fn serve(self) -> Result<()> {
        if let Err(e) = write_pid_file(&self.config.pid_file) {
            self.scheduler.stop();
            self.server.close();
            return Err(e);
        }
        info!(
            socket = %self.config.socket_path.display(),
            pid = std::process::id(),
            "Daemon listening"
        );

        self.server.serve(Arc::clone(&self.shutdown)).await;

        self.scheduler.stop();
        self.server.close();
        remove_pid_file(&self.config.pid_file);
        self.store.close().await;
        info!("Daemon stopped");
        Ok(())
    }
}

async fn recover(store: &Store, scheduler: &Scheduler, dispatcher: &Dispatcher) -> Result<()> {
    let orphaned = store.fail_orphaned_jobs(ORPHANED_JOB_REASON).await?;
    if orphaned > 0 {
        warn!(count = orphaned, "Marked jobs from a previous run as failed");
    }

    scheduler.start();
    for codebase in store.get_codebases().await? {
        if let Err(e) = dispatcher.install_trigger(&codebase) {
            warn!(codebase = %codebase.name, "Skipping trigger: {}", e);
        }
    }
    Ok(())
}

/// SIGINT and SIGTERM raise `flag`, same as a `stop` request.
pub fn install_signal_handlers(flag: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Failed to install signal handlers")?;
    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!("Received signal {}, shutting down...", sig);
            flag.store(true, Ordering::SeqCst);
        }
    });
    Ok(())
}

fn write_pid_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, std::process::id().to_string())
        .with_context(|| format!("Failed to write pid file {}", path.display()))
}

fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), "Failed to remove pid file: {}", e);
        }
    }
}

/// Pid recorded by a running daemon, if the file exists and parses.
pub fn read_pid_file(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}
