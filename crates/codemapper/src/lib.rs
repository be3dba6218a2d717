//! CodeMapper: a background daemon that keeps per-file summaries of
//! registered codebases up to date.
//!
//! - [`schedule`]: interval and cron triggers, fired by a single clock task
//! - [`coordinator`]: single-flight scans with incremental change detection
//! - [`daemon`]: Unix-socket control server and process lifecycle
//! - [`client`]: the other end of the control socket, used by the CLI

pub mod analysis;
pub mod cache;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod daemon;
pub mod queue;
pub mod schedule;
pub mod summarize;

pub use cache::IncrementalCache;
pub use client::ControlClient;
pub use config::DaemonConfig;
pub use coordinator::{ScanCoordinator, ScanError, ScanSummary};
pub use daemon::Daemon;
pub use queue::BoundedWorkQueue;
pub use schedule::Scheduler;
