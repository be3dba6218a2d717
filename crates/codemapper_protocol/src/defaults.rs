//! Canonical default values shared by the daemon and the CLI.

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/codemapper.sock";
pub const DEFAULT_JOBS_LIMIT: i64 = 20;
pub const DEFAULT_LOGS_LIMIT: i64 = 100;
/// Upper bound on a single control request body.
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;
pub const DAEMON_NOT_RUNNING_MESSAGE: &str = "Daemon not running. Start with: mapper serve";
pub const CACHE_FILE_NAME: &str = "mapper.lock";
pub const MAPS_DIR: &str = "maps";
pub const SCHEDULE_JOB_PREFIX: &str = "scan_";
pub const SHUTDOWN_GRACE_MS: u64 = 500;
pub const DEFAULT_SUMMARIZER_URL: &str = "http://localhost:11434";
pub const DEFAULT_SUMMARIZER_MODEL: &str = "qwen2.5-coder:14b";
