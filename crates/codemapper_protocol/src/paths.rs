use std::path::{Path, PathBuf};
use std::sync::Once;

static CREATE_DIR_WARNED: Once = Once::new();

/// Resolve the CodeMapper home directory.
///
/// Priority:
/// 1) CODEMAPPER_HOME
/// 2) HOME/USERPROFILE
/// 3) ./.codemapper
pub fn codemapper_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("CODEMAPPER_HOME") {
        return PathBuf::from(override_path);
    }
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        return PathBuf::from(home).join(".codemapper");
    }
    PathBuf::from(".").join(".codemapper")
}

fn ensure_home_dir(home: &Path) {
    if let Err(err) = std::fs::create_dir_all(home) {
        CREATE_DIR_WARNED.call_once(|| {
            eprintln!(
                "Warning: failed to create CodeMapper home directory {}: {}. Set CODEMAPPER_HOME.",
                home.display(),
                err
            );
        });
    }
}

/// Default database path: ~/.codemapper/mapper.db
pub fn default_database_path() -> PathBuf {
    let home = codemapper_home();
    ensure_home_dir(&home);
    home.join("mapper.db")
}

/// Default pid file: ~/.codemapper/daemon.pid
pub fn default_pid_file() -> PathBuf {
    let home = codemapper_home();
    ensure_home_dir(&home);
    home.join("daemon.pid")
}

/// Default logs directory: ~/.codemapper/logs
pub fn default_logs_dir() -> PathBuf {
    let home = codemapper_home();
    ensure_home_dir(&home);
    home.join("logs")
}

/// Config file location: ~/.codemapper/config.toml (not created)
pub fn default_config_path() -> PathBuf {
    codemapper_home().join("config.toml")
}
