//! CodeMapper protocol types
//!
//! Data model shared by the store, the daemon and the CLI, plus the JSON
//! control envelope spoken over the daemon's Unix socket.
//!
//! # Control channel
//!
//! One request and one response per connection:
//! - Request: JSON object `{"cmd": "<name>", ...arguments}`
//! - Response: JSON object `{"ok": bool, "message": string, ...payload}`

pub mod control;
pub mod defaults;
pub mod paths;
pub mod types;

pub use control::{
    CodebaseInfo, ControlRequest, ControlResponse, DecodeError, JobInfo, LogLine, KNOWN_COMMANDS,
};
pub use types::{timestamp_now, Codebase, Job, JobId, JobStatus, LogEntry, LogLevel};
