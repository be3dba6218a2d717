//! Control API client used by the CLI.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use codemapper_protocol::defaults::DAEMON_NOT_RUNNING_MESSAGE;
use codemapper_protocol::{ControlRequest, ControlResponse};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

pub struct ControlClient {
    socket_path: PathBuf,
}

impl ControlClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send one request. An unreachable daemon is reported as an
    /// `ok: false` response rather than an error.
    pub async fn send(&self, request: &ControlRequest) -> Result<ControlResponse> {
        let mut stream = match UnixStream::connect(&self.socket_path).await {
            Ok(stream) => stream,
            Err(e) if is_not_running(&e) => {
                return Ok(ControlResponse::failure(DAEMON_NOT_RUNNING_MESSAGE))
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to connect to {}", self.socket_path.display())
                })
            }
        };

        let bytes = serde_json::to_vec(request).context("Failed to serialize request")?;
        stream
            .write_all(&bytes)
            .await
            .context("Failed to send request")?;
        stream
            .shutdown()
            .await
            .context("Failed to finish request")?;

        let mut reply = Vec::new();
        stream
            .read_to_end(&mut reply)
            .await
            .context("Failed to read response")?;
        serde_json::from_slice(&reply).context("Failed to parse response")
    }

    /// True when a daemon answers `ping`.
    pub async fn is_running(&self) -> bool {
        matches!(self.send(&ControlRequest::Ping).await, Ok(response) if response.ok)
    }
}

fn is_not_running(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_socket_reports_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let client = ControlClient::new(dir.path().join("absent.sock"));

        let response = client.send(&ControlRequest::Ping).await.unwrap();
        assert!(!response.ok);
        assert_eq!(response.message, DAEMON_NOT_RUNNING_MESSAGE);
        assert!(!client.is_running().await);
    }
}
