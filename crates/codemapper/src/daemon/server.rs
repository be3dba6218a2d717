//! Unix-socket control server: one JSON request and one JSON response per
//! connection.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use codemapper_protocol::defaults::MAX_REQUEST_BYTES;
use codemapper_protocol::{ControlRequest, ControlResponse, DecodeError};
use serde::de::IgnoredAny;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use super::Dispatcher;

/// How often the accept loop checks the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(500);

pub struct ControlServer {
    listener: UnixListener,
    socket_path: PathBuf,
    dispatcher: Arc<Dispatcher>,
}

impl ControlServer {
    /// Bind `socket_path`, replacing a stale socket file. Fails if another
    /// daemon still answers on it.
    pub fn bind(socket_path: &Path, dispatcher: Arc<Dispatcher>) -> Result<Self> {
        if socket_path.exists() {
            if std::os::unix::net::UnixStream::connect(socket_path).is_ok() {
                bail!(
                    "Another daemon is already listening on {}",
                    socket_path.display()
                );
            }
            std::fs::remove_file(socket_path).with_context(|| {
                format!("Failed to remove stale socket: {}", socket_path.display())
            })?;
        }
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("Failed to bind {}", socket_path.display()))?;
        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
            dispatcher,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until `shutdown` is observed. Each connection runs
    /// on its own task; scans already started keep running.
    pub async fn serve(&self, shutdown: Arc<AtomicBool>) {
        let mut poll = tokio::time::interval(SHUTDOWN_POLL);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let dispatcher = Arc::clone(&self.dispatcher);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, &dispatcher).await {
                                warn!("Control connection failed: {}", e);
                            }
                        });
                    }
                    Err(e) => warn!("Failed to accept control connection: {}", e),
                },
                _ = poll.tick() => {
                    if shutdown.load(Ordering::SeqCst) {
                        info!("Shutdown flag set, closing control socket");
                        break;
                    }
                }
            }
        }
    }

    /// Remove the socket file.
    pub fn close(self) {
        drop(self.listener);
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.socket_path.display(), "Failed to remove socket: {}", e);
            }
        }
    }
}

/// Serve a single exchange on `stream`.
pub async fn handle_connection(mut stream: UnixStream, dispatcher: &Dispatcher) -> io::Result<()> {
    let response = match read_request(&mut stream).await? {
        Ok(request) => dispatcher.handle(request).await,
        Err(e) => {
            debug!("Rejected control request: {}", e);
            ControlResponse::failure(e.to_string())
        }
    };
    let bytes = serde_json::to_vec(&response)?;
    stream.write_all(&bytes).await?;
    stream.shutdown().await
}

/// Read until a complete JSON value has arrived or the peer half-closes.
/// Transport errors are the outer `Err`; bad or oversized input is the inner one.
pub async fn read_request(
    stream: &mut UnixStream,
) -> io::Result<Result<ControlRequest, DecodeError>> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_REQUEST_BYTES {
            return Ok(Err(DecodeError::TooLarge {
                limit: MAX_REQUEST_BYTES,
            }));
        }
        match serde_json::from_slice::<IgnoredAny>(&buf) {
            Ok(_) => break,
            Err(e) if e.is_eof() => continue,
            Err(_) => break,
        }
    }
    Ok(ControlRequest::decode(&buf))
}
