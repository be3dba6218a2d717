//! Tracing setup for the `mapper` binary.
//!
//! Everything goes to a size-capped log file under `~/.codemapper/logs`
//! and to stderr. `RUST_LOG` overrides the default filter.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "codemapper=info,codemapper_store=info";
const KEEP_FILES: usize = 5;
const MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Mirror debug output to stderr regardless of `RUST_LOG`.
    pub verbose: bool,
    /// Overrides the default logs directory.
    pub log_dir: Option<PathBuf>,
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: LogConfig<'_>) -> Result<PathBuf> {
    let dir = match config.log_dir {
        Some(dir) => dir,
        None => codemapper_protocol::paths::default_logs_dir(),
    };
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create logs directory: {}", dir.display()))?;

    let writer = RotatingWriter::open(&dir, config.app_name, KEEP_FILES, MAX_FILE_BYTES)
        .with_context(|| format!("Failed to open log file for {}", config.app_name))?;
    let log_path = writer.path();

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        EnvFilter::new("codemapper=debug,codemapper_store=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Tracing subscriber already installed")?;

    Ok(log_path)
}

/// Append-only file that shifts `name.log` to `name.log.1` (and so on) once
/// it would grow past `max_bytes`. At most `keep` files exist at once.
struct SizeRotatedFile {
    dir: PathBuf,
    stem: String,
    keep: usize,
    max_bytes: u64,
    file: Option<File>,
    written: u64,
}

impl SizeRotatedFile {
    fn open(dir: &Path, name: &str, keep: usize, max_bytes: u64) -> io::Result<Self> {
        let mut this = Self {
            dir: dir.to_path_buf(),
            stem: file_stem(name),
            keep: keep.max(1),
            max_bytes,
            file: None,
            written: 0,
        };
        this.reopen()?;
        if this.written > this.max_bytes {
            this.roll()?;
        }
        Ok(this)
    }

    fn active(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.stem))
    }

    fn numbered(&self, n: usize) -> PathBuf {
        self.dir.join(format!("{}.log.{}", self.stem, n))
    }

    fn reopen(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.active())?;
        self.written = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    fn roll(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }
        if self.keep > 1 {
            let last = self.numbered(self.keep - 1);
            if last.exists() {
                fs::remove_file(&last)?;
            }
            for n in (1..self.keep - 1).rev() {
                let from = self.numbered(n);
                if from.exists() {
                    fs::rename(&from, self.numbered(n + 1))?;
                }
            }
            let active = self.active();
            if active.exists() {
                fs::rename(&active, self.numbered(1))?;
            }
        } else {
            let _ = fs::remove_file(self.active());
        }
        self.reopen()
    }
}

impl Write for SizeRotatedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.roll()?;
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file unavailable"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// `MakeWriter` handle shared by every event.
#[derive(Clone)]
struct RotatingWriter {
    inner: Arc<Mutex<SizeRotatedFile>>,
}

impl RotatingWriter {
    fn open(dir: &Path, name: &str, keep: usize, max_bytes: u64) -> io::Result<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(SizeRotatedFile::open(dir, name, keep, max_bytes)?)),
        })
    }

    fn path(&self) -> PathBuf {
        match self.inner.lock() {
            Ok(file) => file.active(),
            Err(poisoned) => poisoned.into_inner().active(),
        }
    }

    fn with_file<T>(&self, f: impl FnOnce(&mut SizeRotatedFile) -> io::Result<T>) -> io::Result<T> {
        let mut file = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        f(&mut file)
    }
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_file(|file| file.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_file(|file| file.flush())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RotatingWriter {
    type Writer = RotatingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
