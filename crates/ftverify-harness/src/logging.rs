//! Structured logging for harness binaries.
//!
//! Two outputs: compact ANSI lines on the terminal and JSON lines in
//! `<run_dir>/harness.log.jsonl`. Events carry structured fields
//! (`run_index`, `check_id`, `digest`, ...) for post-hoc `jq` queries.
//! `RUST_LOG` overrides the default filter.
//!
//! The harness log is diagnostic only. Evidence lives in the evidence log
//! and never depends on what is written here.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const LOG_FILE_NAME: &str = "harness.log.jsonl";

/// Keeps the log-file path; the file itself is owned by the subscriber.
#[derive(Debug)]
pub struct LogGuard {
    pub log_path: PathBuf,
}

/// `MakeWriter` over a shared file; one lock per event.
#[derive(Clone)]
struct SharedFileWriter {
    file: Arc<Mutex<File>>,
}

impl SharedFileWriter {
    fn new(file: File) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedFileWriter {
    type Writer = SharedFileGuard<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        SharedFileGuard {
            guard: self.file.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

struct SharedFileGuard<'a> {
    guard: MutexGuard<'a, File>,
}

impl io::Write for SharedFileGuard<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut *self.guard, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut *self.guard)
    }
}

/// Install the global subscriber.
///
/// `verbose` lowers the default filter from `info` to `debug`.
///
/// # Errors
///
/// I/O errors creating `run_dir` or the log file, or
/// [`io::ErrorKind::AlreadyExists`] if a global subscriber is already set.
pub fn init_logging(run_dir: &Path, verbose: bool) -> io::Result<LogGuard> {
    std::fs::create_dir_all(run_dir)?;

    let default_filter = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let log_path = run_dir.join(LOG_FILE_NAME);
    let file_writer = SharedFileWriter::new(File::create(&log_path)?);

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_target(true);

    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_ansi(true)
        .with_target(false)
        .with_writer(io::stderr)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(terminal_layer)
        .with(json_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e.to_string()))?;

    Ok(LogGuard { log_path })
}

/// Terminal-only logging for tests. Safe to call repeatedly.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_test_writer()
                .compact(),
        )
        .try_init();
}

/// Run `f`, logging `phase`, elapsed time and success.
pub fn log_timed_phase<T, E: std::fmt::Display>(
    phase: &str,
    f: impl FnOnce() -> Result<T, E>,
) -> Result<T, E> {
    let start = std::time::Instant::now();
    let result = f();
    let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    match &result {
        Ok(_) => tracing::info!(phase, elapsed_ms, success = true, "phase complete"),
        Err(e) => tracing::warn!(phase, elapsed_ms, success = false, error = %e, "phase failed"),
    }
    result
}
