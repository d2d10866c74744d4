//! File capture of the SDK's own tracing output
//!
//! [`DebugLogCapture`] is a `tracing_subscriber` writer: plug it into an fmt
//! layer and, while capture is enabled, records go through a
//! `tracing_appender` non-blocking worker into rolling files under the debug
//! log directory. When the directory grows past its capacity the oldest half
//! of the files is deleted.
//!
//! The eviction check runs on the appender's worker thread, never on the
//! thread that logged. It must not log through `tracing` itself.

use crate::config::{LogRotation, StorageConfig};
use parking_lot::RwLock;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;

const FILE_PREFIX: &str = "debug";
const FILE_SUFFIX: &str = "log";

struct Sink {
    writer: NonBlocking,
    // Dropping the guard flushes and stops the worker
    _guard: WorkerGuard,
}

struct Shared {
    dir: PathBuf,
    capacity_bytes: u64,
    rotation: LogRotation,
    sink: RwLock<Option<Sink>>,
}

#[derive(Clone)]
pub struct DebugLogCapture {
    shared: Arc<Shared>,
}

impl DebugLogCapture {
    pub fn new(dir: impl Into<PathBuf>, capacity_bytes: u64, rotation: LogRotation) -> Self {
        Self {
            shared: Arc::new(Shared {
                dir: dir.into(),
                capacity_bytes,
                rotation,
                sink: RwLock::new(None),
            }),
        }
    }

    pub fn from_config(storage: &StorageConfig) -> Self {
        Self::new(
            storage.debug_log_dir(),
            storage.debug_log_capacity_bytes,
            storage.debug_log_rotation,
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.sink.read().is_some()
    }

    /// Returns false if the directory or the appender could not be set up
    pub fn enable(&self) -> bool {
        let evicted = {
            let mut sink = self.shared.sink.write();
            if sink.is_some() {
                return true;
            }
            match self.shared.open() {
                Ok((opened, evicted)) => {
                    *sink = Some(opened);
                    evicted
                }
                Err(e) => {
                    drop(sink);
                    warn!("[LOG] Debug log capture unavailable: {}", e);
                    return false;
                }
            }
        };

        info!(
            "[LOG] Debug log capture enabled in {}",
            self.shared.dir.display()
        );
        if evicted > 0 {
            warn!("[LOG] Evicted {} old debug log file(s)", evicted);
        }
        true
    }

    /// Returns whether capture was on
    pub fn disable(&self) -> bool {
        // Logged first so the message still lands in the file
        if self.is_enabled() {
            info!("[LOG] Debug log capture disabled");
        }
        self.close()
    }

    /// Delete every captured file. Returns false if any could not be removed.
    pub fn purge(&self) -> bool {
        let was_enabled = self.close();

        let removed = match log_files(&self.shared.dir) {
            Ok(files) => files
                .into_iter()
                .map(|(path, _)| fs::remove_file(path).is_ok())
                .fold(true, |all, removed| all && removed),
            Err(e) => e.kind() == io::ErrorKind::NotFound,
        };

        if was_enabled {
            removed && self.enable()
        } else {
            removed
        }
    }

    /// Bytes currently held in captured files
    pub fn total_bytes(&self) -> u64 {
        log_files(&self.shared.dir)
            .map(|files| files.iter().map(|(_, len)| len).sum())
            .unwrap_or(0)
    }

    fn close(&self) -> bool {
        let sink = self.shared.sink.write().take();
        // Flushes outside the lock
        sink.is_some()
    }
}

impl Shared {
    fn open(&self) -> io::Result<(Sink, usize)> {
        fs::create_dir_all(&self.dir)?;
        let evicted = evict_oldest_half(&self.dir, self.capacity_bytes)?;

        let appender = RollingFileAppender::builder()
            .rotation(rotation(self.rotation))
            .filename_prefix(FILE_PREFIX)
            .filename_suffix(FILE_SUFFIX)
            .build(&self.dir)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        let (writer, guard) = tracing_appender::non_blocking(EvictingAppender {
            appender,
            dir: self.dir.clone(),
            capacity_bytes: self.capacity_bytes,
            check_every: (self.capacity_bytes / 16).max(1),
            since_check: 0,
        });

        Ok((
            Sink {
                writer,
                _guard: guard,
            },
            evicted,
        ))
    }
}

fn rotation(rotation: LogRotation) -> Rotation {
    match rotation {
        LogRotation::Minutely => Rotation::MINUTELY,
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Never => Rotation::NEVER,
    }
}

/// Rolling appender that enforces the directory ceiling as it writes.
/// Lives on the non-blocking worker thread.
struct EvictingAppender {
    appender: RollingFileAppender,
    dir: PathBuf,
    capacity_bytes: u64,
    check_every: u64,
    since_check: u64,
}

impl Write for EvictingAppender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.appender.write(buf)?;
        self.since_check += written as u64;
        if self.since_check >= self.check_every {
            self.since_check = 0;
            self.appender.flush()?;
            let _ = evict_oldest_half(&self.dir, self.capacity_bytes);
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.appender.flush()
    }
}

/// Remove the oldest half of the files once the total exceeds `capacity_bytes`.
/// The newest file is the one being written and is never removed.
fn evict_oldest_half(dir: &Path, capacity_bytes: u64) -> io::Result<usize> {
    let files = log_files(dir)?;
    let total: u64 = files.iter().map(|(_, len)| len).sum();
    if total <= capacity_bytes {
        return Ok(0);
    }

    let victims = (files.len() / 2).max(1).min(files.len().saturating_sub(1));
    Ok(files
        .iter()
        .take(victims)
        .filter(|(path, _)| fs::remove_file(path).is_ok())
        .count())
}

/// Captured files, oldest first, with their sizes
fn log_files(dir: &Path) -> io::Result<Vec<(PathBuf, u64)>> {
    let prefix = format!("{}.", FILE_PREFIX);
    let suffix = format!(".{}", FILE_SUFFIX);

    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with(&prefix) && name.ends_with(&suffix) {
            files.push((entry.path(), entry.metadata()?.len()));
        }
    }
    // Date-stamped names sort chronologically; the undated `debug.log`
    // of `Never` rotation sorts after them
    files.sort();
    Ok(files)
}

/// Discards records while capture is off
pub struct CaptureWriter(Option<NonBlocking>);

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.0.as_mut() {
            Some(writer) => writer.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.0.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for DebugLogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter(
            self.shared
                .sink
                .read()
                .as_ref()
                .map(|sink| sink.writer.clone()),
        )
    }
}
