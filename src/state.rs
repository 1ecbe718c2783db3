//! Shared task state: the one object both the job thread and the control
//! plane touch.
//!
//! Counters, the progress gauge, the current-unit label and the recent-log
//! ring sit behind a single mutex so a reader never observes a half-applied
//! update. The stop flag is an independent atomic: it carries no cross-field
//! invariant and only ever moves from clear to set.

use crate::util::now_stamp;
use serde::Serialize;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{error, info, warn};

pub const DEFAULT_LOG_CAPACITY: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        }
    }
}

/// Fields fixed at job start.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub pid: u32,
    pub cmdline: String,
    pub started_at: String,
    pub control_addr: Option<SocketAddr>,
}

impl Identity {
    pub fn current(control_addr: Option<SocketAddr>) -> Self {
        Self {
            pid: std::process::id(),
            cmdline: crate::util::command_line(),
            started_at: now_stamp(),
            control_addr,
        }
    }
}

/// A batch of counter increments plus an optional new current-unit label,
/// applied as one step by [`TaskState::update_counters`].
#[derive(Debug, Clone, Default)]
pub struct CounterDelta {
    pub units: u64,
    pub records: u64,
    pub bytes: u64,
    pub current_unit: Option<String>,
}

impl CounterDelta {
    pub fn units(n: u64) -> Self {
        Self {
            units: n,
            ..Default::default()
        }
    }

    pub fn records(n: u64) -> Self {
        Self {
            records: n,
            ..Default::default()
        }
    }

    pub fn bytes(n: u64) -> Self {
        Self {
            bytes: n,
            ..Default::default()
        }
    }

    pub fn current(unit: impl Into<String>) -> Self {
        Self {
            current_unit: Some(unit.into()),
            ..Default::default()
        }
    }
}

/// Append-only per-process log file. Every line is flushed as it is written.
#[derive(Debug)]
pub struct DurableLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl DurableLog {
    pub fn file_name(pid: u32) -> String {
        format!("import-tracker.{pid}.log")
    }

    pub fn create(dir: &Path, pid: u32) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(Self::file_name(pid));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(file, "{line}")?;
        file.flush()
    }
}

#[derive(Debug)]
struct Inner {
    units_processed: u64,
    records_processed: u64,
    bytes_processed: u64,
    progress_value: u64,
    progress_max: u64,
    current_unit: String,
    updated_at: String,
    recent_log: VecDeque<String>,
}

/// Consistent copy of every field, taken under the state lock.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub identity: Identity,
    pub updated_at: String,
    pub units_processed: u64,
    pub records_processed: u64,
    pub bytes_processed: u64,
    pub current_unit: String,
    pub progress_value: u64,
    pub progress_max: u64,
    pub stop_requested: bool,
    pub recent_log: Vec<String>,
    pub log_path: Option<PathBuf>,
}

#[derive(Debug)]
pub struct TaskState {
    identity: Identity,
    capacity: usize,
    inner: Mutex<Inner>,
    stop: AtomicBool,
    durable: Option<DurableLog>,
}

impl TaskState {
    pub fn new(identity: Identity, capacity: usize, durable: Option<DurableLog>) -> Self {
        let updated_at = identity.started_at.clone();
        Self {
            identity,
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                units_processed: 0,
                records_processed: 0,
                bytes_processed: 0,
                progress_value: 0,
                progress_max: 100,
                current_unit: String::new(),
                updated_at,
                recent_log: VecDeque::with_capacity(capacity.max(1)),
            }),
            stop: AtomicBool::new(false),
            durable,
        }
    }

    /// State with the default ring size and no durable sink.
    pub fn detached() -> Self {
        Self::new(Identity::current(None), DEFAULT_LOG_CAPACITY, None)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.durable.as_ref().map(DurableLog::path)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn update_counters(&self, delta: CounterDelta) {
        let mut inner = self.lock();
        inner.units_processed += delta.units;
        inner.records_processed += delta.records;
        inner.bytes_processed += delta.bytes;
        if let Some(unit) = delta.current_unit {
            inner.current_unit = unit;
        }
        inner.updated_at = now_stamp();
    }

    pub fn update_progress(&self, value: u64, max: Option<u64>) {
        let mut inner = self.lock();
        inner.progress_value = value;
        if let Some(max) = max {
            inner.progress_max = max;
        }
        inner.updated_at = now_stamp();
    }

    /// Stamp `msg`, mirror it to `tracing`, and append it to the task log.
    pub fn log(&self, level: LogLevel, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        match level {
            LogLevel::Info => info!(target: "task", "{msg}"),
            LogLevel::Warning => warn!(target: "task", "{msg}"),
            LogLevel::Error | LogLevel::Fatal => {
                error!(target: "task", "[{}] {msg}", level.label())
            }
        }
        self.append_log(format!("{}  [{}] {}", now_stamp(), level.label(), msg));
    }

    /// Push a preformatted line into the ring and write it through to the
    /// durable sink. Sink failures are dropped.
    pub fn append_log(&self, line: String) {
        if let Some(durable) = &self.durable {
            let _ = durable.write_line(&line);
        }
        let mut inner = self.lock();
        inner.recent_log.push_back(line);
        while inner.recent_log.len() > self.capacity {
            inner.recent_log.pop_front();
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let inner = self.lock();
        TaskSnapshot {
            identity: self.identity.clone(),
            updated_at: inner.updated_at.clone(),
            units_processed: inner.units_processed,
            records_processed: inner.records_processed,
            bytes_processed: inner.bytes_processed,
            current_unit: inner.current_unit.clone(),
            progress_value: inner.progress_value,
            progress_max: inner.progress_max,
            stop_requested: self.stop_requested(),
            recent_log: inner.recent_log.iter().cloned().collect(),
            log_path: self.log_path().map(Path::to_path_buf),
        }
    }

    /// Returns true only for the call that actually flipped the flag.
    pub fn request_stop(&self) -> bool {
        !self.stop.swap(true, Ordering::SeqCst)
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}
