//! Runs a job on its own thread while the status server watches it.

pub mod client;
pub mod protocol;
pub mod render;
pub mod server;

use crate::config;
use crate::state::{DurableLog, Identity, LogLevel, TaskSnapshot, TaskState};
use crate::worker::SourceError;
use serde::Serialize;
use server::{ServerOptions, StatusServer};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{error, warn};

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("task tracker is already running")]
    AlreadyRunning,

    #[error("failed to start task tracker on {addr}:{port}: {source}")]
    Bind {
        addr: String,
        port: u16,
        source: std::io::Error,
    },

    #[error("job thread panicked")]
    JobPanicked,

    #[error(transparent)]
    Source(#[from] SourceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Complete,
    Aborted,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub snapshot: TaskSnapshot,
}

impl RunReport {
    pub fn aborted(&self) -> bool {
        self.outcome == RunOutcome::Aborted
    }
}

pub struct TaskTracker {
    cfg: config::Tracker,
    log_dir: Option<PathBuf>,
    active: AtomicBool,
}

struct ClearOnDrop<'a>(&'a AtomicBool);

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct SetOnDrop<'a>(&'a AtomicBool);

impl Drop for SetOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl TaskTracker {
    /// `log_dir` receives the per-process durable task log; `None` keeps
    /// the task log in memory only.
    pub fn new(cfg: config::Tracker, log_dir: Option<PathBuf>) -> Self {
        Self {
            cfg,
            log_dir,
            active: AtomicBool::new(false),
        }
    }

    /// Bind the control interface, run `job` on its own thread, and serve
    /// status until the job returns. The server is joined after the job so
    /// it stays reachable to the very end.
    pub fn run<F>(&self, job: F) -> Result<RunReport, TrackerError>
    where
        F: FnOnce(&TaskState) -> Result<(), SourceError> + Send,
    {
        if self.active.swap(true, Ordering::SeqCst) {
            error!("task tracker is already running");
            return Err(TrackerError::AlreadyRunning);
        }
        let _active = ClearOnDrop(&self.active);

        let server = StatusServer::bind(
            &self.cfg.addr,
            self.cfg.port,
            ServerOptions::from_config(&self.cfg),
        )
        .map_err(|source| {
            error!(
                "failed to start task tracker, network error: {source} ({}:{})",
                self.cfg.addr, self.cfg.port
            );
            TrackerError::Bind {
                addr: self.cfg.addr.clone(),
                port: self.cfg.port,
                source,
            }
        })?;

        let identity = Identity::current(server.local_addr().ok());
        let durable = self.log_dir.as_ref().and_then(|dir| {
            DurableLog::create(dir, identity.pid)
                .map_err(|e| warn!("task log file unavailable in {}: {e}", dir.display()))
                .ok()
        });
        let state = TaskState::new(identity, self.cfg.log_capacity, durable);
        state.log(
            LogLevel::Info,
            format!(
                "Starting TaskTracker PID={}, running command {}",
                state.identity().pid,
                state.identity().cmdline
            ),
        );

        let job_done = AtomicBool::new(false);
        let joined = thread::scope(|scope| {
            let job_thread = scope.spawn(|| {
                let _done = SetOnDrop(&job_done);
                job(&state)
            });
            let ctl_thread = scope.spawn(|| server.serve(&state, &job_done));

            let joined = job_thread.join();
            if ctl_thread.join().is_err() {
                error!("control interface thread panicked");
            }
            joined
        });
        drop(server);

        let outcome = if state.stop_requested() {
            state.log(LogLevel::Info, "Mission aborted.");
            RunOutcome::Aborted
        } else {
            state.log(LogLevel::Info, "Mission complete.");
            RunOutcome::Complete
        };

        match joined {
            Err(_) => {
                state.log(LogLevel::Fatal, "job thread panicked");
                Err(TrackerError::JobPanicked)
            }
            Ok(Err(e)) => {
                state.log(LogLevel::Fatal, format!("job failed: {e}"));
                Err(e.into())
            }
            Ok(Ok(())) => Ok(RunReport {
                outcome,
                snapshot: state.snapshot(),
            }),
        }
    }
}
