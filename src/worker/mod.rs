//! Resumable import over a file or a flat directory of units.
//!
//! A unit is a record file or one entry of a container. Units found in the
//! ignore set are skipped before they are opened. A unit that completes
//! without a stop request is appended to the checkpoint log; a unit cut
//! short by a stop, or that fails, is not, so the next run picks it up
//! again. The stop flag is polled every `check_step` records and again
//! before each unit.

pub mod checkpoint;
pub mod error;
pub mod sink;
pub mod source;

pub use checkpoint::{CheckpointLog, IgnoreSet};
pub use error::{ItemError, SourceError, UnitError};
pub use sink::{DryRunSink, JsonlSink, RecordSink};
pub use source::{Container, ContainerFormat, RecordLayout};

use crate::config;
use crate::state::{CounterDelta, LogLevel, TaskState};
use source::{decode_records, extension_of, Items};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub check_step: u64,
    pub entry_separator: String,
    pub entry_prefix: String,
    pub entry_suffix: String,
    pub record_extensions: Vec<String>,
    pub lines_extensions: Vec<String>,
}

impl WorkerOptions {
    pub fn from_config(cfg: &config::Worker) -> Self {
        let lower = |exts: &[String]| {
            exts.iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect()
        };
        Self {
            check_step: cfg.check_step.max(1),
            entry_separator: cfg.entry_separator.clone(),
            entry_prefix: cfg.entry_prefix.clone(),
            entry_suffix: cfg.entry_suffix.clone(),
            record_extensions: lower(&cfg.record_extensions),
            lines_extensions: lower(&cfg.lines_extensions),
        }
    }
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self::from_config(&config::Worker::default())
    }
}

/// What happened to one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    /// Every record handled; checkpointed.
    Finished,
    /// A stop request cut the unit short; not checkpointed.
    Unfinished,
    /// Already in the ignore set; never opened.
    Ignored,
    /// Unit-level failure, logged; not checkpointed.
    Failed,
    /// Not a record file or known container.
    Unrecognized,
}

enum UnitKind {
    Records(RecordLayout),
    Container(usize),
}

pub struct CheckpointedWorker<'a, S: RecordSink> {
    state: &'a TaskState,
    ignores: &'a IgnoreSet,
    checkpoint: CheckpointLog,
    sink: S,
    containers: Vec<Box<dyn ContainerFormat>>,
    opts: WorkerOptions,
}

impl<'a, S: RecordSink> CheckpointedWorker<'a, S> {
    pub fn new(
        state: &'a TaskState,
        ignores: &'a IgnoreSet,
        checkpoint: CheckpointLog,
        sink: S,
        opts: WorkerOptions,
    ) -> Self {
        Self {
            state,
            ignores,
            checkpoint,
            sink,
            containers: Vec::new(),
            opts,
        }
    }

    pub fn with_container(mut self, format: Box<dyn ContainerFormat>) -> Self {
        self.containers.push(format);
        self
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    fn log(&self, level: LogLevel, msg: impl AsRef<str>) {
        self.state.log(level, msg);
    }

    fn stop_flag_is_set(&self) -> bool {
        self.state.stop_requested()
    }

    /// Import a single unit or every file of a directory.
    pub fn import_source(&mut self, path: &Path) -> Result<(), SourceError> {
        if path.is_dir() {
            self.import_directory(path)
        } else if path.exists() {
            self.import_file(path);
            Ok(())
        } else {
            self.log(
                LogLevel::Fatal,
                format!("Source does not exist: {}", path.display()),
            );
            Err(SourceError::Missing(path.to_path_buf()))
        }
    }

    /// Regular files directly under `dir`, in sorted order. Subdirectories
    /// are not descended into.
    pub fn import_directory(&mut self, dir: &Path) -> Result<(), SourceError> {
        self.log(
            LogLevel::Info,
            format!("Processing directory: {}", dir.display()),
        );
        let read_dir_err = |source: std::io::Error| SourceError::ReadDir {
            path: dir.to_path_buf(),
            source,
        };
        let mut files = Vec::new();
        let listing = std::fs::read_dir(dir).map_err(|e| {
            self.log(
                LogLevel::Fatal,
                format!("Directory: {}, Exception: {e}", dir.display()),
            );
            read_dir_err(e)
        })?;
        for entry in listing {
            let path = entry.map_err(read_dir_err)?.path();
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();

        for path in files {
            if self.stop_flag_is_set() {
                self.log(
                    LogLevel::Info,
                    format!(
                        "Stop command detected, leaving directory {} ...",
                        dir.display()
                    ),
                );
                break;
            }
            self.import_file(&path);
        }
        Ok(())
    }

    /// Import one file. Unit-level failures are logged here and never
    /// escape.
    pub fn import_file(&mut self, path: &Path) -> UnitOutcome {
        let id = path.display().to_string();
        let result = match self.classify(&id) {
            Some(UnitKind::Records(layout)) => self.import_record_file(path, &id, layout),
            Some(UnitKind::Container(index)) => self.import_container(index, path, &id),
            None => {
                self.log(LogLevel::Info, format!("Unrecognized file: {id}"));
                Ok(UnitOutcome::Unrecognized)
            }
        };
        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.log(LogLevel::Fatal, format!("File: {id}, Exception: {e}"));
                UnitOutcome::Failed
            }
        }
    }

    fn classify(&self, name: &str) -> Option<UnitKind> {
        if let Some(layout) = self.record_layout(name) {
            return Some(UnitKind::Records(layout));
        }
        let ext = extension_of(name)?;
        self.containers
            .iter()
            .position(|f| f.extension().trim_start_matches('.').eq_ignore_ascii_case(&ext))
            .map(UnitKind::Container)
    }

    fn record_layout(&self, name: &str) -> Option<RecordLayout> {
        let ext = extension_of(name)?;
        if self.opts.record_extensions.iter().any(|e| *e == ext) {
            Some(RecordLayout::Array)
        } else if self.opts.lines_extensions.iter().any(|e| *e == ext) {
            Some(RecordLayout::Lines)
        } else {
            None
        }
    }

    fn import_record_file(
        &mut self,
        path: &Path,
        id: &str,
        layout: RecordLayout,
    ) -> Result<UnitOutcome, UnitError> {
        if self.ignores.contains(id) {
            self.log(LogLevel::Info, format!("Ignored file: {id}"));
            return Ok(UnitOutcome::Ignored);
        }
        self.log(LogLevel::Info, format!("Processing file: {id}"));
        let bytes = std::fs::read(path).map_err(|e| UnitError::io(id, e))?;
        self.import_unit_bytes(id, &bytes, layout)
    }

    /// Entries are units of their own, qualified as
    /// `<container><separator><entry>`. The container id is checkpointed
    /// only once every matching entry has finished.
    fn import_container(
        &mut self,
        format: usize,
        path: &Path,
        id: &str,
    ) -> Result<UnitOutcome, UnitError> {
        if self.ignores.contains(id) {
            self.log(LogLevel::Info, format!("Ignored container: {id}"));
            return Ok(UnitOutcome::Ignored);
        }
        self.log(LogLevel::Info, format!("Processing file: {id}"));
        let mut container = self.containers[format].open(path)?;
        let names = container.entry_names()?;

        let mut stopped = false;
        let mut failed = false;
        for name in names {
            if self.stop_flag_is_set() {
                self.log(
                    LogLevel::Info,
                    format!("Stop command detected, leaving file {id} ..."),
                );
                stopped = true;
                break;
            }
            if !name.starts_with(&self.opts.entry_prefix)
                || !name.ends_with(&self.opts.entry_suffix)
            {
                continue;
            }
            let entry_id = format!("{id}{}{name}", self.opts.entry_separator);
            if self.ignores.contains(&entry_id) {
                self.log(LogLevel::Info, format!("Ignored file: {entry_id}"));
                continue;
            }
            match self.import_entry(container.as_mut(), &entry_id, &name) {
                Ok(UnitOutcome::Finished) => {}
                Ok(_) => stopped = true,
                Err(e) => {
                    self.log(
                        LogLevel::Fatal,
                        format!("File: {entry_id}, Exception: {e}"),
                    );
                    failed = true;
                }
            }
        }

        if stopped {
            Ok(UnitOutcome::Unfinished)
        } else if failed {
            Ok(UnitOutcome::Failed)
        } else {
            self.checkpoint.append(id).map_err(UnitError::Checkpoint)?;
            Ok(UnitOutcome::Finished)
        }
    }

    fn import_entry(
        &mut self,
        container: &mut dyn Container,
        entry_id: &str,
        name: &str,
    ) -> Result<UnitOutcome, UnitError> {
        let bytes = container.read_entry(name)?;
        let layout = self.record_layout(name).unwrap_or(RecordLayout::Array);
        self.import_unit_bytes(entry_id, &bytes, layout)
    }

    /// Decode, import, and on success checkpoint one unit. Bytes count as
    /// processed whether or not the unit finished.
    fn import_unit_bytes(
        &mut self,
        id: &str,
        bytes: &[u8],
        layout: RecordLayout,
    ) -> Result<UnitOutcome, UnitError> {
        let items = decode_records(layout, bytes, id)?;
        let finished = self.import_items(id, items);
        let outcome = if finished {
            self.sink.flush().map_err(|e| UnitError::io(id, e))?;
            self.checkpoint.append(id).map_err(UnitError::Checkpoint)?;
            self.state.update_counters(CounterDelta::units(1));
            UnitOutcome::Finished
        } else {
            self.sink.discard();
            UnitOutcome::Unfinished
        };
        self.state
            .update_counters(CounterDelta::bytes(bytes.len() as u64));
        Ok(outcome)
    }

    /// Feed every item to the sink. Returns false if a stop request was
    /// seen before the last item.
    fn import_items(&mut self, id: &str, items: Items) -> bool {
        let total = items.len() as u64;
        self.log(
            LogLevel::Info,
            format!("Processing {id}, {total} records"),
        );
        self.state.update_counters(CounterDelta::current(id));
        self.state.update_progress(0, Some(total));

        let mut processed: u64 = 0;
        for item in items {
            processed += 1;
            if processed % self.opts.check_step == 0 && self.stop_flag_is_set() {
                self.log(LogLevel::Info, "Stop command detected, stop importing ...");
                return false;
            }
            match item.and_then(|record| self.sink.put(id, &record)) {
                Ok(()) => self.state.update_counters(CounterDelta::records(1)),
                Err(e) => self.log(
                    LogLevel::Warning,
                    format!("Record #{processed} (unit: {id}), Exception: {e}"),
                ),
            }
            self.state.update_progress(processed, None);
        }
        true
    }
}
