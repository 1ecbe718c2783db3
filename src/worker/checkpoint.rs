//! Crash-only resume: every fully imported unit is appended to a per-process
//! `.done` log, and the next run folds all such logs (plus an optional
//! hand-written ignore list) into its ignore set.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CHECKPOINT_EXTENSION: &str = "done";

#[derive(Debug, Clone, Default)]
pub struct IgnoreSet {
    ids: BTreeSet<String>,
}

impl IgnoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union of `ignore_file` (if given and present) and every checkpoint
    /// log under `checkpoint_dir`.
    pub fn rehydrate(ignore_file: Option<&Path>, checkpoint_dir: &Path) -> io::Result<Self> {
        let mut set = Self::new();
        if let Some(path) = ignore_file {
            let n = set.load_file(path)?;
            debug!("ignore list {}: {n} ids", path.display());
        }
        set.load_checkpoint_dir(checkpoint_dir)?;
        Ok(set)
    }

    /// Missing files count as empty.
    pub fn load_file(&mut self, path: &Path) -> io::Result<usize> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        self.load_reader(BufReader::new(file))
    }

    pub fn load_reader<R: BufRead>(&mut self, reader: R) -> io::Result<usize> {
        let mut added = 0;
        for line in reader.lines() {
            let line = line?;
            let id = line.trim_matches([' ', '\r', '\n']);
            if !id.is_empty() && self.ids.insert(id.to_string()) {
                added += 1;
            }
        }
        Ok(added)
    }

    pub fn load_checkpoint_dir(&mut self, dir: &Path) -> io::Result<usize> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        let mut logs = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file()
                && path.extension().and_then(|s| s.to_str()) == Some(CHECKPOINT_EXTENSION)
            {
                logs.push(path);
            }
        }
        logs.sort();
        let mut added = 0;
        for path in logs {
            let n = self.load_file(&path)?;
            debug!("checkpoint log {}: {n} new ids", path.display());
            added += n;
        }
        Ok(added)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for IgnoreSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Append-only log of completed unit ids, synced to disk on every append.
/// Written only by the job thread and never read back during the run.
#[derive(Debug)]
pub struct CheckpointLog {
    path: PathBuf,
    file: File,
}

impl CheckpointLog {
    pub fn file_name(pid: u32) -> String {
        format!("{pid}.{CHECKPOINT_EXTENSION}")
    }

    pub fn open(dir: &Path, pid: u32) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        Self::at(dir.join(Self::file_name(pid)))
    }

    pub fn at(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, id: &str) -> io::Result<()> {
        writeln!(self.file, "{id}")?;
        self.file.flush()?;
        self.file.sync_data()
    }
}
