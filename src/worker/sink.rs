//! Where accepted records go. The storage backend is pluggable; the
//! built-in sinks write JSON lines or only validate.

use super::error::ItemError;
use serde_json::{json, Value};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

pub trait RecordSink {
    fn put(&mut self, unit: &str, record: &Value) -> Result<(), ItemError>;

    /// Called before a unit is checkpointed. Everything put since the last
    /// flush must be durable once this returns.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Called when a unit ends without being checkpointed. Rows put since
    /// the last flush will be replayed by the next run.
    fn discard(&mut self) {}
}

/// Row key of a record: the string or number under `key_field`.
pub fn record_key(record: &Value, key_field: &str) -> Result<String, ItemError> {
    let obj = record
        .as_object()
        .ok_or_else(|| ItemError::malformed("record is not an object"))?;
    match obj.get(key_field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(_) => Err(ItemError::malformed(format!("field `{key_field}` is not a usable key"))),
        None => Err(ItemError::malformed(format!("missing field `{key_field}`"))),
    }
}

/// One JSON object per line: `{"key", "unit", "record"}`. Rows are held
/// until the unit is flushed so a replayed unit is never written twice.
pub struct JsonlSink<W: Write> {
    out: W,
    key_field: String,
    pending: Vec<u8>,
}

impl JsonlSink<BufWriter<File>> {
    /// Appends to `path`, creating it if needed.
    pub fn create(path: &Path, key_field: impl Into<String>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(BufWriter::new(file), key_field))
    }
}

impl<W: Write> JsonlSink<W> {
    pub fn new(out: W, key_field: impl Into<String>) -> Self {
        Self {
            out,
            key_field: key_field.into(),
            pending: Vec::new(),
        }
    }
}

impl<W: Write> RecordSink for JsonlSink<W> {
    fn put(&mut self, unit: &str, record: &Value) -> Result<(), ItemError> {
        let key = record_key(record, &self.key_field)?;
        let row = json!({ "key": key, "unit": unit, "record": record });
        serde_json::to_writer(&mut self.pending, &row)?;
        self.pending.push(b'\n');
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.write_all(&self.pending)?;
        self.pending.clear();
        self.out.flush()
    }

    fn discard(&mut self) {
        self.pending.clear();
    }
}

/// Validates keys without storing anything.
pub struct DryRunSink {
    key_field: String,
    pub accepted: u64,
}

impl DryRunSink {
    pub fn new(key_field: impl Into<String>) -> Self {
        Self {
            key_field: key_field.into(),
            accepted: 0,
        }
    }
}

impl RecordSink for DryRunSink {
    fn put(&mut self, _unit: &str, record: &Value) -> Result<(), ItemError> {
        record_key(record, &self.key_field)?;
        self.accepted += 1;
        Ok(())
    }
}
