use super::error::{ItemError, UnitError};
use serde_json::Value;
use std::path::Path;

/// How the bytes of one unit are laid out as records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLayout {
    /// A single JSON array of records.
    Array,
    /// One JSON record per line; blank lines are skipped.
    Lines,
}

/// Items of a unit. A line that fails to parse is an item-level error and
/// is reported when the worker reaches it.
pub type Items = Vec<Result<Value, ItemError>>;

pub fn decode_records(layout: RecordLayout, bytes: &[u8], unit: &str) -> Result<Items, UnitError> {
    match layout {
        RecordLayout::Array => {
            let records: Vec<Value> =
                serde_json::from_slice(bytes).map_err(|source| UnitError::Decode {
                    path: unit.to_string(),
                    source,
                })?;
            Ok(records.into_iter().map(Ok).collect())
        }
        RecordLayout::Lines => {
            let text = std::str::from_utf8(bytes).map_err(|e| UnitError::io(
                unit,
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            ))?;
            Ok(text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| serde_json::from_str(line).map_err(ItemError::from))
                .collect())
        }
    }
}

/// Lowercased extension of a file or entry name, if it has one.
pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|s| s.to_str())
        .map(str::to_ascii_lowercase)
}

/// An opened multi-entry unit, e.g. an archive.
pub trait Container {
    fn entry_names(&mut self) -> Result<Vec<String>, UnitError>;
    fn read_entry(&mut self, name: &str) -> Result<Vec<u8>, UnitError>;
}

/// Recognises and opens one kind of container by file extension.
pub trait ContainerFormat: Send {
    fn extension(&self) -> &str;
    fn open(&self, path: &Path) -> Result<Box<dyn Container>, UnitError>;
}
