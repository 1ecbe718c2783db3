use std::path::PathBuf;

/// A single record could not be imported. The unit carries on.
#[derive(Debug, thiserror::Error)]
pub enum ItemError {
    #[error("malformed record: {reason}")]
    Malformed { reason: String },

    #[error("unparsable record: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("sink error: {0}")]
    Sink(#[from] std::io::Error),
}

impl ItemError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

/// One unit (file, container, or container entry) failed as a whole. No
/// checkpoint line is written for it; the traversal moves on.
#[derive(Debug, thiserror::Error)]
pub enum UnitError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot decode {path}: {source}")]
    Decode {
        path: String,
        source: serde_json::Error,
    },

    #[error("container {path}: {message}")]
    Container { path: String, message: String },

    #[error("checkpoint append failed: {0}")]
    Checkpoint(std::io::Error),
}

impl UnitError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn container(path: impl Into<String>, message: impl ToString) -> Self {
        Self::Container {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

/// The data source itself is unusable. Fatal for the run.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source does not exist: {}", .0.display())]
    Missing(PathBuf),

    #[error("cannot list directory {}: {source}", .path.display())]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
}
