use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tracker: Tracker,
    #[serde(default)]
    pub worker: Worker,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }
}

/// Control plane settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Tracker {
    pub addr: String,
    pub port: u16,
    pub accept_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub max_request_bytes: usize,
    pub refresh_seconds: u32,
    pub log_capacity: usize,
    pub serve_root: String,
}
impl Default for Tracker {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0".into(),
            port: 10086,
            accept_timeout_ms: 3000,
            read_timeout_ms: 3000,
            max_request_bytes: 1024,
            refresh_seconds: 5,
            log_capacity: 80,
            serve_root: ".".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Worker {
    pub check_step: u64,
    pub entry_separator: String,
    pub entry_prefix: String,
    pub entry_suffix: String,
    pub key_field: String,
    pub record_extensions: Vec<String>,
    pub lines_extensions: Vec<String>,
}
impl Default for Worker {
    fn default() -> Self {
        Self {
            check_step: 2000,
            entry_separator: ":".into(),
            entry_prefix: "".into(),
            entry_suffix: ".txt".into(),
            key_field: "id".into(),
            record_extensions: vec!["txt".into(), "json".into()],
            lines_extensions: vec!["jsonl".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub log_dir: String,
    pub checkpoint_dir: String,
    pub ignore_file: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            log_dir: "log".into(),
            checkpoint_dir: "log".into(),
            ignore_file: "log/ignores".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: true,
            file_path: "".into(),
        }
    }
}
