use anyhow::{Context, Result};
use std::path::Path;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

const STAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

pub fn ensure_dir(p: &Path) -> Result<()> {
    std::fs::create_dir_all(p).with_context(|| format!("create_dir_all {}", p.display()))
}

/// Wall-clock stamp used in the task log and on the status page (UTC).
pub fn now_stamp() -> String {
    time::OffsetDateTime::now_utc()
        .format(STAMP_FORMAT)
        .unwrap_or_else(|_| "1970-01-01 00:00:00".to_string())
}

/// Space-joined command line of the current process.
pub fn command_line() -> String {
    std::env::args().collect::<Vec<_>>().join(" ")
}
