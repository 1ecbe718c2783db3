//! The control plane's request-line parser and response framing.
//!
//! Only the first line of a request is ever looked at; headers and bodies
//! are ignored.

use std::path::{Component, Path, PathBuf};

pub const SERVER_NAME: &str = "import-tracker";
pub const STOP_TARGET: &str = "/ctl/stop";
pub const LOG_TARGET: &str = "/ctl/log";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Status,
    File(String),
    Stop,
    TaskLog,
    Bad,
}

/// Split a request line into method and target: the first two non-empty
/// tokens, with tabs treated as spaces. Missing tokens come back empty.
pub fn split_request_line(line: &str) -> (&str, &str) {
    let mut parts = line
        .split([' ', '\t'])
        .filter(|s| !s.is_empty());
    let method = parts.next().unwrap_or("");
    let target = parts.next().unwrap_or("");
    (method, target)
}

pub fn parse_request_line(line: &str) -> Request {
    match split_request_line(line) {
        ("GET", "/") => Request::Status,
        ("GET", LOG_TARGET) => Request::TaskLog,
        ("GET", target) if target.starts_with('/') => Request::File(target.to_string()),
        ("POST", STOP_TARGET) => Request::Stop,
        _ => Request::Bad,
    }
}

/// Map a `GET` target onto a path under `root`. Anything that could climb
/// out of `root` yields `None`.
pub fn resolve_target(root: &Path, target: &str) -> Option<PathBuf> {
    let rel = Path::new(target.trim_start_matches('/'));
    if rel.as_os_str().is_empty() {
        return None;
    }
    for component in rel.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return None,
        }
    }
    Some(root.join(rel))
}

/// Link to the task log: its path under `root` when it lives there,
/// otherwise the fixed log route.
pub fn log_href(root: &Path, log: &Path) -> String {
    let relative = root
        .canonicalize()
        .ok()
        .zip(log.canonicalize().ok())
        .and_then(|(root, log)| log.strip_prefix(&root).map(Path::to_path_buf).ok());
    let Some(relative) = relative else {
        return LOG_TARGET.to_string();
    };
    let mut href = String::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                href.push('/');
                href.push_str(&part.to_string_lossy());
            }
            _ => return LOG_TARGET.to_string(),
        }
    }
    if href.is_empty() {
        LOG_TARGET.to_string()
    } else {
        href
    }
}

pub fn content_type_for(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "htm" | "html" => "text/html",
        "txt" | "log" | "rs" | "py" | "sh" => "text/plain",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    NotFound,
}

impl Status {
    fn line(self) -> &'static str {
        match self {
            Status::Ok => "HTTP/1.1 200 OK",
            Status::BadRequest => "HTTP/1.1 400 Bad Request",
            Status::NotFound => "HTTP/1.1 404 Not Found",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: Status,
    pub content_type: Option<&'static str>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn ok(content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: Status::Ok,
            content_type: Some(content_type),
            body: body.into(),
        }
    }

    pub fn empty(status: Status) -> Self {
        Self {
            status,
            content_type: None,
            body: Vec::new(),
        }
    }

    pub fn bad_request() -> Self {
        Self::empty(Status::BadRequest)
    }

    pub fn not_found() -> Self {
        Self::empty(Status::NotFound)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!(
            "{}\r\nServer: {SERVER_NAME}\r\nConnection: close\r\n",
            self.status.line()
        );
        if let Some(ct) = self.content_type {
            head.push_str(&format!(
                "Content-Length: {}\r\nContent-Type: {ct}\r\n",
                self.body.len()
            ));
        }
        head.push_str("\r\n");
        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}
