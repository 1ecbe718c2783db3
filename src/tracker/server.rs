use super::protocol::{
    content_type_for, log_href, parse_request_line, resolve_target, Request, Response, Status,
};
use super::render::render_status;
use crate::config;
use crate::state::{LogLevel, TaskState};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub accept_timeout: Duration,
    pub read_timeout: Duration,
    pub max_request_bytes: usize,
    pub refresh_seconds: u32,
    pub serve_root: PathBuf,
}

impl ServerOptions {
    pub fn from_config(cfg: &config::Tracker) -> Self {
        Self {
            accept_timeout: Duration::from_millis(cfg.accept_timeout_ms.max(1)),
            read_timeout: Duration::from_millis(cfg.read_timeout_ms.max(1)),
            max_request_bytes: cfg.max_request_bytes.max(16),
            refresh_seconds: cfg.refresh_seconds,
            serve_root: PathBuf::from(&cfg.serve_root),
        }
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::from_config(&config::Tracker::default())
    }
}

/// Status and stop endpoint. Owns the listening socket for as long as the
/// job runs; dropping it releases the port.
pub struct StatusServer {
    listener: TcpListener,
    opts: ServerOptions,
}

impl StatusServer {
    pub fn bind(addr: &str, port: u16, opts: ServerOptions) -> io::Result<Self> {
        let listener = TcpListener::bind((addr, port))?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener, opts })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop. Returns once `job_done` is observed set between accept
    /// attempts, or when the listener fails.
    pub fn serve(&self, state: &TaskState, job_done: &AtomicBool) {
        match self.local_addr() {
            Ok(addr) => state.log(
                LogLevel::Info,
                format!("Starting control interface at: http://{addr}"),
            ),
            Err(e) => state.log(
                LogLevel::Warning,
                format!("control interface address unknown: {e}"),
            ),
        }

        thread::scope(|scope| {
            while !job_done.load(Ordering::SeqCst) {
                match self.accept_within(self.opts.accept_timeout) {
                    Ok(Some((stream, peer))) => {
                        scope.spawn(move || {
                            if let Err(e) = self.handle_connection(stream, state) {
                                state.log(
                                    LogLevel::Warning,
                                    format!("control connection from {peer} dropped: {e}"),
                                );
                            }
                        });
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        state.log(
                            LogLevel::Error,
                            format!("control interface down! Network error: {e}"),
                        );
                        break;
                    }
                }
            }
        });
        debug!("control interface stopped");
    }

    /// Wait up to `timeout` for one connection. `Ok(None)` means the wait
    /// ran out, which is not an error.
    fn accept_within(&self, timeout: Duration) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.listener.accept() {
                Ok(pair) => return Ok(Some(pair)),
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock
                            | ErrorKind::Interrupted
                            | ErrorKind::ConnectionAborted
                    ) =>
                {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    thread::sleep(ACCEPT_POLL_INTERVAL.min(deadline - now));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn handle_connection(&self, mut stream: TcpStream, state: &TaskState) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(self.opts.read_timeout))?;
        stream.set_write_timeout(Some(self.opts.read_timeout))?;

        let line = read_request_line(&mut stream, self.opts.max_request_bytes)?;
        debug!(request = %line, "control request");
        let response = respond(&parse_request_line(&line), state, &self.opts);

        stream.write_all(&response.to_bytes())?;
        stream.flush()?;
        let _ = stream.shutdown(Shutdown::Write);
        Ok(())
    }
}

/// Read until the first line break, EOF, or `cap` bytes. A read timeout
/// after some bytes have arrived keeps what was read.
pub fn read_request_line<R: Read>(reader: &mut R, cap: usize) -> io::Result<String> {
    let mut buf = vec![0u8; cap];
    let mut len = 0;
    while len < cap {
        match reader.read(&mut buf[len..]) {
            Ok(0) => break,
            Ok(n) => {
                len += n;
                if buf[..len].contains(&b'\n') {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e)
                if len > 0 && matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                break
            }
            Err(e) => return Err(e),
        }
    }
    let text = String::from_utf8_lossy(&buf[..len]);
    Ok(text.lines().next().unwrap_or("").to_string())
}

pub fn respond(request: &Request, state: &TaskState, opts: &ServerOptions) -> Response {
    match request {
        Request::Status => {
            let snap = state.snapshot();
            let href = snap
                .log_path
                .as_deref()
                .map(|log| log_href(&opts.serve_root, log));
            let body = render_status(&snap, opts.refresh_seconds, href.as_deref());
            Response::ok("text/html", body)
        }
        Request::File(target) => {
            let target = target.split(['?', '#']).next().unwrap_or("");
            let Some(path) = resolve_target(&opts.serve_root, target) else {
                return Response::not_found();
            };
            match std::fs::read(&path) {
                Ok(body) => Response::ok(content_type_for(target), body),
                Err(e) => {
                    debug!("serving {} failed: {e}", path.display());
                    Response::not_found()
                }
            }
        }
        Request::TaskLog => match state.log_path().map(std::fs::read) {
            Some(Ok(body)) => Response::ok("text/plain", body),
            _ => Response::not_found(),
        },
        Request::Stop => {
            if state.request_stop() {
                state.log(LogLevel::Info, "control interface got a STOP command.");
            }
            Response::empty(Status::Ok)
        }
        Request::Bad => Response::bad_request(),
    }
}
