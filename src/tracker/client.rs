//! Minimal client for a running control interface.

use super::protocol::STOP_TARGET;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub status_line: String,
    pub body: String,
}

pub fn request(
    addr: impl ToSocketAddrs,
    method: &str,
    target: &str,
    timeout: Duration,
) -> io::Result<Reply> {
    let addr = addr
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no address to connect to"))?;
    let mut stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    write!(stream, "{method} {target} HTTP/1.1\r\nHost: {addr}\r\n\r\n")?;
    stream.flush()?;

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw)?;
    parse_reply(&String::from_utf8_lossy(&raw))
}

pub fn send_stop(addr: impl ToSocketAddrs, timeout: Duration) -> io::Result<Reply> {
    request(addr, "POST", STOP_TARGET, timeout)
}

fn parse_reply(raw: &str) -> io::Result<Reply> {
    let (head, body) = raw.split_once("\r\n\r\n").unwrap_or((raw, ""));
    let status_line = head.lines().next().unwrap_or("").to_string();
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bad status line: {status_line:?}"),
            )
        })?;
    Ok(Reply {
        status,
        status_line,
        body: body.to_string(),
    })
}
