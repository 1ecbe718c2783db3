use import_tracker::state::{CounterDelta, LogLevel, TaskState};
use import_tracker::tracker::protocol::{
    content_type_for, log_href, parse_request_line, resolve_target, split_request_line, Request,
    Response,
};
use import_tracker::tracker::render::{escape_html, format_bytes, render_status};
use import_tracker::tracker::server::read_request_line;
use std::io::Cursor;
use std::path::Path;

#[test]
fn request_line_tolerates_tabs_and_repeated_spaces() {
    assert_eq!(split_request_line("GET / HTTP/1.1"), ("GET", "/"));
    assert_eq!(split_request_line("  POST\t\t/ctl/stop   HTTP/1.0"), ("POST", "/ctl/stop"));
    assert_eq!(split_request_line("GET"), ("GET", ""));
    assert_eq!(split_request_line(""), ("", ""));
}

#[test]
fn routes() {
    assert_eq!(parse_request_line("GET / HTTP/1.1"), Request::Status);
    assert_eq!(
        parse_request_line("GET /log/x.log HTTP/1.1"),
        Request::File("/log/x.log".into())
    );
    assert_eq!(parse_request_line("POST /ctl/stop HTTP/1.1"), Request::Stop);
    assert_eq!(parse_request_line("GET /ctl/log HTTP/1.1"), Request::TaskLog);
    assert_eq!(parse_request_line("POST / HTTP/1.1"), Request::Bad);
    assert_eq!(parse_request_line("GET /ctl/stop HTTP/1.1"), Request::File("/ctl/stop".into()));
    assert_eq!(parse_request_line("DELETE / HTTP/1.1"), Request::Bad);
    assert_eq!(parse_request_line("GET"), Request::Bad);
    assert_eq!(parse_request_line("garbage"), Request::Bad);
}

#[test]
fn content_types_follow_extension() {
    assert_eq!(content_type_for("/index.html"), "text/html");
    assert_eq!(content_type_for("/a/b.HTM"), "text/html");
    assert_eq!(content_type_for("/log/import-tracker.1.log"), "text/plain");
    assert_eq!(content_type_for("/notes.txt"), "text/plain");
    assert_eq!(content_type_for("/run.sh"), "text/plain");
    assert_eq!(content_type_for("/data.bin"), "application/octet-stream");
    assert_eq!(content_type_for("/noext"), "application/octet-stream");
}

#[test]
fn targets_cannot_escape_root() {
    let root = Path::new("/srv");
    assert_eq!(
        resolve_target(root, "/log/a.log"),
        Some(Path::new("/srv/log/a.log").to_path_buf())
    );
    assert_eq!(resolve_target(root, "/../etc/passwd"), None);
    assert_eq!(resolve_target(root, "/log/../../x"), None);
    assert_eq!(
        resolve_target(root, "//etc/passwd"),
        Some(Path::new("/srv/etc/passwd").to_path_buf())
    );
    assert_eq!(resolve_target(root, "/"), None);
}

#[test]
fn log_link_is_relative_to_the_served_root() {
    let tmp = tempfile::tempdir().unwrap();
    let logs = tmp.path().join("log");
    std::fs::create_dir_all(&logs).unwrap();
    let log = logs.join("import-tracker.7.log");
    std::fs::write(&log, "").unwrap();

    assert_eq!(log_href(tmp.path(), &log), "/log/import-tracker.7.log");
    assert_eq!(log_href(&logs, &log), "/import-tracker.7.log");

    let elsewhere = tempfile::tempdir().unwrap();
    assert_eq!(log_href(elsewhere.path(), &log), "/ctl/log");
    assert_eq!(log_href(tmp.path(), &logs.join("missing.log")), "/ctl/log");
}

#[test]
fn response_framing() {
    let ok = String::from_utf8(Response::ok("text/plain", "hi").to_bytes()).unwrap();
    assert!(ok.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(ok.contains("Server: import-tracker\r\n"));
    assert!(ok.contains("Connection: close\r\n"));
    assert!(ok.contains("Content-Length: 2\r\n"));
    assert!(ok.contains("Content-Type: text/plain\r\n"));
    assert!(ok.ends_with("\r\n\r\nhi"));

    let bad = String::from_utf8(Response::bad_request().to_bytes()).unwrap();
    assert!(bad.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(bad.ends_with("\r\n\r\n"));

    let missing = String::from_utf8(Response::not_found().to_bytes()).unwrap();
    assert!(missing.starts_with("HTTP/1.1 404 Not Found\r\n"));
}

#[test]
fn reads_only_the_first_line_within_cap() {
    let mut input = Cursor::new(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n".to_vec());
    assert_eq!(read_request_line(&mut input, 1024).unwrap(), "GET / HTTP/1.1");

    let long = format!("GET /{} HTTP/1.1\r\n", "a".repeat(4000));
    let mut input = Cursor::new(long.into_bytes());
    let line = read_request_line(&mut input, 64).unwrap();
    assert_eq!(line.len(), 64);
    assert!(line.starts_with("GET /aaa"));
}

#[test]
fn byte_sizes_are_humanized() {
    assert_eq!(format_bytes(0), "0.0 bytes");
    assert_eq!(format_bytes(1023), "1023.0 bytes");
    assert_eq!(format_bytes(1024), "1.0 KB");
    assert_eq!(format_bytes(1536), "1.5 KB");
    assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
    assert_eq!(format_bytes(2 * 1024u64.pow(4)), "2.0 TB");
}

#[test]
fn html_is_escaped() {
    assert_eq!(
        escape_html(r#"<b>"x" & 'y'</b>"#),
        "&lt;b&gt;&quot;x&quot; &amp; &#x27;y&#x27;&lt;/b&gt;"
    );
}

#[test]
fn status_page_shows_counters_and_escaped_log() {
    let state = TaskState::detached();
    state.update_counters(CounterDelta {
        units: 2,
        records: 4,
        bytes: 2048,
        current_unit: Some("data/b.txt".into()),
    });
    state.update_progress(1, Some(2));
    state.log(LogLevel::Warning, "record <broken> {{log}}");

    let page = render_status(&state.snapshot(), 5, None);
    assert!(page.contains(r#"<meta http-equiv="refresh" content="5">"#));
    assert!(page.contains(&format!("<td>{}</td>", std::process::id())));
    assert!(page.contains("<td>2</td>"));
    assert!(page.contains("<td>4</td>"));
    assert!(page.contains("2.0 KB"));
    assert!(page.contains("data/b.txt"));
    assert!(page.contains("1 / 2"));
    assert!(page.contains("<label>Running</label>"));
    assert!(page.contains("record &lt;broken&gt; {{log}}"));
    assert!(!page.contains("{{pid}}"));

    state.request_stop();
    let page = render_status(&state.snapshot(), 0, None);
    assert!(page.contains("Waiting to stop"));
    assert!(!page.contains("http-equiv"));
}
