use import_tracker::config;
use import_tracker::state::TaskState;
use import_tracker::tracker::client::{request, send_stop};
use import_tracker::tracker::{RunOutcome, TaskTracker, TrackerError};
use import_tracker::worker::{
    CheckpointLog, CheckpointedWorker, IgnoreSet, ItemError, RecordSink, SourceError,
    WorkerOptions,
};
use serde_json::Value;
use std::net::{SocketAddr, TcpListener};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

fn local_cfg(serve_root: &Path) -> config::Tracker {
    config::Tracker {
        addr: "127.0.0.1".into(),
        port: 0,
        accept_timeout_ms: 100,
        read_timeout_ms: 1000,
        serve_root: serve_root.display().to_string(),
        ..config::Tracker::default()
    }
}

fn control_addr(state: &TaskState) -> SocketAddr {
    state.identity().control_addr.expect("bound address")
}

#[test]
fn status_page_and_stop_command() {
    let tmp = tempfile::tempdir().unwrap();
    let tracker = TaskTracker::new(local_cfg(tmp.path()), None);

    let report = tracker
        .run(|state| {
            let addr = control_addr(state);

            let page = request(addr, "GET", "/", TIMEOUT).unwrap();
            assert_eq!(page.status, 200);
            assert!(page.body.contains("<label>Running</label>"));

            let stop = send_stop(addr, TIMEOUT).unwrap();
            assert_eq!(stop.status, 200);
            assert!(state.stop_requested());

            let page = request(addr, "GET", "/", TIMEOUT).unwrap();
            assert!(page.body.contains("Waiting to stop"));
            assert!(page.body.contains("got a STOP command"));

            assert_eq!(send_stop(addr, TIMEOUT).unwrap().status, 200);
            Ok(())
        })
        .expect("run");

    assert_eq!(report.outcome, RunOutcome::Aborted);
    assert!(report.aborted());
    let stops = report
        .snapshot
        .recent_log
        .iter()
        .filter(|l| l.contains("got a STOP command"))
        .count();
    assert_eq!(stops, 1);
    assert!(report.snapshot.recent_log.last().unwrap().contains("Mission aborted."));
}

#[test]
fn unknown_routes_get_400_and_missing_files_404() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("hello.txt"), "hello there").unwrap();
    let tracker = TaskTracker::new(local_cfg(tmp.path()), None);

    let report = tracker
        .run(|state| {
            let addr = control_addr(state);
            assert_eq!(request(addr, "DELETE", "/", TIMEOUT).unwrap().status, 400);
            assert_eq!(request(addr, "POST", "/", TIMEOUT).unwrap().status, 400);

            let file = request(addr, "GET", "/hello.txt", TIMEOUT).unwrap();
            assert_eq!(file.status, 200);
            assert_eq!(file.body, "hello there");

            assert_eq!(request(addr, "GET", "/missing.txt", TIMEOUT).unwrap().status, 404);
            assert_eq!(request(addr, "GET", "/../secret", TIMEOUT).unwrap().status, 404);
            Ok(())
        })
        .expect("run");

    assert_eq!(report.outcome, RunOutcome::Complete);
}

#[test]
fn junk_connections_do_not_stop_the_server() {
    use std::io::Write;
    use std::net::TcpStream;

    let tmp = tempfile::tempdir().unwrap();
    let tracker = TaskTracker::new(local_cfg(tmp.path()), None);

    tracker
        .run(|state| {
            let addr = control_addr(state);
            // Connect and hang up without sending anything.
            drop(TcpStream::connect(addr).unwrap());
            let mut junk = TcpStream::connect(addr).unwrap();
            junk.write_all(&[0xff, 0xfe, 0x00, b'\n']).unwrap();
            drop(junk);

            assert_eq!(request(addr, "GET", "/", TIMEOUT).unwrap().status, 200);
            Ok(())
        })
        .expect("run");
}

#[test]
fn second_run_while_active_is_refused() {
    let tmp = tempfile::tempdir().unwrap();
    let tracker = TaskTracker::new(local_cfg(tmp.path()), None);

    tracker
        .run(|_| {
            let nested = tracker.run(|_| Ok(()));
            assert!(matches!(nested, Err(TrackerError::AlreadyRunning)));
            Ok(())
        })
        .expect("run");

    // Idle again once the first run returned.
    assert!(tracker.run(|_| Ok(())).is_ok());
}

#[test]
fn bind_failure_aborts_before_the_job_starts() {
    let tmp = tempfile::tempdir().unwrap();
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut cfg = local_cfg(tmp.path());
    cfg.port = taken.local_addr().unwrap().port();

    let started = AtomicBool::new(false);
    let result = TaskTracker::new(cfg, None).run(|_| {
        started.store(true, Ordering::SeqCst);
        Ok(())
    });

    assert!(matches!(result, Err(TrackerError::Bind { .. })));
    assert!(!started.load(Ordering::SeqCst));
}

#[test]
fn listener_is_released_shortly_after_the_job_ends() {
    let tmp = tempfile::tempdir().unwrap();
    let tracker = TaskTracker::new(local_cfg(tmp.path()), None);

    let begin = Instant::now();
    let report = tracker.run(|_| Ok(())).expect("run");
    assert!(begin.elapsed() < Duration::from_secs(3));
    assert_eq!(report.outcome, RunOutcome::Complete);

    let addr = report.snapshot.identity.control_addr.unwrap();
    TcpListener::bind(addr).expect("port released");
}

#[test]
fn source_failure_is_reported_to_the_caller() {
    let tmp = tempfile::tempdir().unwrap();
    let tracker = TaskTracker::new(local_cfg(tmp.path()), None);

    let missing = tmp.path().join("nowhere");
    let result = tracker.run(|_| Err(SourceError::Missing(missing.clone())));
    assert!(matches!(
        result,
        Err(TrackerError::Source(SourceError::Missing(_)))
    ));
}

#[test]
fn durable_task_log_is_named_after_the_pid() {
    let tmp = tempfile::tempdir().unwrap();
    let logs = tmp.path().join("log");
    let tracker = TaskTracker::new(local_cfg(tmp.path()), Some(logs.clone()));

    let report = tracker.run(|_| Ok(())).expect("run");
    let path = logs.join(format!("import-tracker.{}.log", std::process::id()));
    assert_eq!(report.snapshot.log_path.as_deref(), Some(path.as_path()));

    let text = std::fs::read_to_string(path).unwrap();
    assert!(text.contains("[INFO] Starting TaskTracker PID="));
    assert!(text.contains("Mission complete."));
}

fn rendered_log_href(page: &str) -> String {
    let start = page.find("<a href=\"").expect("log link") + "<a href=\"".len();
    let len = page[start..].find('"').unwrap();
    page[start..start + len].to_string()
}

#[test]
fn status_page_links_to_the_task_log() {
    let tmp = tempfile::tempdir().unwrap();
    let tracker = TaskTracker::new(local_cfg(tmp.path()), Some(tmp.path().join("log")));

    tracker
        .run(|state| {
            let addr = control_addr(state);
            let page = request(addr, "GET", "/", TIMEOUT).unwrap();
            let href = rendered_log_href(&page.body);
            assert_eq!(
                href,
                format!("/log/import-tracker.{}.log", std::process::id())
            );

            let log = request(addr, "GET", &href, TIMEOUT).unwrap();
            assert_eq!(log.status, 200);
            assert!(log.body.contains("Starting TaskTracker PID="));
            Ok(())
        })
        .expect("run");
}

#[test]
fn task_log_outside_the_served_root_uses_the_log_route() {
    let served = tempfile::tempdir().unwrap();
    let logs = tempfile::tempdir().unwrap();
    let tracker = TaskTracker::new(local_cfg(served.path()), Some(logs.path().to_path_buf()));

    tracker
        .run(|state| {
            let addr = control_addr(state);
            let page = request(addr, "GET", "/", TIMEOUT).unwrap();
            let href = rendered_log_href(&page.body);
            assert_eq!(href, "/ctl/log");
            assert!(!page.body.contains(&logs.path().display().to_string()));

            let log = request(addr, "GET", &href, TIMEOUT).unwrap();
            assert_eq!(log.status, 200);
            assert!(log.body.contains("Starting control interface"));
            Ok(())
        })
        .expect("run");
}

/// Sends the stop command over the wire as soon as the trigger unit starts.
struct StopOverHttp<'s> {
    state: &'s TaskState,
    trigger_unit: &'static str,
    sent: bool,
}

impl RecordSink for StopOverHttp<'_> {
    fn put(&mut self, unit: &str, record: &Value) -> Result<(), ItemError> {
        if record.get("id").is_none() {
            return Err(ItemError::malformed("missing field `id`"));
        }
        if unit.ends_with(self.trigger_unit) && !self.sent {
            let reply = send_stop(self.state.identity().control_addr.unwrap(), TIMEOUT)?;
            assert_eq!(reply.status, 200);
            self.sent = true;
        }
        Ok(())
    }
}

#[test]
fn stop_over_http_mid_unit_aborts_the_run() {
    let tmp = tempfile::tempdir().unwrap();
    let data = tmp.path().join("data");
    std::fs::create_dir_all(&data).unwrap();
    std::fs::write(
        data.join("a.txt"),
        r#"[{"id": "1"}, {"id": "2"}, {"id": "3"}]"#,
    )
    .unwrap();
    std::fs::write(data.join("b.txt"), r#"[{"id": "4"}, {"id": "5"}]"#).unwrap();
    let done = tmp.path().join("run.done");

    let tracker = TaskTracker::new(local_cfg(tmp.path()), None);
    let ignores = IgnoreSet::new();
    let opts = WorkerOptions {
        check_step: 1,
        ..WorkerOptions::default()
    };

    let report = tracker
        .run(|state| {
            let checkpoint = CheckpointLog::at(&done).unwrap();
            let sink = StopOverHttp {
                state,
                trigger_unit: "b.txt",
                sent: false,
            };
            CheckpointedWorker::new(state, &ignores, checkpoint, sink, opts).import_source(&data)
        })
        .expect("run");

    assert_eq!(report.outcome, RunOutcome::Aborted);
    let written = std::fs::read_to_string(&done).unwrap();
    assert_eq!(written, format!("{}\n", data.join("a.txt").display()));
    assert_eq!(report.snapshot.records_processed, 4);
    assert_eq!(report.snapshot.units_processed, 1);
}
