use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use assert_cmd::cargo::cargo_bin_cmd;
use chrono::{Local, Timelike};
use predicates::prelude::*;
use tempfile::tempdir;
use tiny_http::{Header, Response, Server};

/// Serves the given replies in order, one per request, and records what it was sent.
struct FakeBackend {
    url: String,
    requests: Arc<Mutex<Vec<String>>>,
    join: Option<JoinHandle<()>>,
}

impl FakeBackend {
    fn start(replies: Vec<(u16, &'static str)>) -> Self {
        let server = Server::http("127.0.0.1:0").expect("bind fake backend");
        let addr = server.server_addr().to_ip().expect("ip listener");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let requests_for_thread = Arc::clone(&requests);
        let join = thread::spawn(move || {
            for (status, body) in replies {
                let Ok(mut request) = server.recv() else {
                    return;
                };
                let mut content = String::new();
                let _ = request.as_reader().read_to_string(&mut content);
                requests_for_thread.lock().expect("lock").push(format!(
                    "{} {} {}",
                    request.method(),
                    request.url(),
                    content
                ));
                let header =
                    Header::from_bytes("Content-Type", "application/json").expect("header");
                let _ = request.respond(
                    Response::from_string(body)
                        .with_status_code(status)
                        .with_header(header),
                );
            }
        });
        Self {
            url: format!("http://{addr}"),
            requests,
            join: Some(join),
        }
    }

    fn finish(mut self) -> Vec<String> {
        if let Some(join) = self.join.take() {
            join.join().expect("fake backend thread");
        }
        self.requests.lock().expect("lock").clone()
    }
}

fn unused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("http://{addr}")
}

fn alarmctl(config: &Path, backend_url: &str) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("alarmctl");
    cmd.env_remove("ALARMCTL_BACKEND_URL")
        .env_remove("ALARMCTL_ANALYTICS_URL")
        .env("RUST_LOG", "warn")
        .arg("--config")
        .arg(config)
        .arg("--backend-url")
        .arg(backend_url);
    cmd
}

#[test]
fn malformed_config_fails_with_clear_error() {
    let dir = tempdir().expect("tempdir");
    let config = dir.path().join("alarmctl.json");
    fs::write(&config, "{ not-valid-json ").expect("write invalid json");

    alarmctl(&config, &unused_url())
        .args(["alarms", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid JSON"));
}

#[test]
fn unsupported_config_version_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let config = dir.path().join("alarmctl.json");
    fs::write(&config, r#"{ "version": 7 }"#).expect("write config");

    alarmctl(&config, &unused_url())
        .args(["alarms", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported config version 7"));
}

#[test]
fn sampling_rate_below_minimum_is_rejected_before_sending() {
    let dir = tempdir().expect("tempdir");
    let config = dir.path().join("absent.json");

    alarmctl(&config, &unused_url())
        .args(["settings", "sampling-rate", "0.009"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("sampling_rate"))
        .stderr(predicate::str::contains("failed to connect").not());
}

#[test]
fn zero_window_size_blocks_the_settings_save() {
    let dir = tempdir().expect("tempdir");
    let config = dir.path().join("absent.json");

    alarmctl(&config, &unused_url())
        .args(["settings", "send", "--window-size", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("w_size"));
}

#[test]
fn settings_send_posts_the_full_snapshot() {
    let dir = tempdir().expect("tempdir");
    let fake = FakeBackend::start(vec![(200, r#"{ "status": "ok" }"#)]);

    alarmctl(&dir.path().join("absent.json"), &fake.url)
        .args([
            "settings",
            "send",
            "--mqtt",
            "--sampling-rate",
            "2",
            "--volume",
            "80",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("vol=50"));

    let requests = fake.finish();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].starts_with("POST /send_settings "));
    assert!(requests[0].contains(r#""command":"settings""#));
    assert!(requests[0].contains(r#""use_mqtt":true"#));
    assert!(requests[0].contains(r#""w_size":10.0"#));
}

#[test]
fn list_prints_alarms_from_backend() {
    let dir = tempdir().expect("tempdir");
    let fake = FakeBackend::start(vec![(
        200,
        r#"[
            { "id": 3, "time": "06:45", "weekdays": ["Monday", "Friday"], "active": true },
            { "id": 4, "time": "22:10", "weekdays": [], "active": false }
        ]"#,
    )]);

    alarmctl(&dir.path().join("absent.json"), &fake.url)
        .args(["alarms", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("06:45"))
        .stdout(predicate::str::contains("Monday,Friday"))
        .stdout(predicate::str::contains("22:10"));

    assert_eq!(fake.finish(), vec!["GET /alarms ".to_string()]);
}

#[test]
fn deleting_an_unknown_alarm_reports_not_found() {
    let dir = tempdir().expect("tempdir");
    let fake = FakeBackend::start(vec![(404, r#"{ "error": "Alarm not found" }"#)]);

    alarmctl(&dir.path().join("absent.json"), &fake.url)
        .args(["alarms", "delete", "99"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("99"));

    fake.finish();
}

#[test]
fn unreachable_backend_is_reported() {
    let dir = tempdir().expect("tempdir");

    alarmctl(&dir.path().join("absent.json"), &unused_url())
        .args(["alarms", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("list alarms"));
}

#[test]
fn invalid_alarm_time_is_rejected_by_the_parser() {
    let dir = tempdir().expect("tempdir");

    alarmctl(&dir.path().join("absent.json"), &unused_url())
        .args(["alarms", "add", "--time", "25:00"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("25:00"));
}

#[test]
fn watch_exits_when_stdin_closes() {
    let dir = tempdir().expect("tempdir");
    let fake = FakeBackend::start(vec![(200, "[]")]);

    alarmctl(&dir.path().join("absent.json"), &fake.url)
        .arg("watch")
        .write_stdin("")
        .assert()
        .success()
        .stdout(predicate::str::contains("Watching 0 alarm(s)"));

    fake.finish();
}

#[test]
fn toggle_day_flips_one_weekday_from_the_listed_alarm() {
    let dir = tempdir().expect("tempdir");
    let fake = FakeBackend::start(vec![
        (
            200,
            r#"[ { "id": 3, "time": "06:45", "weekdays": ["Monday"], "active": true } ]"#,
        ),
        (
            200,
            r#"{ "id": 3, "time": "06:45", "weekdays": ["Monday", "Tuesday"], "active": true }"#,
        ),
    ]);

    alarmctl(&dir.path().join("absent.json"), &fake.url)
        .args(["alarms", "toggle-day", "3", "Tue"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Monday,Tuesday"));

    assert_eq!(
        fake.finish(),
        vec![
            "GET /alarms ".to_string(),
            r#"PUT /alarms/3 {"weekdays":["Monday","Tuesday"]}"#.to_string(),
        ]
    );
}

#[test]
fn validation_failure_prints_each_field() {
    let dir = tempdir().expect("tempdir");

    alarmctl(&dir.path().join("absent.json"), &unused_url())
        .args(["settings", "send", "--sampling-rate", "20", "--window-size", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error: sampling_rate:"))
        .stderr(predicate::str::contains("error: w_size:"));
}

#[test]
fn transport_failure_is_logged_once() {
    let dir = tempdir().expect("tempdir");

    alarmctl(&dir.path().join("absent.json"), &unused_url())
        .env("RUST_LOG", "error")
        .args(["alarms", "list"])
        .assert()
        .failure()
        .stderr(predicate::function(|stderr: &str| {
            // One log record from the store, one final error line.
            stderr.lines().filter(|line| line.contains("list alarms")).count() == 2
        }));
}

/// A running `alarmctl watch` with piped stdin and stdout read line by line.
struct WatchProcess {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<String>,
    seen: Vec<String>,
}

impl WatchProcess {
    fn spawn(backend_url: &str, config: &Path) -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_alarmctl"))
            .env_remove("ALARMCTL_BACKEND_URL")
            .env_remove("ALARMCTL_ANALYTICS_URL")
            .env("RUST_LOG", "warn")
            .arg("--config")
            .arg(config)
            .arg("--backend-url")
            .arg(backend_url)
            .args(["watch", "--ring-on-device"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn alarmctl watch");
        let stdin = child.stdin.take().expect("stdin");
        let stdout = child.stdout.take().expect("stdout");
        let (tx, lines) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else {
                    break;
                };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        Self {
            child,
            stdin,
            lines,
            seen: Vec::new(),
        }
    }

    fn wait_for(&mut self, needle: &str) {
        loop {
            let line = self
                .lines
                .recv_timeout(Duration::from_secs(10))
                .unwrap_or_else(|_| panic!("no line containing {needle:?}; saw {:?}", self.seen));
            self.seen.push(line.clone());
            if line.contains(needle) {
                return;
            }
        }
    }

    fn type_line(&mut self, line: &str) {
        writeln!(self.stdin, "{line}").expect("write stdin");
        self.stdin.flush().expect("flush stdin");
    }

    fn finish(mut self) -> Vec<String> {
        self.type_line("quit");
        let status = self.child.wait().expect("wait for watch");
        assert!(status.success());
        self.seen.extend(self.lines.try_iter());
        self.seen
    }
}

/// `HH:MM` of the current local minute, waiting out the last seconds of a minute first.
fn current_minute() -> String {
    let now = Local::now();
    if now.second() >= 50 {
        thread::sleep(Duration::from_secs(u64::from(61 - now.second())));
    }
    Local::now().format("%H:%M").to_string()
}

fn leak(body: String) -> &'static str {
    Box::leak(body.into_boxed_str())
}

#[test]
fn watch_rings_on_device_and_stop_clears_the_slot() {
    let dir = tempdir().expect("tempdir");
    let minute = current_minute();
    let fake = FakeBackend::start(vec![
        (
            200,
            leak(format!(
                r#"[ {{ "id": 1, "time": "{minute}", "weekdays": [], "active": true }} ]"#
            )),
        ),
        (200, r#"{ "status": "started" }"#),
        (200, r#"{ "status": "stopped" }"#),
    ]);

    let mut watch = WatchProcess::spawn(&fake.url, &dir.path().join("absent.json"));
    watch.wait_for("Watching 1 alarm(s)");
    watch.wait_for("ALARM 1 ringing");
    watch.type_line("stop");
    watch.wait_for("Alarm 1 stopped.");
    watch.finish();

    let paths = fake
        .finish()
        .into_iter()
        .map(|request| request.trim_end().to_string())
        .collect::<Vec<_>>();
    assert_eq!(
        paths,
        vec!["GET /alarms", "POST /start_alarm", "POST /stop_alarm"]
    );
}

#[test]
fn failed_device_start_does_not_hold_the_ring_slot() {
    let dir = tempdir().expect("tempdir");
    let minute = current_minute();
    let fake = FakeBackend::start(vec![
        (
            200,
            leak(format!(
                r#"[
                    {{ "id": 1, "time": "{minute}", "weekdays": [], "active": true }},
                    {{ "id": 2, "time": "{minute}", "weekdays": [], "active": true }}
                ]"#
            )),
        ),
        (500, r#"{ "message": "speaker busy" }"#),
        (200, r#"{ "status": "started" }"#),
    ]);

    let mut watch = WatchProcess::spawn(&fake.url, &dir.path().join("absent.json"));
    watch.wait_for("ALARM 1 could not ring on the device");
    watch.wait_for("ALARM 2 ringing");
    let output = watch.finish();

    assert!(output.iter().any(|line| line.contains("speaker busy")));
    assert!(!output.iter().any(|line| line.contains("ALARM 1 ringing")));
    let paths = fake
        .finish()
        .into_iter()
        .map(|request| request.trim_end().to_string())
        .collect::<Vec<_>>();
    assert_eq!(
        paths,
        vec!["GET /alarms", "POST /start_alarm", "POST /start_alarm"]
    );
}
