//! End-to-end daemon test: start `keyward serve`, talk to it, feed it triggers.

#![cfg(unix)]

mod common;

use common::TestEnv;
use predicates::prelude::*;
use std::fs;
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::net::TcpStream;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

/// Kills the daemon when the test ends, pass or fail.
struct Daemon(Child);

impl Drop for Daemon {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn spawn_daemon(env: &TestEnv) -> Daemon {
    let child = Command::new(env!("CARGO_BIN_EXE_keyward"))
        .args(["serve", "--port", "0"])
        .env("KEYWARD_DIR", env.path())
        .env("RUST_LOG", "warn")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    Daemon(child)
}

fn wait_for(what: &str, mut ready: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(15);
    while Instant::now() < deadline {
        if ready() {
            return;
        }
        sleep(Duration::from_millis(50));
    }
    panic!("timed out waiting for {}", what);
}

/// Publish a trigger the way scripts should: write aside, then rename.
fn drop_trigger(dir: &Path, name: &str, content: &str) {
    let staging = dir.join(format!(".staging-{}", name));
    fs::write(&staging, content).unwrap();
    fs::rename(&staging, dir.join(name)).unwrap();
}

fn read_state(dir: &Path) -> (u16, String) {
    let raw = fs::read_to_string(dir.join("web_port")).unwrap();
    let (port, token) = raw.trim().split_once('|').unwrap();
    (port.parse().unwrap(), token.to_string())
}

/// Minimal HTTP/1.1 GET returning the status line and body.
fn http_get(port: u16, path: &str, token: Option<&str>) -> (String, String) {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let auth = token
        .map(|t| format!("X-Auth-Token: {}\r\n", t))
        .unwrap_or_default();
    write!(
        stream,
        "GET {} HTTP/1.1\r\nHost: 127.0.0.1:{}\r\n{}Connection: close\r\n\r\n",
        path, port, auth
    )
    .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    let status = response.lines().next().unwrap_or("").to_string();
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_default();
    (status, body)
}

#[test]
fn test_daemon_serves_and_consumes_triggers() {
    let env = TestEnv::new();
    // Queued before startup: drained on boot
    fs::write(env.path().join("apply_profile"), "dailyuse\n").unwrap();

    let _daemon = spawn_daemon(&env);
    let state_file = env.path().join("web_port");
    wait_for("state file", || state_file.exists());

    let mode = fs::metadata(&state_file).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);

    let (port, token) = read_state(env.path());
    assert_ne!(port, 0);

    wait_for("startup trigger", || {
        !env.path().join("apply_profile").exists() && env.path().join("rkp_bypass").exists()
    });
    assert!(env.path().join("hide_sensitive_props").exists());

    let (status, _) = http_get(port, "/api/config", None);
    assert!(status.contains("401"), "{}", status);

    let (status, body) = http_get(port, "/api/config", Some(&token));
    assert!(status.contains("200"), "{}", status);
    assert!(body.contains("\"rkp_bypass\":true"));

    // Runtime trigger
    drop_trigger(env.path(), "apply_profile", "maximal");
    wait_for("runtime trigger", || {
        !env.path().join("apply_profile").exists() && env.path().join("tee_broken_mode").exists()
    });

    // Unknown profile: consumed, nothing changed
    drop_trigger(env.path(), "apply_profile", "turbo");
    wait_for("unknown trigger", || !env.path().join("apply_profile").exists());
    assert!(env.path().join("global_mode").exists());

    env.keyward()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"running\":true"))
        .stdout(predicate::str::contains(format!("\"port\":{}", port)));
}
