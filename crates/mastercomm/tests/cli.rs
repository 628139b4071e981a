#![cfg(all(unix, feature = "cli"))]

use std::io::{Read, Write};
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::process::Command;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mastercomm::protocol::{api, Fields};

fn unique_socket(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/mastercomm-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir.join("master.sock")
}

/// Accept one connection, read `request` and answer with `reply` if given.
fn fake_master(path: &PathBuf, request: Vec<u8>, reply: Option<Vec<u8>>) -> JoinHandle<Vec<u8>> {
    let listener = UnixListener::bind(path).expect("fake master should bind");
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("cli should connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("timeout should apply");
        let mut got = vec![0u8; request.len()];
        stream.read_exact(&mut got).expect("request should arrive");
        if let Some(reply) = reply {
            stream.write_all(&reply).expect("reply should be written");
        }
        thread::sleep(Duration::from_millis(500));
        got
    })
}

fn ba_request(cid: u8) -> Vec<u8> {
    let fields = Fields::new().with("action_type", 1u8).with("action_number", 2u8);
    api::basic_action()
        .create_input(cid, &fields, false)
        .unwrap()
        .to_vec()
}

#[test]
fn action_prints_json_response() {
    let sock = unique_socket("action");
    let reply = api::basic_action()
        .create_output(1, &Fields::new().with("resp", "OK"))
        .unwrap()
        .to_vec();
    let master = fake_master(&sock, ba_request(1), Some(reply));

    let output = Command::new(env!("CARGO_BIN_EXE_mastercomm"))
        .args(["--log-level", "error", "--format", "json", "--no-init"])
        .arg("--port")
        .arg(format!("unix:{}", sock.display()))
        .args(["action", "1", "2"])
        .output()
        .expect("action should run");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"action\":\"BA\""));
    assert!(stdout.contains("\"resp\":\"OK\""));
    assert_eq!(master.join().unwrap(), ba_request(1));
    let _ = std::fs::remove_dir_all(sock.parent().unwrap());
}

#[test]
fn action_timeout_returns_124() {
    let sock = unique_socket("timeout");
    let master = fake_master(&sock, ba_request(1), None);

    let output = Command::new(env!("CARGO_BIN_EXE_mastercomm"))
        .args(["--log-level", "error", "--no-init", "--timeout", "200ms"])
        .arg("--port")
        .arg(format!("unix:{}", sock.display()))
        .args(["action", "1", "2"])
        .output()
        .expect("action should run");

    assert_eq!(output.status.code(), Some(124));
    assert!(String::from_utf8_lossy(&output.stderr).contains("command failed"));
    master.join().unwrap();
    let _ = std::fs::remove_dir_all(sock.parent().unwrap());
}

#[test]
fn missing_port_is_a_usage_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_mastercomm"))
        .env_remove("MASTERCOMM_PORT")
        .args(["--log-level", "error", "action", "1", "2"])
        .output()
        .expect("action should run");
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_mastercomm"))
        .arg("version")
        .output()
        .expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with(&format!("mastercomm {}", env!("CARGO_PKG_VERSION"))));
}
