#![allow(dead_code)]

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mastercomm_link::{CommunicatorConfig, MasterCommunicator};
use mastercomm_protocol::{api, Fields, MasterCommandSpec};
use mastercomm_transport::LinkStream;

/// The other end of the link: a scripted stand-in for the master.
pub struct FakeMaster {
    stream: UnixStream,
}

impl FakeMaster {
    /// Read exactly `expected.len()` bytes and check them.
    pub fn expect(&mut self, expected: &[u8]) {
        let mut got = vec![0u8; expected.len()];
        self.stream
            .read_exact(&mut got)
            .expect("master should receive request");
        assert_eq!(got, expected, "unexpected request bytes");
    }

    /// Read exactly `len` bytes, whatever they are.
    pub fn take(&mut self, len: usize) -> Vec<u8> {
        let mut got = vec![0u8; len];
        self.stream
            .read_exact(&mut got)
            .expect("master should receive bytes");
        got
    }

    pub fn write(&mut self, data: &[u8]) {
        self.stream
            .write_all(data)
            .expect("master should be able to reply");
    }

    /// In a background thread: wait for `request`, then send `reply`.
    pub fn reply_to(mut self, request: Vec<u8>, reply: Vec<u8>) -> JoinHandle<FakeMaster> {
        thread::spawn(move || {
            self.expect(&request);
            self.write(&reply);
            self
        })
    }

    /// Read whatever arrives within `wait`.
    pub fn read_for(&mut self, wait: Duration) -> Vec<u8> {
        self.stream
            .set_read_timeout(Some(Duration::from_millis(20)))
            .expect("timeout should apply");
        let deadline = Instant::now() + wait;
        let mut out = Vec::new();
        let mut chunk = [0u8; 256];
        while Instant::now() < deadline {
            match self.stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => out.extend_from_slice(&chunk[..n]),
                Err(_) => continue,
            }
        }
        self.stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("timeout should apply");
        out
    }
}

pub fn test_config() -> CommunicatorConfig {
    CommunicatorConfig {
        init_master: false,
        read_poll_interval: Duration::from_millis(20),
        flush_timeout: Duration::from_millis(50),
        ..CommunicatorConfig::default()
    }
}

/// A started communicator wired to a fake master.
pub fn start(config: CommunicatorConfig) -> (MasterCommunicator, FakeMaster) {
    let comm = build(config);
    comm.0.start().expect("communicator should start");
    comm
}

/// A communicator wired to a fake master, not yet started.
pub fn build(config: CommunicatorConfig) -> (MasterCommunicator, FakeMaster) {
    let (ours, theirs) = UnixStream::pair().expect("socket pair should open");
    theirs
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("timeout should apply");
    let comm = MasterCommunicator::new(LinkStream::from_unix(ours), config);
    (comm, FakeMaster { stream: theirs })
}

pub fn action_fields() -> Fields {
    Fields::new().with("action_type", 1u8).with("action_number", 2u8)
}

pub fn ba_request(cid: u8) -> Vec<u8> {
    api::basic_action()
        .create_input(cid, &action_fields(), false)
        .expect("request should encode")
        .to_vec()
}

pub fn ba_reply(cid: u8) -> Vec<u8> {
    reply(&api::basic_action(), cid, &Fields::new().with("resp", "OK"))
}

pub fn reply(spec: &MasterCommandSpec, cid: u8, fields: &Fields) -> Vec<u8> {
    spec.create_output(cid, fields)
        .expect("reply should encode")
        .to_vec()
}

/// Collect passthrough chunks until `len` bytes arrived or `wait` elapsed.
pub fn passthrough_bytes(comm: &MasterCommunicator, len: usize, wait: Duration) -> Vec<u8> {
    let deadline = Instant::now() + wait;
    let mut out = Vec::new();
    while out.len() < len && Instant::now() < deadline {
        if let Some(data) = comm.get_passthrough_data_timeout(Duration::from_millis(50)) {
            out.extend_from_slice(&data);
        }
    }
    out
}
