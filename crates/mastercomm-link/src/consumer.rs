//! Registrations awaiting responses from the master.
//!
//! A [`Consumer`] waits for exactly one response and is dropped from the
//! routing table once it is delivered. A [`BackgroundConsumer`] stays
//! registered and hands every matching response to a callback on its own
//! thread.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use mastercomm_protocol::{CommandOutput, Fields, MasterCommandSpec, Prefix};
use tracing::{debug, error};

use crate::error::{LinkError, Result};

/// Poll interval of the background delivery thread; bounds `stop()` latency.
const DELIVERY_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// One-shot consumer for the response to a single request.
#[derive(Debug)]
pub struct Consumer {
    slot: Arc<OneShotSlot>,
    rx: Receiver<CommandOutput>,
}

#[derive(Debug)]
struct OneShotSlot {
    spec: Arc<MasterCommandSpec>,
    cid: u8,
    tx: SyncSender<CommandOutput>,
}

impl Consumer {
    pub fn new(spec: Arc<MasterCommandSpec>, cid: u8) -> Self {
        let (tx, rx) = mpsc::sync_channel(1);
        Self {
            slot: Arc::new(OneShotSlot { spec, cid, tx }),
            rx,
        }
    }

    pub fn cid(&self) -> u8 {
        self.slot.cid
    }

    /// Routing key of the awaited response.
    pub fn prefix(&self) -> Prefix {
        self.slot.spec.prefix(self.slot.cid)
    }

    /// Block until the response arrives.
    ///
    /// Returns [`LinkError::Timeout`] when nothing was delivered in time.
    pub fn get(&self, timeout: Duration) -> Result<CommandOutput> {
        self.rx
            .recv_timeout(timeout)
            .map_err(|_| LinkError::Timeout(timeout))
    }
}

/// Callback invoked with the fields of every matching response.
pub type BackgroundCallback = Box<dyn Fn(&Fields) + Send + 'static>;

/// Long-lived consumer that hands each matching response to a callback.
///
/// Responses are queued by the reader thread and delivered on a dedicated
/// thread, so a slow callback never stalls the link.
pub struct BackgroundConsumer {
    shared: Arc<BackgroundShared>,
    worker: Option<JoinHandle<()>>,
}

struct BackgroundShared {
    spec: Arc<MasterCommandSpec>,
    cid: u8,
    tx: Sender<CommandOutput>,
    running: AtomicBool,
    send_to_passthrough: AtomicBool,
}

impl BackgroundConsumer {
    /// Start a consumer for responses of `spec` carrying `cid`.
    pub fn new<F>(spec: Arc<MasterCommandSpec>, cid: u8, callback: F) -> Result<Self>
    where
        F: Fn(&Fields) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(BackgroundShared {
            spec,
            cid,
            tx,
            running: AtomicBool::new(true),
            send_to_passthrough: AtomicBool::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let callback: BackgroundCallback = Box::new(callback);
        let worker = thread::Builder::new()
            .name("masterdeliver".to_string())
            .spawn(move || delivery_loop(&worker_shared, &rx, &callback))?;

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Also forward a copy of every matched response (prefix included) to
    /// the passthrough queue.
    pub fn with_passthrough(self, enabled: bool) -> Self {
        self.shared
            .send_to_passthrough
            .store(enabled, Ordering::Release);
        self
    }

    pub fn cid(&self) -> u8 {
        self.shared.cid
    }

    pub fn prefix(&self) -> Prefix {
        self.shared.spec.prefix(self.shared.cid)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Stop routing and delivery. No callback runs after this returns.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(prefix = ?self.prefix(), "background delivery thread panicked");
            }
        }
    }
}

impl Drop for BackgroundConsumer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for BackgroundConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundConsumer")
            .field("spec", &self.shared.spec.to_string())
            .field("cid", &self.shared.cid)
            .field("running", &self.is_running())
            .finish()
    }
}

fn delivery_loop(
    shared: &BackgroundShared,
    rx: &Receiver<CommandOutput>,
    callback: &BackgroundCallback,
) {
    while shared.running.load(Ordering::Acquire) {
        let output = match rx.recv_timeout(DELIVERY_POLL_INTERVAL) {
            Ok(output) => output,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        // Re-check so nothing is delivered once stop() has been called.
        if !shared.running.load(Ordering::Acquire) {
            break;
        }
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(output.fields())));
        if outcome.is_err() {
            error!(
                spec = %shared.spec,
                "unexpected panic delivering background consumer data"
            );
        }
    }
    debug!(spec = %shared.spec, cid = shared.cid, "background delivery stopped");
}

/// Routing table entry for a consumer.
///
/// Obtained from a [`Consumer`] or [`BackgroundConsumer`] with `From` and
/// passed to [`MasterCommunicator::register_consumer`](crate::MasterCommunicator::register_consumer).
#[derive(Clone)]
pub struct Registration {
    kind: RegistrationKind,
}

#[derive(Clone)]
enum RegistrationKind {
    OneShot(Arc<OneShotSlot>),
    Background(Arc<BackgroundShared>),
}

impl Registration {
    pub(crate) fn spec(&self) -> &MasterCommandSpec {
        match &self.kind {
            RegistrationKind::OneShot(slot) => &slot.spec,
            RegistrationKind::Background(shared) => &shared.spec,
        }
    }

    fn cid(&self) -> u8 {
        match &self.kind {
            RegistrationKind::OneShot(slot) => slot.cid,
            RegistrationKind::Background(shared) => shared.cid,
        }
    }

    pub fn prefix(&self) -> Prefix {
        self.spec().prefix(self.cid())
    }

    pub(crate) fn is_one_shot(&self) -> bool {
        matches!(self.kind, RegistrationKind::OneShot(_))
    }

    /// Stopped background consumers are no longer routed.
    pub(crate) fn is_active(&self) -> bool {
        match &self.kind {
            RegistrationKind::OneShot(_) => true,
            RegistrationKind::Background(shared) => shared.running.load(Ordering::Acquire),
        }
    }

    pub(crate) fn same(&self, other: &Registration) -> bool {
        match (&self.kind, &other.kind) {
            (RegistrationKind::OneShot(a), RegistrationKind::OneShot(b)) => Arc::ptr_eq(a, b),
            (RegistrationKind::Background(a), RegistrationKind::Background(b)) => {
                Arc::ptr_eq(a, b)
            }
            _ => false,
        }
    }

    /// Full response bytes to forward to the passthrough queue, if this
    /// consumer asked for it.
    pub(crate) fn passthrough_copy(&self, output: &CommandOutput) -> Option<Bytes> {
        let RegistrationKind::Background(shared) = &self.kind else {
            return None;
        };
        if !shared.send_to_passthrough.load(Ordering::Acquire) {
            return None;
        }
        let raw = output.actual_bytes();
        let mut data = BytesMut::with_capacity(3 + raw.len());
        data.put_slice(&self.prefix());
        data.put_slice(raw);
        Some(data.freeze())
    }

    /// Hand over a decoded response. Never blocks.
    pub(crate) fn deliver(&self, output: CommandOutput) {
        let delivered = match &self.kind {
            RegistrationKind::OneShot(slot) => slot.tx.try_send(output).is_ok(),
            RegistrationKind::Background(shared) => shared.tx.send(output).is_ok(),
        };
        if !delivered {
            debug!(prefix = ?self.prefix(), "response arrived after its consumer went away");
        }
    }
}

impl From<&Consumer> for Registration {
    fn from(consumer: &Consumer) -> Self {
        Self {
            kind: RegistrationKind::OneShot(Arc::clone(&consumer.slot)),
        }
    }
}

impl From<&BackgroundConsumer> for Registration {
    fn from(consumer: &BackgroundConsumer) -> Self {
        Self {
            kind: RegistrationKind::Background(Arc::clone(&consumer.shared)),
        }
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_one_shot() { "one-shot" } else { "background" };
        f.debug_struct("Registration")
            .field("kind", &kind)
            .field("prefix", &String::from_utf8_lossy(&self.prefix()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Instant;

    use mastercomm_protocol::{api, Consumed};

    use super::*;

    fn ol_output(wire: &[u8]) -> CommandOutput {
        match api::output_list().consume_output(wire, None).unwrap() {
            Consumed::Done { output, .. } => output,
            Consumed::Pending { .. } => panic!("expected a complete response"),
        }
    }

    #[test]
    fn consumer_times_out() {
        let consumer = Consumer::new(Arc::new(api::basic_action()), 1);
        let start = Instant::now();
        let err = consumer.get(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, LinkError::Timeout(_)));
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn consumer_receives_delivery() {
        let consumer = Consumer::new(Arc::new(api::output_list()), 7);
        assert_eq!(consumer.prefix(), *b"OL\x07");

        let registration = Registration::from(&consumer);
        assert!(registration.is_one_shot());
        registration.deliver(ol_output(b"\x01\x03\x0c\r\n"));
        // A second delivery is dropped, not blocked.
        registration.deliver(ol_output(b"\x00\r\n"));

        let output = consumer.get(Duration::from_secs(1)).unwrap();
        assert_eq!(output.fields()["outputs"].as_outputs().unwrap().len(), 1);
    }

    #[test]
    fn background_consumer_invokes_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut consumer = BackgroundConsumer::new(Arc::new(api::output_list()), 0, move |fields| {
            let outputs = fields["outputs"].as_outputs().unwrap().to_vec();
            sink.lock().unwrap().push(outputs);
        })
        .unwrap();

        let registration = Registration::from(&consumer);
        registration.deliver(ol_output(b"\x01\x03\x0c\r\n"));
        registration.deliver(ol_output(b"\x00\r\n"));

        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.lock().unwrap().len() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        consumer.stop();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0][0].dimmer, 20);
        assert!(seen[1].is_empty());
    }

    #[test]
    fn stopped_consumer_is_inactive_and_silent() {
        let calls = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&calls);
        let mut consumer = BackgroundConsumer::new(Arc::new(api::output_list()), 0, move |_| {
            *counter.lock().unwrap() += 1;
        })
        .unwrap();
        let registration = Registration::from(&consumer);
        assert!(registration.is_active());

        consumer.stop();
        assert!(!registration.is_active());
        registration.deliver(ol_output(b"\x00\r\n"));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn panicking_callback_does_not_kill_delivery() {
        let calls = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&calls);
        let mut consumer = BackgroundConsumer::new(Arc::new(api::output_list()), 0, move |_| {
            let mut calls = counter.lock().unwrap();
            *calls += 1;
            if *calls == 1 {
                drop(calls);
                panic!("first delivery fails");
            }
        })
        .unwrap();

        let registration = Registration::from(&consumer);
        registration.deliver(ol_output(b"\x00\r\n"));
        registration.deliver(ol_output(b"\x00\r\n"));

        let deadline = Instant::now() + Duration::from_secs(2);
        while *calls.lock().unwrap() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        consumer.stop();
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[test]
    fn passthrough_copy_includes_prefix() {
        let consumer = BackgroundConsumer::new(Arc::new(api::output_list()), 0, |_| {})
            .unwrap()
            .with_passthrough(true);
        let registration = Registration::from(&consumer);
        let copy = registration
            .passthrough_copy(&ol_output(b"\x01\x03\x0c\r\n"))
            .unwrap();
        assert_eq!(copy.as_ref(), b"OL\x00\x01\x03\x0c\r\n");

        let plain = BackgroundConsumer::new(Arc::new(api::output_list()), 0, |_| {}).unwrap();
        assert!(Registration::from(&plain)
            .passthrough_copy(&ol_output(b"\x00\r\n"))
            .is_none());
    }
}
