use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use mastercomm_protocol::{api, Fields, MasterCommandSpec, Printable};
use mastercomm_transport::{LinkStream, TransportError};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::consumer::{Consumer, Registration};
use crate::demux::{Demux, DemuxEvent};
use crate::error::{LinkError, Result};
use crate::stats::{CommandHistograms, CommunicationStats, DebugBuffer, DebugLog, StatsState};
use crate::sync::{Event, HandoffLock};

const READ_CHUNK_SIZE: usize = 1024;

/// Marker ending a passthrough answer.
const PASSTHROUGH_END: &[u8] = b"\r\n\r\n";

/// Leaves the master's command line interface.
const CLI_EXIT: &[u8] = b"exit\r\n";

/// Timeouts and startup behavior of a [`MasterCommunicator`].
#[derive(Debug, Clone)]
pub struct CommunicatorConfig {
    /// Default wait for a command response. Default: 2s.
    pub command_timeout: Duration,
    /// How long a passthrough exchange may hold the command lock. Default: 200ms.
    pub passthrough_timeout: Duration,
    /// Age after which debug buffer entries are dropped. Default: 300s.
    pub debug_buffer_duration: Duration,
    /// Readiness poll of the reader thread; bounds `stop()` latency. Default: 250ms.
    pub read_poll_interval: Duration,
    /// Sleep of the reader thread while in update mode. Default: 100ms.
    pub update_poll_interval: Duration,
    /// Wait of a single `get_maintenance_data` call. Default: 1s.
    pub maintenance_read_timeout: Duration,
    /// Flush the master's input on `start()`. Default: true.
    pub init_master: bool,
    /// Drain wait after each step of an input flush. Default: 1s.
    pub flush_timeout: Duration,
}

impl Default for CommunicatorConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(2),
            passthrough_timeout: Duration::from_millis(200),
            debug_buffer_duration: Duration::from_secs(300),
            read_poll_interval: Duration::from_millis(250),
            update_poll_interval: Duration::from_millis(100),
            maintenance_read_timeout: Duration::from_secs(1),
            init_master: true,
            flush_timeout: Duration::from_secs(1),
        }
    }
}

/// Who currently owns the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkMode {
    /// Commands and responses; unclaimed bytes go to passthrough.
    #[default]
    Normal,
    /// The master's CLI is open; unclaimed bytes go to the maintenance queue.
    Maintenance,
    /// A firmware update owns the link; nothing is read or written.
    Update,
}

/// Engine multiplexing commands, passthrough and maintenance over one link.
///
/// One instance per physical link. All methods take `&self`; share the
/// communicator between threads with an `Arc`.
pub struct MasterCommunicator {
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    config: CommunicatorConfig,
    writer: Mutex<LinkStream>,
    command_lock: HandoffLock,
    cid: AtomicU8,
    mode: Mutex<LinkMode>,
    running: AtomicBool,
    consumers: Mutex<Vec<Registration>>,

    passthrough_enabled: AtomicBool,
    passthrough_active: AtomicBool,
    passthrough_done: Event,
    passthrough_tx: Sender<Bytes>,
    passthrough_rx: Mutex<Receiver<Bytes>>,

    maintenance_tx: Sender<Bytes>,
    maintenance_rx: Mutex<Receiver<Bytes>>,

    stats: Mutex<StatsState>,
    histograms: Mutex<CommandHistograms>,
    debug_log: Mutex<DebugLog>,
}

impl MasterCommunicator {
    /// Wrap a connected link. Nothing is read until [`start`](Self::start).
    pub fn new(link: LinkStream, config: CommunicatorConfig) -> Self {
        let (passthrough_tx, passthrough_rx) = mpsc::channel();
        let (maintenance_tx, maintenance_rx) = mpsc::channel();
        let debug_log = DebugLog::new(config.debug_buffer_duration);
        Self {
            shared: Arc::new(Shared {
                config,
                writer: Mutex::new(link),
                command_lock: HandoffLock::default(),
                cid: AtomicU8::new(1),
                mode: Mutex::new(LinkMode::Normal),
                running: AtomicBool::new(false),
                consumers: Mutex::new(Vec::new()),
                passthrough_enabled: AtomicBool::new(false),
                passthrough_active: AtomicBool::new(false),
                passthrough_done: Event::default(),
                passthrough_tx,
                passthrough_rx: Mutex::new(passthrough_rx),
                maintenance_tx,
                maintenance_rx: Mutex::new(maintenance_rx),
                stats: Mutex::new(StatsState::default()),
                histograms: Mutex::new(CommandHistograms::default()),
                debug_log: Mutex::new(debug_log),
            }),
            reader: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CommunicatorConfig {
        &self.shared.config
    }

    /// Start the reader thread, flushing the master's input first when
    /// `init_master` is set. Starting a running communicator is a no-op; a
    /// reader that exited on a link error is replaced.
    pub fn start(&self) -> Result<()> {
        let mut reader = self.reader.lock();
        if let Some(handle) = reader.take() {
            if !handle.is_finished() {
                *reader = Some(handle);
                return Ok(());
            }
            if handle.join().is_err() {
                error!("master read thread panicked");
            }
        }

        let link = {
            let mut writer = self.shared.writer.lock();
            if self.shared.config.init_master {
                writer.flush_input(self.shared.config.flush_timeout)?;
            }
            writer.try_clone()?
        };

        self.shared.running.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("masterread".to_string())
            .spawn(move || read_loop(&shared, link));
        match handle {
            Ok(handle) => {
                *reader = Some(handle);
                debug!("master communicator started");
                Ok(())
            }
            Err(err) => {
                self.shared.running.store(false, Ordering::Release);
                Err(err.into())
            }
        }
    }

    /// Stop and join the reader thread.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.reader.lock().take() {
            if handle.join().is_err() {
                error!("master read thread panicked");
            }
        }
        debug!("master communicator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn link_mode(&self) -> LinkMode {
        *self.shared.mode.lock()
    }

    /// Hand the link to a firmware update. Reads and writes stop until
    /// [`update_mode_stop`](Self::update_mode_stop).
    pub fn update_mode_start(&self) -> Result<()> {
        let mut mode = self.shared.mode.lock();
        if *mode == LinkMode::Maintenance {
            return Err(LinkError::InMaintenanceMode);
        }
        *mode = LinkMode::Update;
        info!("master link in update mode");
        Ok(())
    }

    /// Take the link back after an update; the master's input is flushed.
    pub fn update_mode_stop(&self) -> Result<()> {
        let flushed = self
            .shared
            .writer
            .lock()
            .flush_input(self.shared.config.flush_timeout);
        let mut mode = self.shared.mode.lock();
        if *mode == LinkMode::Update {
            *mode = LinkMode::Normal;
        }
        info!("master link left update mode");
        flushed?;
        Ok(())
    }

    /// Route unclaimed bytes to the passthrough queue.
    pub fn enable_passthrough(&self) {
        self.shared.passthrough_enabled.store(true, Ordering::Release);
    }

    /// Add a consumer to the routing table.
    ///
    /// One-shot consumers leave the table once delivered; background
    /// consumers stay until stopped.
    pub fn register_consumer(&self, consumer: impl Into<Registration>) {
        let registration = consumer.into();
        let mut consumers = self.shared.consumers.lock();
        consumers.retain(Registration::is_active);
        consumers.push(registration);
    }

    fn unregister(&self, registration: &Registration) {
        self.shared
            .consumers
            .lock()
            .retain(|other| !other.same(registration));
    }

    /// Next communication id: 1 to 255, wrapping, never 0.
    pub(crate) fn next_cid(&self) -> u8 {
        self.shared
            .cid
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cid| Some(cid % 255 + 1))
            .unwrap_or_else(|cid| cid)
    }

    /// Send a command and wait for its response with the configured timeout.
    pub fn do_command(&self, spec: &MasterCommandSpec, fields: &Fields) -> Result<Fields> {
        self.do_command_with(spec, fields, self.shared.config.command_timeout, false)
    }

    /// Send a command and wait for its response.
    ///
    /// With `extended_crc` the action code is covered by request and
    /// response checksums. A timed out consumer is removed from the routing
    /// table; a late response then ends up in passthrough.
    pub fn do_command_with(
        &self,
        spec: &MasterCommandSpec,
        fields: &Fields,
        timeout: Duration,
        extended_crc: bool,
    ) -> Result<Fields> {
        match self.link_mode() {
            LinkMode::Maintenance => return Err(LinkError::InMaintenanceMode),
            LinkMode::Update => return Err(LinkError::MasterUnavailable),
            LinkMode::Normal => {}
        }
        if !self.is_running() {
            return Err(LinkError::NotRunning);
        }

        let cid = self.next_cid();
        let input = spec.create_input(cid, fields, extended_crc)?;
        let action = spec.action_name();
        let consumer = Consumer::new(Arc::new(spec.clone()), cid);
        let registration = Registration::from(&consumer);

        let _command = self.shared.command_lock.guard();
        self.shared.histograms.lock().count_total(&action);
        self.register_consumer(registration.clone());
        if let Err(err) = self.write(&input) {
            self.unregister(&registration);
            return Err(err);
        }

        match consumer.get(timeout) {
            Ok(output) => {
                if spec.output_has_crc() && !spec.verify_crc(&output, extended_crc) {
                    warn!(%action, cid, "crc check failed");
                    return Err(LinkError::CrcCheckFailed);
                }
                self.shared.stats.lock().record_success();
                self.shared.histograms.lock().count_success(&action);
                Ok(output.into_fields())
            }
            Err(err) => {
                self.unregister(&registration);
                // Older slave modules do not implement FV; its timeouts are expected.
                if spec.action() != api::FIRMWARE_VERSION_ACTION {
                    self.shared.stats.lock().record_timeout();
                }
                self.shared.histograms.lock().count_timeout(&action);
                warn!(%action, cid, ?timeout, "command timed out");
                Err(err)
            }
        }
    }

    /// Send an ad hoc command: `data` (or 13 bytes of padding) in, `size`
    /// raw bytes back.
    pub fn do_raw_action(
        &self,
        action: [u8; 2],
        size: usize,
        data: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<Fields> {
        let spec = api::raw_action(action, size, data.map(<[u8]>::len));
        let mut fields = Fields::new();
        if let Some(data) = data {
            fields.insert("data", data);
        }
        self.do_command_with(&spec, &fields, timeout, false)
    }

    fn write(&self, data: &[u8]) -> Result<()> {
        self.shared.write(data)
    }

    /// Write raw bytes for an external passthrough client.
    ///
    /// The first call of an exchange takes the command lock; it is released
    /// once the answer's `\r\n\r\n` marker has been read through
    /// [`get_passthrough_data`](Self::get_passthrough_data) or after
    /// `passthrough_timeout`.
    pub fn send_passthrough_data(&self, data: &[u8]) -> Result<()> {
        match self.link_mode() {
            LinkMode::Maintenance => return Err(LinkError::InMaintenanceMode),
            LinkMode::Update => return Err(LinkError::MasterUnavailable),
            LinkMode::Normal => {}
        }

        if !self.shared.passthrough_active.load(Ordering::Acquire) {
            self.shared.command_lock.acquire();
            self.shared.passthrough_done.clear();
            self.shared.passthrough_active.store(true, Ordering::Release);

            let shared = Arc::clone(&self.shared);
            let waiter = thread::Builder::new()
                .name("passthroughwait".to_string())
                .spawn(move || shared.passthrough_wait());
            if let Err(err) = waiter {
                self.shared.passthrough_active.store(false, Ordering::Release);
                self.shared.command_lock.release();
                return Err(err.into());
            }
        }

        self.write(data)
    }

    /// Block until unclaimed bytes arrive.
    pub fn get_passthrough_data(&self) -> Bytes {
        loop {
            if let Some(data) = self.get_passthrough_data_timeout(Duration::from_secs(1)) {
                return data;
            }
        }
    }

    /// Wait up to `timeout` for unclaimed bytes.
    pub fn get_passthrough_data_timeout(&self, timeout: Duration) -> Option<Bytes> {
        let data = self.shared.passthrough_rx.lock().recv_timeout(timeout).ok()?;
        if data.ends_with(PASSTHROUGH_END) {
            self.shared.passthrough_done.set();
        }
        Some(data)
    }

    /// Open the master's CLI. Queued maintenance output is discarded first.
    pub fn start_maintenance_mode(&self) -> Result<()> {
        // Drained without holding `mode`: the reader thread needs it to route.
        let stale = self.shared.maintenance_rx.lock().try_iter().count();
        if stale > 0 {
            debug!(stale, "discarded stale maintenance data");
        }
        {
            let mut mode = self.shared.mode.lock();
            match *mode {
                LinkMode::Maintenance => return Err(LinkError::InMaintenanceMode),
                LinkMode::Update => return Err(LinkError::MasterUnavailable),
                LinkMode::Normal => {}
            }
            *mode = LinkMode::Maintenance;
        }
        info!("entering maintenance mode");

        let input = api::to_cli_mode().create_input(0, &Fields::new(), false)?;
        self.send_maintenance_data(&input)
    }

    pub fn send_maintenance_data(&self, data: &[u8]) -> Result<()> {
        if !self.in_maintenance_mode() {
            return Err(LinkError::NotInMaintenanceMode);
        }
        self.write(data)
    }

    /// Wait up to `maintenance_read_timeout` for CLI output. `None` when
    /// nothing arrived.
    pub fn get_maintenance_data(&self) -> Result<Option<Bytes>> {
        if !self.in_maintenance_mode() {
            return Err(LinkError::NotInMaintenanceMode);
        }
        let timeout = self.shared.config.maintenance_read_timeout;
        Ok(self.shared.maintenance_rx.lock().recv_timeout(timeout).ok())
    }

    /// Close the master's CLI if it is open.
    pub fn stop_maintenance_mode(&self) -> Result<()> {
        let sent = if self.in_maintenance_mode() {
            self.write(CLI_EXIT)
        } else {
            Ok(())
        };
        let mut mode = self.shared.mode.lock();
        if *mode == LinkMode::Maintenance {
            *mode = LinkMode::Normal;
            info!("left maintenance mode");
        }
        sent
    }

    pub fn in_maintenance_mode(&self) -> bool {
        self.link_mode() == LinkMode::Maintenance
    }

    pub fn get_communication_statistics(&self) -> CommunicationStats {
        self.shared.stats.lock().snapshot()
    }

    pub fn reset_communication_statistics(&self) {
        self.shared.stats.lock().reset();
    }

    pub fn get_command_histograms(&self) -> CommandHistograms {
        self.shared.histograms.lock().clone()
    }

    pub fn reset_command_histograms(&self) {
        *self.shared.histograms.lock() = CommandHistograms::default();
    }

    /// The newest `amount` reads and writes still within the debug window.
    pub fn get_debug_buffer(&self, amount: usize) -> DebugBuffer {
        self.shared.debug_log.lock().snapshot(amount)
    }

    /// Seconds since the last successful command; 0 if none succeeded yet.
    pub fn get_seconds_since_last_success(&self) -> f64 {
        self.shared
            .stats
            .lock()
            .last_success()
            .map(|at| at.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl Drop for MasterCommunicator {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for MasterCommunicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterCommunicator")
            .field("mode", &self.link_mode())
            .field("running", &self.is_running())
            .field("config", &self.shared.config)
            .finish()
    }
}

impl Shared {
    fn mode(&self) -> LinkMode {
        *self.mode.lock()
    }

    fn write(&self, data: &[u8]) -> Result<()> {
        if self.mode() == LinkMode::Update {
            return Err(LinkError::MasterUnavailable);
        }
        let mut writer = self.writer.lock();
        debug!(data = %Printable(data), "writing to master");
        self.debug_log.lock().record_write(data);
        writer.write_all_flush(data)?;
        self.stats.lock().add_written(data.len());
        Ok(())
    }

    fn passthrough_wait(&self) {
        if !self.passthrough_done.wait_timeout(self.config.passthrough_timeout) {
            info!("timed out on passthrough message");
        }
        self.passthrough_active.store(false, Ordering::Release);
        self.command_lock.release();
    }

    fn push_passthrough(&self, data: Bytes) {
        if self.passthrough_enabled.load(Ordering::Acquire) {
            // The receiver lives in `self`, so the send cannot fail.
            let _ = self.passthrough_tx.send(data);
        }
    }

    fn handle(&self, event: DemuxEvent) {
        match event {
            DemuxEvent::Completed {
                registration,
                output,
            } => {
                if let Some(copy) = registration.passthrough_copy(&output) {
                    self.push_passthrough(copy);
                }
                registration.deliver(output);
            }
            DemuxEvent::Leftovers(data) => {
                if self.mode() == LinkMode::Maintenance {
                    let _ = self.maintenance_tx.send(data);
                } else {
                    self.push_passthrough(data);
                }
            }
        }
    }
}

fn read_loop(shared: &Shared, mut link: LinkStream) {
    let mut demux = Demux::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    while shared.running.load(Ordering::Acquire) {
        if shared.mode() == LinkMode::Update {
            thread::sleep(shared.config.update_poll_interval);
            continue;
        }

        match link.wait_readable(shared.config.read_poll_interval) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(err) => {
                error!(%err, "polling master link failed");
                break;
            }
        }

        let n = match link.read_available(&mut chunk) {
            Ok(n) => n,
            Err(TransportError::Closed) => {
                warn!("master link closed");
                break;
            }
            Err(err) => {
                error!(%err, "reading master link failed");
                break;
            }
        };
        let data = &chunk[..n];
        shared.stats.lock().add_read(n);
        shared.debug_log.lock().record_read(data);
        debug!(data = %Printable(data), "read from master");

        let events = demux.feed(data, &mut shared.consumers.lock());
        for event in events {
            shared.handle(event);
        }
    }
    shared.running.store(false, Ordering::Release);
    debug!("master read thread exiting");
}
