use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mastercomm_link::{LinkError, MasterCommunicator, Result};
use mastercomm_protocol::Printable;
use mastercomm_transport::{LinkStream, TransportError};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const READ_CHUNK_SIZE: usize = 256;

/// Bridges a second serial link (the passthrough client) to the master.
///
/// Two threads run while the service is started: one copies passthrough
/// data from the master to the client, the other forwards whatever the
/// client writes to the master. Client data is dropped while the master is
/// in maintenance mode.
pub struct PassthroughService {
    comm: Arc<MasterCommunicator>,
    link: LinkStream,
    verbose: bool,
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl PassthroughService {
    /// Enables passthrough on `comm`; nothing is copied until [`start`](Self::start).
    pub fn new(comm: Arc<MasterCommunicator>, link: LinkStream) -> Self {
        comm.enable_passthrough();
        Self {
            comm,
            link,
            verbose: false,
            running: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
        }
    }

    /// Log every chunk at info level instead of debug.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let to_client = self.link.try_clone()?;
        let from_client = self.link.try_clone()?;

        let comm = Arc::clone(&self.comm);
        let running = Arc::clone(&self.running);
        let verbose = self.verbose;
        let reader = thread::Builder::new()
            .name("passthroughread".into())
            .spawn(move || master_to_client(&comm, to_client, &running, verbose))?;

        let comm = Arc::clone(&self.comm);
        let running = Arc::clone(&self.running);
        let writer = thread::Builder::new()
            .name("passthroughwrite".into())
            .spawn(move || client_to_master(&comm, from_client, &running, verbose))?;

        self.threads = vec![reader, writer];
        info!("passthrough service started");
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for PassthroughService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn master_to_client(
    comm: &MasterCommunicator,
    mut client: LinkStream,
    running: &AtomicBool,
    verbose: bool,
) {
    while running.load(Ordering::Acquire) {
        let Some(data) = comm.get_passthrough_data_timeout(POLL_INTERVAL) else {
            continue;
        };
        if verbose {
            info!(data = %Printable(&data), "data for passthrough");
        } else {
            debug!(data = %Printable(&data), "data for passthrough");
        }
        if let Err(err) = client.write_all_flush(&data) {
            warn!(%err, "passthrough client write failed");
            break;
        }
    }
    running.store(false, Ordering::Release);
}

fn client_to_master(
    comm: &MasterCommunicator,
    mut client: LinkStream,
    running: &AtomicBool,
    verbose: bool,
) {
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    while running.load(Ordering::Acquire) {
        match client.wait_readable(POLL_INTERVAL) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(err) => {
                warn!(%err, "passthrough client poll failed");
                break;
            }
        }
        let n = match client.read_available(&mut chunk) {
            Ok(n) => n,
            Err(TransportError::Closed) => {
                info!("passthrough client closed");
                break;
            }
            Err(err) => {
                warn!(%err, "passthrough client read failed");
                break;
            }
        };
        let data = &chunk[..n];
        if verbose {
            info!(data = %Printable(data), "data from passthrough");
        } else {
            debug!(data = %Printable(data), "data from passthrough");
        }
        match comm.send_passthrough_data(data) {
            Ok(()) => {}
            Err(LinkError::InMaintenanceMode) => {
                info!("dropped passthrough communication in maintenance mode");
            }
            Err(err) => warn!(%err, "could not forward passthrough data"),
        }
    }
    running.store(false, Ordering::Release);
}
