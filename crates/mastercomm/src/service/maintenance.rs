use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mastercomm_link::{LinkError, MasterCommunicator, Result};
use parking_lot::Mutex;
use tracing::{error, info};

/// Maintenance mode is closed after this long without input.
pub const DEFAULT_MAINTENANCE_TIMEOUT: Duration = Duration::from_secs(600);

struct SessionState {
    stopped: AtomicBool,
    last_send: Mutex<Instant>,
}

/// A line-oriented session on the master's command line interface.
///
/// Activating the session puts the master in maintenance mode. Output lines
/// are handed to the receiver callback; input lines go through
/// [`write`](Self::write). If nothing is written for `timeout` the session
/// closes itself and the master returns to normal operation.
pub struct MaintenanceSession {
    comm: Arc<MasterCommunicator>,
    state: Arc<SessionState>,
    reader: Option<JoinHandle<()>>,
}

impl MaintenanceSession {
    pub fn activate<F>(comm: Arc<MasterCommunicator>, timeout: Duration, receiver: F) -> Result<Self>
    where
        F: Fn(&str) + Send + 'static,
    {
        info!("activating maintenance mode");
        comm.start_maintenance_mode()?;

        let state = Arc::new(SessionState {
            stopped: AtomicBool::new(false),
            last_send: Mutex::new(Instant::now()),
        });

        let reader = {
            let comm = Arc::clone(&comm);
            let state = Arc::clone(&state);
            thread::Builder::new()
                .name("maintenanceread".into())
                .spawn(move || read_lines(&comm, &state, timeout, receiver))
        };
        let reader = match reader {
            Ok(handle) => handle,
            Err(err) => {
                let _ = comm.stop_maintenance_mode();
                return Err(err.into());
            }
        };

        Ok(Self {
            comm,
            state,
            reader: Some(reader),
        })
    }

    /// Send one command line; surrounding whitespace is replaced by `\r\n`.
    pub fn write(&self, message: &str) -> Result<()> {
        *self.state.last_send.lock() = Instant::now();
        let line = format!("{}\r\n", message.trim());
        self.comm.send_maintenance_data(line.as_bytes())
    }

    pub fn is_active(&self) -> bool {
        !self.state.stopped.load(Ordering::Acquire) && self.comm.in_maintenance_mode()
    }

    /// Leave maintenance mode and wait for the reader thread.
    pub fn deactivate(&mut self) {
        self.state.stopped.store(true, Ordering::Release);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MaintenanceSession {
    fn drop(&mut self) {
        self.deactivate();
    }
}

fn read_lines<F>(comm: &MasterCommunicator, state: &SessionState, timeout: Duration, receiver: F)
where
    F: Fn(&str),
{
    let mut buffer = String::new();
    while !state.stopped.load(Ordering::Acquire) {
        if state.last_send.lock().elapsed() > timeout {
            info!("stopping maintenance mode because of timeout");
            break;
        }

        let data = match comm.get_maintenance_data() {
            Ok(Some(data)) => data,
            Ok(None) => continue,
            Err(LinkError::NotInMaintenanceMode) => break,
            Err(err) => {
                error!(%err, "maintenance read failed");
                break;
            }
        };

        buffer.push_str(&String::from_utf8_lossy(&data));
        while let Some(end) = buffer.find('\n') {
            let line: String = buffer.drain(..=end).collect();
            let line = line.trim_end();
            if panic::catch_unwind(AssertUnwindSafe(|| receiver(line))).is_err() {
                error!(line, "unexpected panic in maintenance receiver");
            }
        }
    }

    state.stopped.store(true, Ordering::Release);
    info!("deactivating maintenance mode");
    if let Err(err) = comm.stop_maintenance_mode() {
        error!(%err, "could not leave maintenance mode");
    }
}
