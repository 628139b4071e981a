use std::time::Duration;

use tracing::info;

use crate::error::{Result, TransportError};
use crate::stream::LinkStream;

/// Baud rate used by the master controller.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial line configuration (always 8N1, no flow control).
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyO5`.
    pub path: String,
    /// Line speed.
    pub baud_rate: u32,
    /// Driver-level read timeout for blocking reads.
    pub timeout: Duration,
}

impl SerialConfig {
    /// Configuration for `path` with the master's default line settings.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: Duration::from_secs(1),
        }
    }
}

impl LinkStream {
    /// Open a serial device.
    #[cfg(unix)]
    pub fn open_serial(config: &SerialConfig) -> Result<Self> {
        let port = serialport::new(config.path.as_str(), config.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .timeout(config.timeout)
            .open_native()
            .map_err(|source| TransportError::Open {
                path: config.path.clone(),
                source,
            })?;

        info!(path = %config.path, baud = config.baud_rate, "opened serial link");
        Ok(Self::from_serial(port))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_master_line_settings() {
        let cfg = SerialConfig::new("/dev/ttyO5");
        assert_eq!(cfg.path, "/dev/ttyO5");
        assert_eq!(cfg.baud_rate, 115_200);
        assert_eq!(cfg.timeout, Duration::from_secs(1));
    }

    #[test]
    fn open_missing_device_reports_path() {
        let cfg = SerialConfig::new("/dev/mastercomm-does-not-exist");
        let err = LinkStream::open_serial(&cfg).unwrap_err();
        match err {
            TransportError::Open { path, .. } => assert_eq!(path, "/dev/mastercomm-does-not-exist"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
