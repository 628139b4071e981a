use std::time::Duration;

/// Errors surfaced by the communicator to command issuers.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Link-level error.
    #[error("transport error: {0}")]
    Transport(#[from] mastercomm_transport::TransportError),

    /// A request could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] mastercomm_protocol::ProtocolError),

    /// The master did not answer in time.
    #[error("communication timed out after {0:?}")]
    Timeout(Duration),

    /// The answer arrived but its checksum is wrong.
    #[error("crc check failed")]
    CrcCheckFailed,

    /// Normal traffic is blocked while the master's CLI is open.
    #[error("master is in maintenance mode")]
    InMaintenanceMode,

    /// A maintenance call was made outside maintenance mode.
    #[error("master is not in maintenance mode")]
    NotInMaintenanceMode,

    /// The link is owned by a firmware update.
    #[error("master unavailable: link is in update mode")]
    MasterUnavailable,

    /// The reader thread is not running.
    #[error("communicator is not running")]
    NotRunning,
}

impl LinkError {
    /// Whether retrying the same command may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LinkError::Timeout(_) | LinkError::MasterUnavailable)
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::Transport(err.into())
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
