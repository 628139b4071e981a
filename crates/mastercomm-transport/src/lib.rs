//! Physical link to the master controller.
//!
//! The master is reached over a serial line. In test rigs and remote setups the
//! same byte stream is often bridged through a Unix domain socket (`socat`), so
//! both are exposed behind a single [`LinkStream`] type.
//!
//! This is the lowest layer of mastercomm. The protocol engine only needs four
//! things from a link: `read`, `write`, an independent clone for the reader
//! thread, and readiness polling with a bounded wait.

pub mod error;
pub mod serial;
pub mod stream;

pub use error::{Result, TransportError};
pub use serial::{SerialConfig, DEFAULT_BAUD_RATE};
pub use stream::LinkStream;
