//! Serial link to a home automation master controller.
//!
//! mastercomm frames commands for the master, routes its interleaved replies
//! and events back to the callers waiting for them, and hands every other
//! byte to a passthrough or maintenance client.
//!
//! # Crate Structure
//!
//! - [`transport`]: the physical link (serial TTY or socket bridge)
//! - [`protocol`]: command specs, field codecs and the command table
//! - [`link`]: the communicator, consumers and link statistics
//! - [`service`]: passthrough bridge and maintenance sessions built on the link

/// Re-export transport types.
pub mod transport {
    pub use mastercomm_transport::*;
}

/// Re-export protocol types.
pub mod protocol {
    pub use mastercomm_protocol::*;
}

/// Re-export link types.
pub mod link {
    pub use mastercomm_link::*;
}

pub mod service;
