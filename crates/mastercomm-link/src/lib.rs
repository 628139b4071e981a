//! Read/dispatch engine for the master link.
//!
//! [`MasterCommunicator`] owns one physical link. A background reader thread
//! routes every response to the consumer registered for its 3-byte prefix
//! (output action + cid), reassembling responses split across reads. Bytes
//! nobody claims go to the passthrough queue, or to the maintenance queue
//! while the master's CLI is open.
//!
//! ```no_run
//! use mastercomm_link::{CommunicatorConfig, MasterCommunicator};
//! use mastercomm_protocol::{api, Fields};
//! use mastercomm_transport::{LinkStream, SerialConfig};
//!
//! # fn main() -> mastercomm_link::Result<()> {
//! let link = LinkStream::open_serial(&SerialConfig::new("/dev/ttyO5"))?;
//! let comm = MasterCommunicator::new(link, CommunicatorConfig::default());
//! comm.start()?;
//!
//! let fields = Fields::new().with("action_type", 165u8).with("action_number", 3u8);
//! let reply = comm.do_command(&api::basic_action(), &fields)?;
//! println!("{:?}", reply.str("resp"));
//! # Ok(())
//! # }
//! ```

pub mod communicator;
pub mod consumer;
mod demux;
pub mod error;
pub mod stats;
mod sync;

pub use communicator::{CommunicatorConfig, LinkMode, MasterCommunicator};
pub use consumer::{BackgroundConsumer, Consumer, Registration};
pub use error::{LinkError, Result};
pub use stats::{CommandHistograms, CommunicationStats, DebugBuffer, DebugEntry, STATS_HISTORY};
