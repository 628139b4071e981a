//! Command/response framing for the master controller protocol.
//!
//! Every request is framed as:
//! - the literal `STR`
//! - a 2-byte action code
//! - a 1-byte communication id (cid)
//! - the encoded input fields
//! - `\r\n`
//!
//! Responses start with the 2-byte output action and the cid; their length is
//! bounded only by the output fields themselves. [`MasterCommandSpec`] describes
//! one command and decodes its response incrementally, so a reply may arrive
//! split across any number of reads.

pub mod api;
pub mod error;
pub mod field;
pub mod printable;
pub mod spec;
pub mod svt;
pub mod value;

pub use error::{ProtocolError, Result};
pub use field::{Decoded, Field, FieldType};
pub use printable::Printable;
pub use spec::{
    calc_crc, CommandOutput, Consumed, MasterCommandSpec, PartialResult, Prefix, CRC_MARKER,
    REQUEST_END, REQUEST_START,
};
pub use svt::Svt;
pub use value::{FieldValue, Fields, ModuleErrors, OutputState};
