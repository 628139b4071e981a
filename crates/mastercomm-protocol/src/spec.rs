use std::fmt;
use std::ops::Index;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::error::{ProtocolError, Result};
use crate::field::{Decoded, Field};
use crate::printable::Printable;
use crate::value::{FieldValue, Fields};

/// Every request starts with these bytes.
pub const REQUEST_START: &[u8; 3] = b"STR";

/// Every request ends with these bytes.
pub const REQUEST_END: &[u8; 2] = b"\r\n";

/// First byte of an encoded checksum.
pub const CRC_MARKER: u8 = b'C';

/// Routing key of a response: output action followed by the cid.
pub type Prefix = [u8; 3];

/// Encode the checksum of `data`: `C`, then the byte sum as a 16-bit
/// big-endian value.
pub fn calc_crc(data: &[u8]) -> Result<[u8; 3]> {
    let sum: u32 = data.iter().map(|&b| u32::from(b)).sum();
    if sum > u32::from(u16::MAX) {
        return Err(ProtocolError::ChecksumOverflow(sum));
    }
    Ok([CRC_MARKER, (sum / 256) as u8, (sum % 256) as u8])
}

/// Declarative description of one master command.
///
/// A spec is built once per command kind and shared by every exchange of
/// that kind. It encodes requests and incrementally decodes responses.
#[derive(Debug, Clone)]
pub struct MasterCommandSpec {
    action: [u8; 2],
    input_fields: Vec<Field>,
    output_fields: Vec<Field>,
    output_action: [u8; 2],
}

impl MasterCommandSpec {
    /// Spec whose response carries the same action code as the request.
    pub fn new(action: [u8; 2], input_fields: Vec<Field>, output_fields: Vec<Field>) -> Self {
        Self {
            action,
            input_fields,
            output_fields,
            output_action: action,
        }
    }

    /// Use a different action code for the response.
    pub fn with_output_action(mut self, output_action: [u8; 2]) -> Self {
        self.output_action = output_action;
        self
    }

    pub fn action(&self) -> [u8; 2] {
        self.action
    }

    pub fn output_action(&self) -> [u8; 2] {
        self.output_action
    }

    pub fn input_fields(&self) -> &[Field] {
        &self.input_fields
    }

    pub fn output_fields(&self) -> &[Field] {
        &self.output_fields
    }

    /// Action code as text, for logs and statistics.
    pub fn action_name(&self) -> String {
        String::from_utf8_lossy(&self.action).into_owned()
    }

    /// Routing key of the response to the exchange with this cid.
    pub fn prefix(&self, cid: u8) -> Prefix {
        [self.output_action[0], self.output_action[1], cid]
    }

    /// Build the request bytes.
    ///
    /// Checksum fields are computed over the input fields encoded so far
    /// (plus the action when `extended_crc` is set); any caller supplied
    /// value for them is ignored.
    pub fn create_input(&self, cid: u8, fields: &Fields, extended_crc: bool) -> Result<Bytes> {
        let mut encoded = BytesMut::new();
        for field in &self.input_fields {
            if field.is_crc() {
                let crc = if extended_crc {
                    let mut covered = BytesMut::with_capacity(2 + encoded.len());
                    covered.put_slice(&self.action);
                    covered.put_slice(&encoded);
                    calc_crc(&covered)?
                } else {
                    calc_crc(&encoded)?
                };
                encoded.put_slice(&crc);
            } else {
                field.encode_into(fields.get(field.name()), &mut encoded)?;
            }
        }

        let mut dst = BytesMut::with_capacity(6 + encoded.len() + REQUEST_END.len());
        dst.put_slice(REQUEST_START);
        dst.put_slice(&self.action);
        dst.put_u8(cid);
        dst.put_slice(&encoded);
        dst.put_slice(REQUEST_END);
        Ok(dst.freeze())
    }

    /// Build response bytes as the master would send them.
    ///
    /// A missing `crc` value is computed over the preceding output fields.
    pub fn create_output(&self, cid: u8, fields: &Fields) -> Result<Bytes> {
        let mut encoded = BytesMut::new();
        for field in &self.output_fields {
            match fields.get(field.name()) {
                None if field.is_crc() => {
                    let crc = calc_crc(&encoded)?;
                    encoded.put_slice(&crc);
                }
                value => field.encode_into(value, &mut encoded)?,
            }
        }

        let mut dst = BytesMut::with_capacity(3 + encoded.len());
        dst.put_slice(&self.prefix(cid));
        dst.put_slice(&encoded);
        Ok(dst.freeze())
    }

    /// Decode response bytes that follow a matched prefix.
    ///
    /// `partial` is the state returned by the previous call for the same
    /// response, if any. Bytes that do not yet complete a field are kept in
    /// the partial state and reported as consumed.
    pub fn consume_output(&self, data: &[u8], partial: Option<PartialResult>) -> Result<Consumed> {
        let mut partial = partial.unwrap_or_default();
        let from_pending = partial.pending.len();
        let mut buf = std::mem::take(&mut partial.pending);
        buf.extend_from_slice(data);

        let mut index = 0;
        while let Some(field) = self.output_fields.get(partial.field_index) {
            let mut wanted = field.min_decode_bytes();
            let value = loop {
                if index + wanted > buf.len() {
                    trace!(
                        action = %self.action_name(),
                        field = field.name(),
                        wanted,
                        available = buf.len() - index,
                        "response incomplete, waiting for more bytes"
                    );
                    partial.pending = buf.split_off(index);
                    return Ok(Consumed::Pending {
                        consumed: data.len(),
                        partial,
                    });
                }
                let decoded = field.decode(&buf[index..index + wanted]).map_err(|err| {
                    debug!(
                        action = %self.action_name(),
                        field = field.name(),
                        data = %Printable(&buf[index..index + wanted]),
                        %err,
                        "response field did not decode"
                    );
                    err
                })?;
                match decoded {
                    Decoded::Complete(value) => break value,
                    Decoded::NeedMore(required) if required > wanted => wanted = required,
                    Decoded::NeedMore(required) => {
                        return Err(ProtocolError::LengthMismatch {
                            expected: required,
                            actual: wanted,
                        })
                    }
                }
            };

            if field.is_crc() {
                partial.crc_offset = Some(partial.raw.len());
            }
            partial.raw.extend_from_slice(&buf[index..index + wanted]);
            partial.fields.insert(field.name(), value);
            partial.field_index += 1;
            index += wanted;
        }

        Ok(Consumed::Done {
            consumed: index - from_pending,
            output: CommandOutput {
                fields: partial.fields,
                raw: partial.raw.freeze(),
                crc_offset: partial.crc_offset,
            },
        })
    }

    /// Whether the response carries a checksum.
    pub fn output_has_crc(&self) -> bool {
        self.output_fields.iter().any(Field::is_crc)
    }

    /// Check a decoded response against its checksum.
    ///
    /// Responses without a checksum field fail the check.
    pub fn verify_crc(&self, output: &CommandOutput, extended_crc: bool) -> bool {
        let Some(offset) = output.crc_offset else {
            return false;
        };
        let Some(received) = output.fields.bytes("crc") else {
            return false;
        };
        let mut covered = BytesMut::with_capacity(2 + offset);
        if extended_crc {
            covered.put_slice(&self.action);
        }
        covered.put_slice(&output.raw[..offset]);
        match calc_crc(&covered) {
            Ok(expected) => received == expected,
            Err(_) => false,
        }
    }
}

impl PartialEq for MasterCommandSpec {
    fn eq(&self, other: &Self) -> bool {
        self.action == other.action && self.output_action == other.output_action
    }
}

impl Eq for MasterCommandSpec {}

impl fmt::Display for MasterCommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<MasterCommandSpec {} {}>",
            String::from_utf8_lossy(&self.action),
            String::from_utf8_lossy(&self.output_action)
        )
    }
}

/// Decode state of a response that has not been fully received.
#[derive(Debug, Clone, Default)]
pub struct PartialResult {
    field_index: usize,
    fields: Fields,
    pending: BytesMut,
    raw: BytesMut,
    crc_offset: Option<usize>,
}

impl PartialResult {
    /// Index of the next output field to decode.
    pub fn field_index(&self) -> usize {
        self.field_index
    }

    /// Fields decoded so far.
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Bytes received for the field currently being decoded.
    pub fn pending_bytes(&self) -> &[u8] {
        &self.pending
    }
}

/// A fully decoded response.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    fields: Fields,
    raw: Bytes,
    crc_offset: Option<usize>,
}

impl CommandOutput {
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn into_fields(self) -> Fields {
        self.fields
    }

    /// The exact response bytes after the prefix.
    pub fn actual_bytes(&self) -> &Bytes {
        &self.raw
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

impl Index<&str> for CommandOutput {
    type Output = FieldValue;

    fn index(&self, name: &str) -> &Self::Output {
        &self.fields[name]
    }
}

/// Result of feeding bytes to [`MasterCommandSpec::consume_output`].
#[derive(Debug, Clone)]
pub enum Consumed {
    /// All offered bytes were taken; more are needed.
    Pending {
        consumed: usize,
        partial: PartialResult,
    },
    /// The response is complete; bytes past `consumed` belong to the next
    /// message.
    Done {
        consumed: usize,
        output: CommandOutput,
    },
}

impl Consumed {
    pub fn consumed(&self) -> usize {
        match self {
            Consumed::Pending { consumed, .. } | Consumed::Done { consumed, .. } => *consumed,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Consumed::Done { .. })
    }
}
