use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};
use crate::printable::Printable;
use crate::svt::Svt;
use crate::value::{FieldValue, ModuleErrors, OutputState};

/// Byte used to fill unused space in a [`FieldType::VarBytes`] field.
pub const VARBYTES_PAD: u8 = b' ';

/// Highest dimmer percentage.
pub const DIMMER_MAX: u32 = 100;

/// Outcome of decoding one field from a byte window.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// The window held exactly one encoded value.
    Complete(FieldValue),
    /// The field needs a window of this many bytes before it can decode.
    NeedMore(usize),
}

/// Wire encoding of a single protocol field.
///
/// The set of encodings is fixed by the master firmware. Every variant is a
/// pure codec: encoding and decoding depend only on the input and the
/// variant's configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    /// Unsigned 8-bit integer.
    Byte,
    /// Unsigned 16-bit integer, big-endian.
    Word,
    /// Fixed width ASCII string.
    String(usize),
    /// Zero bytes on encode, ignored on decode.
    Padding(usize),
    /// Raw bytes of fixed length.
    Bytes(usize),
    /// Fixed byte sequence, e.g. the `\r\n` terminator.
    Literal(Bytes),
    /// One system value byte.
    Svt,
    /// One length byte followed by a fixed-size, space padded data block.
    VarBytes(usize),
    /// Dimmer percentage `0..=100` packed in `0..=63`.
    Dimmer,
    /// Count-prefixed list of `(output id, dimmer)` pairs. Decode only.
    OutputList,
    /// Count-prefixed list of module error counters.
    ErrorList,
}

impl FieldType {
    /// Minimal number of bytes needed before a decode is attempted.
    pub fn min_decode_bytes(&self) -> usize {
        match self {
            FieldType::Byte | FieldType::Svt | FieldType::Dimmer => 1,
            FieldType::Word => 2,
            FieldType::String(len) | FieldType::Padding(len) | FieldType::Bytes(len) => *len,
            FieldType::Literal(literal) => literal.len(),
            FieldType::VarBytes(total) => total + 1,
            FieldType::OutputList | FieldType::ErrorList => 1,
        }
    }

    /// Whether encoding needs a caller supplied value.
    pub fn needs_value(&self) -> bool {
        !matches!(self, FieldType::Padding(_) | FieldType::Literal(_))
    }

    /// Encode `value` into a fresh buffer.
    pub fn encode(&self, value: &FieldValue) -> Result<Bytes> {
        let mut dst = BytesMut::with_capacity(self.min_decode_bytes());
        self.encode_into(value, &mut dst)?;
        Ok(dst.freeze())
    }

    /// Encode `value`, appending to `dst`.
    ///
    /// On error nothing is appended.
    pub fn encode_into(&self, value: &FieldValue, dst: &mut BytesMut) -> Result<()> {
        match self {
            FieldType::Byte => {
                let value = expect_int(value)?;
                dst.put_u8(check_range(value, u8::MAX.into())? as u8);
            }
            FieldType::Word => {
                let value = expect_int(value)?;
                dst.put_u16(check_range(value, u16::MAX.into())? as u16);
            }
            FieldType::String(len) => {
                let text = match value {
                    FieldValue::Str(text) => text,
                    other => return Err(mismatch("string", other)),
                };
                if !text.is_ascii() {
                    return Err(ProtocolError::NonAscii(text.clone()));
                }
                check_len(*len, text.len())?;
                dst.put_slice(text.as_bytes());
            }
            FieldType::Padding(len) => dst.put_bytes(0, *len),
            FieldType::Bytes(len) => {
                let data = expect_bytes(value)?;
                check_len(*len, data.len())?;
                dst.put_slice(data);
            }
            FieldType::Literal(literal) => dst.put_slice(literal),
            FieldType::Svt => match value {
                FieldValue::Svt(svt) => dst.put_u8(svt.byte()),
                other => return Err(mismatch("svt", other)),
            },
            FieldType::VarBytes(total) => {
                let data = expect_bytes(value)?;
                if data.len() > *total {
                    return Err(ProtocolError::TooManyBytes {
                        expected: *total,
                        actual: data.len(),
                    });
                }
                // A 255 byte block can still announce its length in one byte.
                if data.len() > u8::MAX as usize {
                    return Err(ProtocolError::InvalidLength {
                        declared: data.len(),
                        max: u8::MAX as usize,
                    });
                }
                dst.put_u8(data.len() as u8);
                dst.put_slice(data);
                dst.put_bytes(VARBYTES_PAD, total - data.len());
            }
            FieldType::Dimmer => {
                let percent = check_range(expect_int(value)?, DIMMER_MAX)?;
                dst.put_u8(encode_dimmer(percent as u8));
            }
            FieldType::OutputList => return Err(ProtocolError::EncodeUnsupported("output list")),
            FieldType::ErrorList => {
                let entries = match value {
                    FieldValue::Errors(entries) => entries,
                    other => return Err(mismatch("error list", other)),
                };
                if entries.len() > u8::MAX as usize {
                    return Err(ProtocolError::OutOfRange {
                        value: entries.len() as u32,
                        max: u8::MAX.into(),
                    });
                }
                let mut encoded = BytesMut::with_capacity(1 + entries.len() * 4);
                encoded.put_u8(entries.len() as u8);
                for entry in entries {
                    if !entry.module_type.is_ascii() {
                        return Err(ProtocolError::NonAscii(entry.module_type.to_string()));
                    }
                    encoded.put_u8(entry.module_type as u8);
                    encoded.put_u8(entry.module_number);
                    encoded.put_u16(entry.count);
                }
                dst.put_slice(&encoded);
            }
        }
        Ok(())
    }

    /// Decode a value from `src`.
    ///
    /// A window of the wrong size is a framing error, except for the
    /// count-prefixed lists which answer [`Decoded::NeedMore`] until they
    /// see their full length.
    pub fn decode(&self, src: &[u8]) -> Result<Decoded> {
        let value = match self {
            FieldType::Byte => {
                check_len(1, src.len())?;
                FieldValue::Int(src[0].into())
            }
            FieldType::Word => {
                check_len(2, src.len())?;
                FieldValue::Int(u16::from_be_bytes([src[0], src[1]]).into())
            }
            FieldType::String(len) => {
                check_len(*len, src.len())?;
                let text = src
                    .iter()
                    .map(|&b| if b < 128 { b as char } else { ' ' })
                    .collect();
                FieldValue::Str(text)
            }
            FieldType::Padding(len) => {
                check_len(*len, src.len())?;
                FieldValue::Empty
            }
            FieldType::Bytes(len) => {
                check_len(*len, src.len())?;
                FieldValue::Bytes(Bytes::copy_from_slice(src))
            }
            FieldType::Literal(literal) => {
                if src != literal.as_ref() {
                    return Err(ProtocolError::LiteralMismatch {
                        expected: Printable(literal).to_string(),
                        actual: Printable(src).to_string(),
                    });
                }
                FieldValue::Empty
            }
            FieldType::Svt => {
                check_len(1, src.len())?;
                FieldValue::Svt(Svt::from_byte(src[0]))
            }
            FieldType::VarBytes(total) => {
                check_len(total + 1, src.len())?;
                let declared = src[0] as usize;
                if declared > *total {
                    return Err(ProtocolError::InvalidLength {
                        declared,
                        max: *total,
                    });
                }
                FieldValue::Bytes(Bytes::copy_from_slice(&src[1..1 + declared]))
            }
            FieldType::Dimmer => {
                check_len(1, src.len())?;
                FieldValue::Int(decode_dimmer(src[0]).into())
            }
            FieldType::OutputList => {
                let Some(required) = list_len(src, 2)? else {
                    return Ok(Decoded::NeedMore(1));
                };
                if src.len() < required {
                    return Ok(Decoded::NeedMore(required));
                }
                let outputs = src[1..]
                    .chunks_exact(2)
                    .map(|pair| OutputState {
                        id: pair[0],
                        dimmer: decode_dimmer(pair[1]),
                    })
                    .collect();
                FieldValue::Outputs(outputs)
            }
            FieldType::ErrorList => {
                let Some(required) = list_len(src, 4)? else {
                    return Ok(Decoded::NeedMore(1));
                };
                if src.len() < required {
                    return Ok(Decoded::NeedMore(required));
                }
                let errors = src[1..]
                    .chunks_exact(4)
                    .map(|entry| ModuleErrors {
                        module_type: entry[0] as char,
                        module_number: entry[1],
                        count: u16::from_be_bytes([entry[2], entry[3]]),
                    })
                    .collect();
                FieldValue::Errors(errors)
            }
        };
        Ok(Decoded::Complete(value))
    }
}

/// Encode a dimmer percentage (`0..=100`) to the master's `0..=63` scale.
pub fn encode_dimmer(percent: u8) -> u8 {
    let percent = percent.min(DIMMER_MAX as u8);
    if percent <= 90 {
        // ceil(percent * 6 / 10)
        ((u16::from(percent) * 6 + 9) / 10) as u8
    } else {
        53 + percent - 90
    }
}

/// Decode a `0..=63` dimmer byte to a percentage.
pub fn decode_dimmer(byte: u8) -> u8 {
    if byte <= 54 {
        (u16::from(byte) * 10 / 6) as u8
    } else {
        90u8.saturating_add(byte - 53)
    }
}

/// Total size of a count-prefixed list, `None` for an empty window.
fn list_len(src: &[u8], entry_size: usize) -> Result<Option<usize>> {
    let Some(&count) = src.first() else {
        return Ok(None);
    };
    let required = 1 + count as usize * entry_size;
    if src.len() > required {
        return Err(ProtocolError::TooManyBytes {
            expected: required,
            actual: src.len(),
        });
    }
    Ok(Some(required))
}

fn check_len(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(ProtocolError::LengthMismatch { expected, actual });
    }
    Ok(())
}

fn check_range(value: u32, max: u32) -> Result<u32> {
    if value > max {
        return Err(ProtocolError::OutOfRange { value, max });
    }
    Ok(value)
}

fn expect_int(value: &FieldValue) -> Result<u32> {
    value.as_int().ok_or_else(|| mismatch("integer", value))
}

fn expect_bytes(value: &FieldValue) -> Result<&[u8]> {
    value.as_bytes().ok_or_else(|| mismatch("bytes", value))
}

fn mismatch(expected: &'static str, found: &FieldValue) -> ProtocolError {
    ProtocolError::TypeMismatch {
        expected,
        found: found.kind(),
    }
}

/// A named field of a command's input or output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    name: String,
    field_type: FieldType,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }

    /// One byte integer.
    pub fn byte(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Byte)
    }

    /// Two byte integer.
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Word)
    }

    pub fn string(name: impl Into<String>, length: usize) -> Self {
        Self::new(name, FieldType::String(length))
    }

    pub fn bytes(name: impl Into<String>, length: usize) -> Self {
        Self::new(name, FieldType::Bytes(length))
    }

    pub fn padding(length: usize) -> Self {
        Self::new("padding", FieldType::Padding(length))
    }

    pub fn lit(literal: impl Into<Bytes>) -> Self {
        Self::new("literal", FieldType::Literal(literal.into()))
    }

    pub fn varbytes(name: impl Into<String>, max_data_length: usize) -> Self {
        Self::new(name, FieldType::VarBytes(max_data_length))
    }

    pub fn svt(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Svt)
    }

    pub fn dimmer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Dimmer)
    }

    pub fn outputs(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::OutputList)
    }

    pub fn error_list(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::ErrorList)
    }

    /// Checksum field: 3 raw bytes named `crc`.
    pub fn crc() -> Self {
        Self::bytes("crc", 3)
    }

    /// Whether this field is a checksum, judged by name and shape.
    pub fn is_crc(&self) -> bool {
        self.name == "crc" && self.field_type == FieldType::Bytes(3)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> &FieldType {
        &self.field_type
    }

    pub fn min_decode_bytes(&self) -> usize {
        self.field_type.min_decode_bytes()
    }

    /// Encode an optional value, appending to `dst`.
    pub fn encode_into(&self, value: Option<&FieldValue>, dst: &mut BytesMut) -> Result<()> {
        match value {
            Some(value) => self.field_type.encode_into(value, dst),
            None if !self.field_type.needs_value() => {
                self.field_type.encode_into(&FieldValue::Empty, dst)
            }
            None => Err(ProtocolError::MissingValue(self.name.clone())),
        }
    }

    pub fn encode(&self, value: Option<&FieldValue>) -> Result<Bytes> {
        let mut dst = BytesMut::new();
        self.encode_into(value, &mut dst)?;
        Ok(dst.freeze())
    }

    pub fn decode(&self, src: &[u8]) -> Result<Decoded> {
        self.field_type.decode(src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(decoded: Decoded) -> FieldValue {
        match decoded {
            Decoded::Complete(value) => value,
            Decoded::NeedMore(n) => panic!("unexpected NeedMore({n})"),
        }
    }

    #[test]
    fn byte_roundtrip_exhaustive() {
        for value in 0u32..=255 {
            let encoded = FieldType::Byte.encode(&value.into()).unwrap();
            assert_eq!(encoded.as_ref(), &[value as u8]);
            let decoded = complete(FieldType::Byte.decode(&encoded).unwrap());
            assert_eq!(decoded, FieldValue::Int(value));
        }
    }

    #[test]
    fn integer_range_checks() {
        assert!(matches!(
            FieldType::Byte.encode(&256u32.into()),
            Err(ProtocolError::OutOfRange { value: 256, max: 255 })
        ));
        assert!(FieldType::Word.encode(&65_536u32.into()).is_err());
    }

    #[test]
    fn word_is_big_endian() {
        let encoded = FieldType::Word.encode(&0x1234u32.into()).unwrap();
        assert_eq!(encoded.as_ref(), &[0x12, 0x34]);
        for value in [0u32, 1, 255, 256, 4_660, 65_535] {
            let encoded = FieldType::Word.encode(&value.into()).unwrap();
            assert_eq!(
                complete(FieldType::Word.decode(&encoded).unwrap()),
                FieldValue::Int(value)
            );
        }
    }

    #[test]
    fn integer_decode_rejects_wrong_length() {
        assert!(matches!(
            FieldType::Word.decode(&[1]),
            Err(ProtocolError::LengthMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn string_encode_requires_exact_length() {
        assert!(FieldType::String(3).encode(&"ab".into()).is_err());
        assert_eq!(
            FieldType::String(2).encode(&"OK".into()).unwrap().as_ref(),
            b"OK"
        );
    }

    #[test]
    fn string_decode_replaces_high_bytes() {
        let decoded = complete(FieldType::String(4).decode(&[b'a', 0x80, 0xff, b'z']).unwrap());
        assert_eq!(decoded, FieldValue::Str("a  z".to_string()));
    }

    #[test]
    fn padding_ignores_value() {
        let encoded = Field::padding(4).encode(None).unwrap();
        assert_eq!(encoded.as_ref(), &[0, 0, 0, 0]);
        assert_eq!(
            complete(FieldType::Padding(4).decode(&[1, 2, 3, 4]).unwrap()),
            FieldValue::Empty
        );
        assert!(FieldType::Padding(4).decode(&[0, 0]).is_err());
    }

    #[test]
    fn literal_must_match() {
        let lit = Field::lit(&b"\r\n"[..]);
        assert_eq!(lit.encode(None).unwrap().as_ref(), b"\r\n");
        assert_eq!(complete(lit.decode(b"\r\n").unwrap()), FieldValue::Empty);
        assert!(matches!(
            lit.decode(b"\r\r"),
            Err(ProtocolError::LiteralMismatch { .. })
        ));
    }

    #[test]
    fn bytes_are_passed_through() {
        let field = Field::bytes("data", 3);
        let encoded = field.encode(Some(&b"abc".into())).unwrap();
        assert_eq!(encoded.as_ref(), b"abc");
        assert_eq!(
            complete(field.decode(b"abc").unwrap()),
            FieldValue::Bytes(Bytes::from_static(b"abc"))
        );
        assert!(field.decode(b"ab").is_err());
    }

    #[test]
    fn varbytes_padding() {
        let field = FieldType::VarBytes(10);
        let encoded = field.encode(&b"abc".into()).unwrap();
        assert_eq!(encoded.len(), 11);
        assert_eq!(encoded[0], 3);
        assert_eq!(&encoded[1..4], b"abc");
        assert!(encoded[4..].iter().all(|&b| b == VARBYTES_PAD));
        assert_eq!(
            complete(field.decode(&encoded).unwrap()),
            FieldValue::Bytes(Bytes::from_static(b"abc"))
        );
    }

    #[test]
    fn varbytes_rejects_oversized_payload() {
        assert!(matches!(
            FieldType::VarBytes(2).encode(&b"abc".into()),
            Err(ProtocolError::TooManyBytes { expected: 2, actual: 3 })
        ));
        assert!(matches!(
            FieldType::VarBytes(2).decode(&[5, 0, 0]),
            Err(ProtocolError::InvalidLength { declared: 5, max: 2 })
        ));
    }

    #[test]
    fn dimmer_breakpoints() {
        assert_eq!(encode_dimmer(0), 0);
        assert_eq!(encode_dimmer(90), 54);
        assert_eq!(encode_dimmer(91), 54);
        assert_eq!(encode_dimmer(92), 55);
        assert_eq!(encode_dimmer(100), 63);
        assert_eq!(encode_dimmer(1), 1);
        assert_eq!(encode_dimmer(89), 54);

        assert_eq!(decode_dimmer(0), 0);
        assert_eq!(decode_dimmer(53), 88);
        assert_eq!(decode_dimmer(54), 90);
        assert_eq!(decode_dimmer(55), 92);
        assert_eq!(decode_dimmer(63), 100);
    }

    #[test]
    fn dimmer_rejects_over_hundred() {
        assert!(FieldType::Dimmer.encode(&101u32.into()).is_err());
        assert_eq!(
            FieldType::Dimmer.encode(&50u32.into()).unwrap().as_ref(),
            &[30]
        );
    }

    #[test]
    fn output_list_needs_full_length() {
        let field = FieldType::OutputList;
        assert_eq!(field.decode(&[]).unwrap(), Decoded::NeedMore(1));
        assert_eq!(field.decode(&[2]).unwrap(), Decoded::NeedMore(5));
        assert_eq!(field.decode(&[2, 1, 2]).unwrap(), Decoded::NeedMore(5));
        assert!(matches!(
            field.decode(&[1, 1, 2, 3]),
            Err(ProtocolError::TooManyBytes { expected: 3, actual: 4 })
        ));

        let decoded = complete(field.decode(&[2, 1, 0, 3, 12]).unwrap());
        assert_eq!(
            decoded.as_outputs().unwrap(),
            &[
                OutputState { id: 1, dimmer: 0 },
                OutputState { id: 3, dimmer: 20 }
            ]
        );
        assert_eq!(
            complete(field.decode(&[0]).unwrap()),
            FieldValue::Outputs(vec![])
        );
    }

    #[test]
    fn output_list_cannot_encode() {
        assert!(matches!(
            FieldType::OutputList.encode(&FieldValue::Outputs(vec![])),
            Err(ProtocolError::EncodeUnsupported(_))
        ));
    }

    #[test]
    fn error_list_single_entry() {
        let value: FieldValue = vec![ModuleErrors::new('O', 20, 1)].into();
        let encoded = FieldType::ErrorList.encode(&value).unwrap();
        assert_eq!(encoded.as_ref(), b"\x01O\x14\x00\x01");
        assert_eq!(complete(FieldType::ErrorList.decode(&encoded).unwrap()), value);
    }

    #[test]
    fn error_list_multiple_entries() {
        let value: FieldValue = vec![
            ModuleErrors::new('O', 20, 1),
            ModuleErrors::new('I', 32, 257),
            ModuleErrors::new('O', 8, 0),
        ]
        .into();
        let wire = b"\x03O\x14\x00\x01I\x20\x01\x01O\x08\x00\x00";
        assert_eq!(FieldType::ErrorList.encode(&value).unwrap().as_ref(), wire);
        assert_eq!(complete(FieldType::ErrorList.decode(wire).unwrap()), value);
        assert_eq!(
            FieldType::ErrorList.decode(&wire[..5]).unwrap(),
            Decoded::NeedMore(13)
        );
    }

    #[test]
    fn svt_field_roundtrip() {
        let svt = Svt::temperature(21.0).unwrap();
        let encoded = Field::svt("tmp").encode(Some(&svt.into())).unwrap();
        assert_eq!(encoded.as_ref(), &[106]);
        assert_eq!(
            complete(Field::svt("tmp").decode(&encoded).unwrap()),
            FieldValue::Svt(svt)
        );
    }

    #[test]
    fn missing_and_mistyped_values() {
        assert!(matches!(
            Field::byte("x").encode(None),
            Err(ProtocolError::MissingValue(name)) if name == "x"
        ));
        assert!(matches!(
            Field::byte("x").encode(Some(&"a".into())),
            Err(ProtocolError::TypeMismatch { expected: "integer", found: "string" })
        ));
    }

    #[test]
    fn crc_is_recognized_by_shape() {
        assert!(Field::crc().is_crc());
        assert!(Field::bytes("crc", 3).is_crc());
        assert!(!Field::bytes("crc", 4).is_crc());
        assert!(!Field::bytes("data", 3).is_crc());
        assert!(!Field::string("crc", 3).is_crc());
    }
}
