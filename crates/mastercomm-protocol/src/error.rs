/// Errors raised while encoding or decoding protocol fields.
///
/// A decode that simply lacks bytes is not an error; see
/// [`Decoded::NeedMore`](crate::field::Decoded::NeedMore).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Value does not fit in the declared field width.
    #[error("value {value} does not fit in field (max {max})")]
    OutOfRange { value: u32, max: u32 },

    /// Buffer length differs from the declared field length.
    #[error("byte array is not of the correct length: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// A literal field did not match the expected bytes.
    #[error("byte array does not match literal: expected {expected}, got {actual}")]
    LiteralMismatch { expected: String, actual: String },

    /// A variable length field received more bytes than it announced.
    #[error("got more bytes than required: expected {expected}, got {actual}")]
    TooManyBytes { expected: usize, actual: usize },

    /// A length prefix announces more data than the field can hold.
    #[error("length prefix {declared} exceeds field capacity {max}")]
    InvalidLength { declared: usize, max: usize },

    /// No value was supplied for a field that needs one.
    #[error("missing value for field '{0}'")]
    MissingValue(String),

    /// The supplied value has the wrong kind for the field type.
    #[error("field expects {expected}, got {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// A string field contains characters outside ASCII.
    #[error("string field contains non-ASCII characters: {0:?}")]
    NonAscii(String),

    /// The byte sum does not fit in the 2-byte checksum.
    #[error("checksum {0} does not fit in 16 bits")]
    ChecksumOverflow(u32),

    /// The field type cannot be encoded.
    #[error("{0} fields cannot be encoded")]
    EncodeUnsupported(&'static str),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
