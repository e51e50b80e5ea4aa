//! Error types for Marmot wire formats.
//!
//! Decode failures name the field that failed so callers can report which part
//! of a peer's payload was malformed.

use thiserror::Error;

/// Errors from encoding or decoding the group data extension.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before a field was complete
    #[error("truncated {field}: need {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Field being decoded
        field: &'static str,
        /// Bytes required to finish the field
        needed: usize,
        /// Bytes left in the input
        remaining: usize,
    },

    /// A length or count prefix claims more data than the input holds
    #[error("{field} declares {declared} bytes but only {remaining} remain")]
    LengthOverflow {
        /// Field being decoded
        field: &'static str,
        /// Bytes implied by the prefix
        declared: usize,
        /// Bytes left in the input
        remaining: usize,
    },

    /// Variable-length integer uses the reserved `0b11` prefix
    #[error("invalid varint prefix in {field}")]
    InvalidVarintPrefix {
        /// Field being decoded
        field: &'static str,
    },

    /// Variable-length integer is not in its shortest form
    #[error("non-minimal varint encoding of {value} in {field}")]
    NonMinimalVarint {
        /// Field being decoded
        field: &'static str,
        /// Decoded value
        value: u32,
    },

    /// String field is not valid UTF-8
    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 {
        /// Field being decoded
        field: &'static str,
    },

    /// Version does not fit in 16 bits
    #[error("version {0} out of range")]
    VersionOutOfRange(u32),

    /// Bytes left over after the last field
    #[error("{0} trailing bytes after group data")]
    TrailingBytes(usize),

    /// Value cannot be represented as a variable-length integer
    #[error("{field} value {value} exceeds varint range")]
    ValueTooLarge {
        /// Field being encoded
        field: &'static str,
        /// Offending value
        value: usize,
    },
}

/// Errors from interpreting a transport event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Event kind does not match the expected kind
    #[error("unexpected event kind: expected {expected}, got {actual}")]
    UnexpectedKind {
        /// Kind the caller required
        expected: u16,
        /// Kind found on the event
        actual: u16,
    },

    /// Required tag is absent or empty
    #[error("missing tag: {0}")]
    MissingTag(&'static str),

    /// Tag value could not be parsed
    #[error("invalid {tag} tag: {reason}")]
    InvalidTag {
        /// Tag name
        tag: &'static str,
        /// Why parsing failed
        reason: String,
    },

    /// Content is not valid hex
    #[error("invalid content encoding: {0}")]
    InvalidContent(String),
}

/// Convenient Result type alias for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;
