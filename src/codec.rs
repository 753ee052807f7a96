//! Binary codec for typed simulation payloads.
//!
//! Globals, player configuration, component values, inputs, and replay files all
//! go through this module so the bincode configuration is defined exactly once.
//! Fixed-width integer encoding keeps encoded sizes independent of the values,
//! which the component arena relies on when it sizes its slots.
//!
//! # Examples
//!
//! ```
//! use fortress_lockstep::codec::{decode, decode_exact, encode, encode_append};
//!
//! let bytes = encode(&42u32).expect("encoding should succeed");
//! assert_eq!(bytes.len(), 4);
//!
//! let (decoded, read): (u32, _) = decode(&bytes).expect("decoding should succeed");
//! assert_eq!((decoded, read), (42, 4));
//!
//! let mut buffer = Vec::new();
//! encode_append(&7u16, &mut buffer).expect("encoding should succeed");
//! let value: u16 = decode_exact(&buffer).expect("decoding should succeed");
//! assert_eq!(value, 7);
//! ```

use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

use crate::error::LockstepError;

fn config() -> impl bincode::config::Config {
    bincode::config::standard().with_fixed_int_encoding()
}

/// Represents what operation was being performed when a codec error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CodecOperation {
    /// A generic encoding operation.
    Encode,
    /// A generic decoding operation.
    Decode,
    /// Appending to a buffer.
    AppendToBuffer,
    /// Decoding that must consume the whole input.
    DecodeExact,
}

impl fmt::Display for CodecOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode => write!(f, "encoding"),
            Self::Decode => write!(f, "decoding"),
            Self::AppendToBuffer => write!(f, "appending to buffer"),
            Self::DecodeExact => write!(f, "decoding an exact-length payload"),
        }
    }
}

/// Errors that can occur during encoding or decoding.
///
/// Bincode errors are opaque, so their messages are kept as strings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodecError {
    /// The encoding operation failed.
    EncodeError {
        /// The underlying bincode error message.
        message: String,
        /// The operation that was being performed.
        operation: CodecOperation,
    },
    /// The decoding operation failed.
    DecodeError {
        /// The underlying bincode error message.
        message: String,
        /// The operation that was being performed.
        operation: CodecOperation,
    },
    /// Decoding succeeded but left bytes unread.
    TrailingBytes {
        /// Bytes consumed by the decoder.
        consumed: usize,
        /// Total bytes supplied.
        total: usize,
    },
}

impl CodecError {
    /// Creates a new encode error with the given message and operation.
    pub fn encode(message: impl Into<String>, operation: CodecOperation) -> Self {
        Self::EncodeError {
            message: message.into(),
            operation,
        }
    }

    /// Creates a new decode error with the given message and operation.
    pub fn decode(message: impl Into<String>, operation: CodecOperation) -> Self {
        Self::DecodeError {
            message: message.into(),
            operation,
        }
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EncodeError { message, operation } => {
                write!(f, "encoding failed while {operation}: {message}")
            },
            Self::DecodeError { message, operation } => {
                write!(f, "decoding failed while {operation}: {message}")
            },
            Self::TrailingBytes { consumed, total } => {
                write!(f, "payload has trailing bytes: consumed {consumed} of {total}")
            },
        }
    }
}

impl std::error::Error for CodecError {}

impl From<CodecError> for LockstepError {
    fn from(err: CodecError) -> Self {
        LockstepError::serialization(err.to_string())
    }
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Encodes a value into a new `Vec<u8>`.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    bincode::serde::encode_to_vec(value, config())
        .map_err(|e| CodecError::encode(e.to_string(), CodecOperation::Encode))
}

/// Encodes a value by appending to an existing `Vec<u8>`.
///
/// Returns the number of bytes appended.
pub fn encode_append<T: Serialize + ?Sized>(value: &T, buffer: &mut Vec<u8>) -> CodecResult<usize> {
    let start_len = buffer.len();
    bincode::serde::encode_into_std_write(value, buffer, config())
        .map(|_| buffer.len() - start_len)
        .map_err(|e| CodecError::encode(e.to_string(), CodecOperation::AppendToBuffer))
}

/// Encodes a value into any [`std::io::Write`] sink, returning the bytes written.
///
/// The frame visitor uses this to stream payloads straight into a checksum
/// accumulator without an intermediate buffer.
pub fn encode_to_writer<T: Serialize + ?Sized, W: std::io::Write>(
    value: &T,
    writer: &mut W,
) -> CodecResult<usize> {
    bincode::serde::encode_into_std_write(value, writer, config())
        .map_err(|e| CodecError::encode(e.to_string(), CodecOperation::Encode))
}

/// Decodes a value from a byte slice, returning it with the number of bytes consumed.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<(T, usize)> {
    bincode::serde::decode_from_slice(bytes, config())
        .map_err(|e| CodecError::decode(e.to_string(), CodecOperation::Decode))
}

/// Decodes a value that must occupy the whole slice.
///
/// Used wherever a length-prefixed block is decoded: a shape mismatch that
/// leaves bytes unread is rejected instead of silently accepted.
pub fn decode_exact<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    let (value, consumed) = bincode::serde::decode_from_slice(bytes, config())
        .map_err(|e| CodecError::decode(e.to_string(), CodecOperation::DecodeExact))?;
    if consumed != bytes.len() {
        return Err(CodecError::TrailingBytes {
            consumed,
            total: bytes.len(),
        });
    }
    Ok(value)
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Position {
        x: i32,
        y: i32,
    }

    #[test]
    fn fixed_int_encoding_is_value_independent() {
        let small = encode(&Position { x: 0, y: 1 }).unwrap();
        let large = encode(&Position {
            x: i32::MAX,
            y: i32::MIN,
        })
        .unwrap();
        assert_eq!(small.len(), 8);
        assert_eq!(small.len(), large.len());
    }

    #[test]
    fn encode_append_reports_written_bytes() {
        let mut buffer = vec![0xFF];
        let written = encode_append(&1u64, &mut buffer).unwrap();
        assert_eq!(written, 8);
        assert_eq!(buffer.len(), 9);
    }

    #[test]
    fn decode_exact_rejects_trailing_bytes() {
        let mut bytes = encode(&5u32).unwrap();
        bytes.push(0);
        let err = decode_exact::<u32>(&bytes).unwrap_err();
        assert_eq!(
            err,
            CodecError::TrailingBytes {
                consumed: 4,
                total: 5
            }
        );
    }

    #[test]
    fn decode_truncated_input_fails() {
        let bytes = encode(&Position { x: 3, y: 4 }).unwrap();
        let result = decode::<Position>(&bytes[..5]);
        assert!(matches!(result, Err(CodecError::DecodeError { .. })));
    }

    #[test]
    fn codec_error_converts_to_serialization_error() {
        let err: LockstepError = CodecError::TrailingBytes {
            consumed: 1,
            total: 2,
        }
        .into();
        assert!(matches!(err, LockstepError::Serialization { .. }));
    }
}
