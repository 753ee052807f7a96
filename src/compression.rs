//! Whole-buffer compression of serialized frames.
//!
//! A serialized frame is assembled uncompressed and then compressed as one LZ4
//! block with its uncompressed size prepended. Decompression refuses headers
//! that declare more than [`MAX_FRAME_BYTES`], so a corrupt snapshot cannot
//! trigger an enormous allocation.

use std::error::Error;
use std::fmt;

use lz4_flex::{compress_prepend_size, decompress_size_prepended};

use crate::error::LockstepError;

/// Upper bound on the uncompressed size of a single frame.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Error type for frame compression and decompression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CompressionError {
    /// The buffer is too short to carry the 4-byte size header.
    MissingSizeHeader {
        /// Bytes supplied.
        len: usize,
    },
    /// The size header exceeds [`MAX_FRAME_BYTES`].
    DeclaredSizeTooLarge {
        /// Size declared by the header.
        declared: usize,
        /// The limit in effect.
        limit: usize,
    },
    /// LZ4 rejected the block.
    Decompress {
        /// The underlying lz4 error message.
        message: String,
    },
}

impl fmt::Display for CompressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSizeHeader { len } => {
                write!(f, "compressed frame of {} bytes has no size header", len)
            },
            Self::DeclaredSizeTooLarge { declared, limit } => write!(
                f,
                "compressed frame declares {} bytes, limit is {}",
                declared, limit
            ),
            Self::Decompress { message } => write!(f, "LZ4 decompression failed: {}", message),
        }
    }
}

impl Error for CompressionError {}

impl From<CompressionError> for LockstepError {
    fn from(err: CompressionError) -> Self {
        LockstepError::serialization(err.to_string())
    }
}

/// Compresses a fully assembled frame.
#[must_use]
pub fn compress_frame(raw: &[u8]) -> Vec<u8> {
    compress_prepend_size(raw)
}

/// Decompresses a frame produced by [`compress_frame`].
pub fn decompress_frame(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    let header: [u8; 4] = data
        .get(..4)
        .and_then(|h| h.try_into().ok())
        .ok_or(CompressionError::MissingSizeHeader { len: data.len() })?;
    let declared = u32::from_le_bytes(header) as usize;
    if declared > MAX_FRAME_BYTES {
        return Err(CompressionError::DeclaredSizeTooLarge {
            declared,
            limit: MAX_FRAME_BYTES,
        });
    }
    decompress_size_prepended(data).map_err(|e| CompressionError::Decompress {
        message: e.to_string(),
    })
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

    #[test]
    fn repetitive_frames_shrink() {
        let raw = vec![0u8; 4096];
        let compressed = compress_frame(&raw);
        assert!(compressed.len() < raw.len() / 4);
        assert_eq!(decompress_frame(&compressed).unwrap(), raw);
    }

    #[test]
    fn empty_frame_survives() {
        let compressed = compress_frame(&[]);
        assert!(decompress_frame(&compressed).unwrap().is_empty());
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert_eq!(
            decompress_frame(&[1, 2]),
            Err(CompressionError::MissingSizeHeader { len: 2 })
        );
    }

    #[test]
    fn oversized_header_is_rejected() {
        let mut data = u32::MAX.to_le_bytes().to_vec();
        data.extend_from_slice(&[0; 8]);
        assert!(matches!(
            decompress_frame(&data),
            Err(CompressionError::DeclaredSizeTooLarge { .. })
        ));
    }

    #[test]
    fn corrupt_block_is_rejected() {
        let mut compressed = compress_frame(b"lockstep lockstep lockstep lockstep");
        let last = compressed.len() - 1;
        compressed.truncate(last - 3);
        assert!(decompress_frame(&compressed).is_err());
    }
}
