//! Layout of a decompressed frame.
//!
//! ```text
//! u32 mode tag | i32 tick | u64 checksum        (FRAME_HEADER_LEN bytes)
//! u32 len | player block
//! u32 len | core block       (rng, enabled systems, inputs, globals, entities)
//! u32 len | assets block
//! ```
//!
//! The whole buffer is LZ4-compressed with a size prefix before it leaves
//! [`FrameState::serialize`](super::FrameState::serialize).

use super::visitor::ByteReader;
use crate::error::LockstepError;
use crate::Frame;

/// Bytes before the first block.
pub const FRAME_HEADER_LEN: usize = 16;

/// A decompressed frame split into header fields and blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBlocks<'a> {
    /// Raw [`SerializeMode`](super::SerializeMode) tag.
    pub mode_tag: u32,
    /// Tick recorded in the header.
    pub tick: Frame,
    /// Checksum recorded in the header.
    pub checksum: u64,
    /// Player block content.
    pub players: &'a [u8],
    /// Core block content.
    pub core: &'a [u8],
    /// Assets block content.
    pub assets: &'a [u8],
}

/// Splits a decompressed frame, rejecting truncated input and trailing bytes.
pub fn split_frame(raw: &[u8]) -> Result<FrameBlocks<'_>, LockstepError> {
    if raw.len() < FRAME_HEADER_LEN {
        return Err(LockstepError::serialization(format!(
            "frame is {} bytes, shorter than the {}-byte header",
            raw.len(),
            FRAME_HEADER_LEN
        )));
    }
    let mut reader = ByteReader::new(raw);
    let mode_tag = reader.read_u32()?;
    let tick = Frame::new(reader.read_i32()?);
    let checksum = reader.read_u64()?;
    let players = reader.read_prefixed()?;
    let core = reader.read_prefixed()?;
    let assets = reader.read_prefixed()?;
    reader.finish("frame")?;
    Ok(FrameBlocks {
        mode_tag,
        tick,
        checksum,
        players,
        core,
        assets,
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
    use super::super::visitor::{ByteWriter, StateSink};
    use super::*;

    fn sample() -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_u32(1);
        w.write_i32(42);
        w.write_u64(0xDEAD_BEEF);
        w.write_u32(1);
        w.write_u8(7);
        w.write_u32(0);
        w.write_u32(2);
        w.write_bytes(&[8, 9]);
        w.into_inner()
    }

    #[test]
    fn splits_header_and_blocks() {
        let raw = sample();
        let blocks = split_frame(&raw).unwrap();
        assert_eq!(blocks.mode_tag, 1);
        assert_eq!(blocks.tick, Frame::new(42));
        assert_eq!(blocks.checksum, 0xDEAD_BEEF);
        assert_eq!(blocks.players, &[7]);
        assert!(blocks.core.is_empty());
        assert_eq!(blocks.assets, &[8, 9]);
    }

    #[test]
    fn rejects_short_and_padded_frames() {
        let raw = sample();
        assert!(split_frame(&raw[..10]).is_err());
        assert!(split_frame(&raw[..raw.len() - 1]).is_err());
        let mut padded = raw;
        padded.push(0);
        assert!(split_frame(&padded).is_err());
    }
}
