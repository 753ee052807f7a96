//! The single deterministic walk over frame contents.
//!
//! [`FrameState`](super::FrameState) writes itself through a [`StateSink`].
//! Serialization passes a [`ByteWriter`]; checksumming passes a
//! [`ChecksumAccumulator`]. Both see the same calls in the same order, so the
//! persisted bytes and the checksummed bytes come from one code path.
//!
//! All integers are little-endian. Variable-length content is preceded by a
//! `u32` length.

use std::hash::Hasher;

use serde::{de::DeserializeOwned, Serialize};

use crate::codec;
use crate::error::LockstepError;
use crate::hash::DeterministicHasher;

/// Destination of a frame walk.
pub trait StateSink {
    /// Appends raw bytes.
    fn write_bytes(&mut self, bytes: &[u8]);

    /// Appends one byte.
    fn write_u8(&mut self, value: u8) {
        self.write_bytes(&[value]);
    }

    /// Appends a boolean as `0` or `1`.
    fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    /// Appends a little-endian `u32`.
    fn write_u32(&mut self, value: u32) {
        self.write_bytes(&value.to_le_bytes());
    }

    /// Appends a little-endian `i32`.
    fn write_i32(&mut self, value: i32) {
        self.write_bytes(&value.to_le_bytes());
    }

    /// Appends a little-endian `u64`.
    fn write_u64(&mut self, value: u64) {
        self.write_bytes(&value.to_le_bytes());
    }

    /// Appends a length as `u32`, failing if it does not fit.
    fn write_len(&mut self, len: usize) -> Result<(), LockstepError> {
        let len = u32::try_from(len).map_err(|_| LockstepError::Capacity {
            what: "frame length field",
            requested: len,
            capacity: u32::MAX as usize,
        })?;
        self.write_u32(len);
        Ok(())
    }

    /// Appends a bincode-encoded value.
    fn write_serde<V: Serialize + ?Sized>(&mut self, value: &V) -> Result<(), LockstepError>
    where
        Self: Sized,
    {
        codec::encode_to_writer(value, &mut SinkWriter(self))?;
        Ok(())
    }

    /// Writes a block whose length is not known up front.
    ///
    /// Byte writers prefix the block with its length; accumulators only need the content.
    fn block<F>(&mut self, f: F) -> Result<(), LockstepError>
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> Result<(), LockstepError>,
    {
        f(self)
    }
}

struct SinkWriter<'a, S: StateSink>(&'a mut S);

impl<S: StateSink> std::io::Write for SinkWriter<'_, S> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write_bytes(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Sink that appends to a byte buffer.
#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a writer with preallocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Bytes written so far.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the writer, returning its buffer.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

impl StateSink for ByteWriter {
    fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn block<F>(&mut self, f: F) -> Result<(), LockstepError>
    where
        F: FnOnce(&mut Self) -> Result<(), LockstepError>,
    {
        let at = self.buf.len();
        self.buf.extend_from_slice(&[0; 4]);
        f(self)?;
        let len = self.buf.len() - at - 4;
        let len = u32::try_from(len).map_err(|_| LockstepError::Capacity {
            what: "frame block",
            requested: len,
            capacity: u32::MAX as usize,
        })?;
        self.buf[at..at + 4].copy_from_slice(&len.to_le_bytes());
        Ok(())
    }
}

/// Sink that folds everything into an FNV-1a checksum.
#[derive(Debug, Default, Clone)]
pub struct ChecksumAccumulator {
    hasher: DeterministicHasher,
}

impl ChecksumAccumulator {
    /// Creates an accumulator at the FNV-1a offset basis.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The checksum of everything written.
    #[must_use]
    pub fn finish(&self) -> u64 {
        self.hasher.finish()
    }
}

impl StateSink for ChecksumAccumulator {
    fn write_bytes(&mut self, bytes: &[u8]) {
        self.hasher.write(bytes);
    }
}

/// Cursor over serialized frame bytes.
///
/// Every read is bounds-checked; running out of bytes is a
/// [`LockstepError::Serialization`] error.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Creates a reader at the start of `bytes`.
    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Reads exactly `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], LockstepError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                LockstepError::serialization(format!(
                    "unexpected end of frame data: needed {} bytes at offset {}, {} available",
                    len,
                    self.pos,
                    self.remaining()
                ))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], LockstepError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> Result<u8, LockstepError> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Reads a boolean, rejecting anything but `0` and `1`.
    pub fn read_bool(&mut self) -> Result<bool, LockstepError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(LockstepError::serialization(format!(
                "invalid boolean byte {:#04x} at offset {}",
                other,
                self.pos - 1
            ))),
        }
    }

    /// Reads a little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, LockstepError> {
        self.read_array().map(u32::from_le_bytes)
    }

    /// Reads a little-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32, LockstepError> {
        self.read_array().map(i32::from_le_bytes)
    }

    /// Reads a little-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64, LockstepError> {
        self.read_array().map(u64::from_le_bytes)
    }

    /// Reads a `u32` length.
    pub fn read_len(&mut self) -> Result<usize, LockstepError> {
        self.read_u32().map(|len| len as usize)
    }

    /// Reads a length-prefixed byte run.
    pub fn read_prefixed(&mut self) -> Result<&'a [u8], LockstepError> {
        let len = self.read_len()?;
        self.read_bytes(len)
    }

    /// Reads a length-prefixed block as its own reader.
    pub fn read_block(&mut self) -> Result<ByteReader<'a>, LockstepError> {
        self.read_prefixed().map(ByteReader::new)
    }

    /// Reads a bincode-encoded value.
    pub fn read_serde<V: DeserializeOwned>(&mut self) -> Result<V, LockstepError> {
        let (value, consumed) = codec::decode(&self.bytes[self.pos..])?;
        self.pos += consumed;
        Ok(value)
    }

    /// Fails unless every byte was consumed.
    pub fn finish(&self, what: &str) -> Result<(), LockstepError> {
        if self.remaining() != 0 {
            return Err(LockstepError::serialization(format!(
                "{} has {} trailing bytes",
                what,
                self.remaining()
            )));
        }
        Ok(())
    }
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
    fn block_is_length_prefixed() {
        let mut writer = ByteWriter::new();
        writer.write_u8(0xAA);
        writer
            .block(|w| {
                w.write_u32(7);
                w.write_bool(true);
                Ok(())
            })
            .unwrap();
        let bytes = writer.into_inner();
        assert_eq!(bytes, vec![0xAA, 5, 0, 0, 0, 7, 0, 0, 0, 1]);

        let mut reader = ByteReader::new(&bytes);
        assert_eq!(reader.read_u8().unwrap(), 0xAA);
        let mut block = reader.read_block().unwrap();
        assert_eq!(block.read_u32().unwrap(), 7);
        assert!(block.read_bool().unwrap());
        block.finish("block").unwrap();
        reader.finish("frame").unwrap();
    }

    #[test]
    fn accumulator_sees_block_content_only() {
        let mut direct = ChecksumAccumulator::new();
        direct.write_u32(7);

        let mut blocked = ChecksumAccumulator::new();
        blocked
            .block(|a| {
                a.write_u32(7);
                Ok(())
            })
            .unwrap();
        assert_eq!(direct.finish(), blocked.finish());
    }

    #[test]
    fn serde_values_stream_identically() {
        let value = (3u16, -9i64, String::from("ok"));
        let mut writer = ByteWriter::new();
        writer.write_serde(&value).unwrap();
        let mut acc = ChecksumAccumulator::new();
        acc.write_serde(&value).unwrap();
        assert_eq!(acc.finish(), crate::hash::fnv1a_bytes(writer.as_slice()));

        let bytes = writer.into_inner();
        let mut reader = ByteReader::new(&bytes);
        let back: (u16, i64, String) = reader.read_serde().unwrap();
        assert_eq!(back, value);
        reader.finish("value").unwrap();
    }

    #[test]
    fn reader_reports_truncation() {
        let mut reader = ByteReader::new(&[1, 2]);
        let err = reader.read_u32().unwrap_err();
        assert!(err.to_string().contains("needed 4 bytes"));
    }

    #[test]
    fn reader_rejects_bad_bool_and_trailing() {
        let mut reader = ByteReader::new(&[2, 0]);
        assert!(reader.read_bool().is_err());
        let reader = ByteReader::new(&[0]);
        assert!(reader.finish("tail").is_err());
    }
}
